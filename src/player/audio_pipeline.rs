use crate::core::{
    AudioDecoderConfig, AudioFrame, ChunkQueue, EncodedAudioChunk, PlayerConfig, PlayerError,
    Result,
};
use crate::player::audio_output::{AudioBuffer, AudioOutput, AudioOutputProvider};
use crate::player::codec::{decoder_channel, BoxedAudioDecoder, CodecProvider, DecoderEvent, DecoderEvents, DecoderSink};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPipelineState {
    Unconfigured,
    Configuring,
    Ready,
    Prebuffering,
    Assembled,
    Playing,
    Paused,
    Stopped,
}

type ResumeFuture = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

struct AudioInner {
    item_index: usize,
    config: PlayerConfig,
    codecs: Arc<dyn CodecProvider>,
    outputs: Arc<dyn AudioOutputProvider>,
    state: Mutex<AudioPipelineState>,

    setup_cell: OnceCell<Result<()>>,
    prebuffer_cell: OnceCell<Result<()>>,
    stop_cell: OnceCell<()>,
    resume_inflight: Mutex<Option<ResumeFuture>>,

    decoder: Mutex<Option<BoxedAudioDecoder>>,
    sink: Mutex<Option<DecoderSink<AudioFrame>>>,
    events: tokio::sync::Mutex<DecoderEvents<AudioFrame>>,
    chunks: Mutex<ChunkQueue<EncodedAudioChunk>>,
    decoder_config: Mutex<Option<AudioDecoderConfig>>,
    output: Mutex<Option<Arc<dyn AudioOutput>>>,

    buffer_bytes: AtomicUsize,
    done: Arc<AtomicBool>,
}

impl Drop for AudioInner {
    fn drop(&mut self) {
        if let Some(mut decoder) = self.decoder.get_mut().take() {
            decoder.close();
        }
    }
}

/// 音频管线 - 整段解码后拼接成连续缓冲，并提供播放时钟
///
/// 克隆开销很小，所有克隆共享同一状态。
#[derive(Clone)]
pub struct AudioPipeline {
    inner: Arc<AudioInner>,
}

fn replay(outcome: &Result<()>) -> Result<()> {
    outcome.as_ref().map(|_| ()).map_err(PlayerError::replay)
}

impl AudioPipeline {
    pub fn new(
        item_index: usize,
        config: PlayerConfig,
        codecs: Arc<dyn CodecProvider>,
        outputs: Arc<dyn AudioOutputProvider>,
    ) -> Self {
        let (sink, events) = decoder_channel();
        Self {
            inner: Arc::new(AudioInner {
                item_index,
                config,
                codecs,
                outputs,
                state: Mutex::new(AudioPipelineState::Unconfigured),
                setup_cell: OnceCell::new(),
                prebuffer_cell: OnceCell::new(),
                stop_cell: OnceCell::new(),
                resume_inflight: Mutex::new(None),
                decoder: Mutex::new(None),
                sink: Mutex::new(Some(sink)),
                events: tokio::sync::Mutex::new(events),
                chunks: Mutex::new(ChunkQueue::new()),
                decoder_config: Mutex::new(None),
                output: Mutex::new(None),
                buffer_bytes: AtomicUsize::new(0),
                done: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn state(&self) -> AudioPipelineState {
        *self.inner.state.lock()
    }

    fn set_state(&self, state: AudioPipelineState) {
        *self.inner.state.lock() = state;
    }

    /// 配置成功后为 true；否则调用方改用后备时钟
    pub fn is_functional(&self) -> bool {
        matches!(self.inner.setup_cell.get(), Some(Ok(())))
            && self.state() != AudioPipelineState::Stopped
    }

    /// 配置解码器，并发调用共享同一次结果
    pub async fn setup(
        &self,
        config: &AudioDecoderConfig,
        chunks: ChunkQueue<EncodedAudioChunk>,
    ) -> Result<()> {
        let outcome = self
            .inner
            .setup_cell
            .get_or_init(|| async move {
                let result = self.configure(config, chunks).await;
                if let Err(e) = &result {
                    warn!("[音频][ad {}] 解码器配置失败: {}", self.inner.item_index, e);
                    self.set_state(AudioPipelineState::Unconfigured);
                }
                result
            })
            .await;
        replay(outcome)
    }

    async fn configure(
        &self,
        config: &AudioDecoderConfig,
        chunks: ChunkQueue<EncodedAudioChunk>,
    ) -> Result<()> {
        self.set_state(AudioPipelineState::Configuring);

        let support = self.inner.codecs.is_audio_config_supported(config).await?;
        if !support.supported {
            return Err(PlayerError::ConfigNotSupported(config.codec.clone()));
        }

        let sink = self
            .inner
            .sink
            .lock()
            .take()
            .ok_or_else(|| PlayerError::Invariant("音频解码器 sink 已被使用".to_string()))?;
        let mut decoder = self.inner.codecs.create_audio_decoder(sink)?;
        decoder.configure(&support.config)?;

        info!(
            "✅ [音频][ad {}] 解码器已配置: {} {} Hz, {} 声道, {} 个压缩单元",
            self.inner.item_index,
            support.config.codec,
            support.config.sample_rate,
            support.config.number_of_channels,
            chunks.len()
        );

        *self.inner.decoder.lock() = Some(decoder);
        *self.inner.chunks.lock() = chunks;
        *self.inner.decoder_config.lock() = Some(support.config);
        self.set_state(AudioPipelineState::Ready);
        Ok(())
    }

    /// 解码全部音频并拼接为一个缓冲，装载到输出（结果缓存）
    pub async fn prebuffer(&self) -> Result<()> {
        let outcome = self
            .inner
            .prebuffer_cell
            .get_or_init(|| async move {
                let result = self.assemble().await;
                if let Err(e) = &result {
                    error!("❌ [音频][ad {}] 预缓冲失败: {}", self.inner.item_index, e);
                    self.stop().await;
                }
                result
            })
            .await;
        replay(outcome)
    }

    async fn assemble(&self) -> Result<()> {
        if !matches!(self.inner.setup_cell.get(), Some(Ok(()))) {
            return Err(PlayerError::NotConfigured);
        }
        self.set_state(AudioPipelineState::Prebuffering);

        {
            let chunks = std::mem::take(&mut *self.inner.chunks.lock());
            let mut guard = self.inner.decoder.lock();
            let decoder = guard.as_mut().ok_or(PlayerError::NotConfigured)?;
            let mut chunks = chunks;
            while let Some(chunk) = chunks.pop_front() {
                decoder.decode(chunk)?;
            }
            decoder.flush()?;
        }

        let timeout = Duration::from_millis(self.inner.config.prebuffer_timeout_ms);
        let frames = tokio::time::timeout(timeout, self.collect_frames())
            .await
            .map_err(|_| PlayerError::PrebufferTimeout(self.inner.config.prebuffer_timeout_ms))??;

        let (rate, channels) = {
            let config = self.inner.decoder_config.lock();
            let first = frames.first();
            let rate = first
                .map(|f| f.sample_rate)
                .or(config.as_ref().map(|c| c.sample_rate))
                .unwrap_or(48_000);
            let channels = first
                .map(|f| f.planes.len())
                .or(config.as_ref().map(|c| c.number_of_channels as usize))
                .unwrap_or(2);
            (rate, channels)
        };
        let buffer = assemble_buffer(&frames, rate, channels);
        let bytes = buffer.byte_size();
        let length = buffer.length();

        let output = self.inner.outputs.create(rate, channels as u16)?;
        let done = self.inner.done.clone();
        output.load(
            Arc::new(buffer),
            Box::new(move || done.store(true, Ordering::SeqCst)),
        )?;
        *self.inner.output.lock() = Some(output);
        self.inner.buffer_bytes.store(bytes, Ordering::Relaxed);
        self.set_state(AudioPipelineState::Assembled);

        info!(
            "✅ [音频][ad {}] 已解码 {} 帧, 缓冲 {} 采样 x {} 声道",
            self.inner.item_index,
            frames.len(),
            length,
            channels
        );
        Ok(())
    }

    /// 收集解码输出直到 flush 完成；解码错误直接失败
    async fn collect_frames(&self) -> Result<Vec<AudioFrame>> {
        let mut events = self.inner.events.lock().await;
        let mut frames = Vec::new();
        loop {
            match events.recv().await {
                Some(DecoderEvent::Output(frame)) => frames.push(frame),
                Some(DecoderEvent::Flushed) => return Ok(frames),
                Some(DecoderEvent::Error(msg)) => return Err(PlayerError::DecodeError(msg)),
                None => {
                    return Err(PlayerError::DecodeError(
                        "音频解码器事件通道已关闭".to_string(),
                    ))
                }
            }
        }
    }

    fn output(&self) -> Option<Arc<dyn AudioOutput>> {
        self.inner.output.lock().clone()
    }

    /// 首次调用开始播放，暂停后再调用则恢复
    pub async fn play(&self) -> Result<()> {
        match self.state() {
            AudioPipelineState::Assembled => {
                let output = self.output().ok_or(PlayerError::NotConfigured)?;
                output.start()?;
                self.set_state(AudioPipelineState::Playing);
                info!("▶️ [音频][ad {}] 开始播放", self.inner.item_index);
                Ok(())
            }
            AudioPipelineState::Paused => self.resume().await,
            AudioPipelineState::Playing => Ok(()),
            other => Err(PlayerError::AudioError(format!(
                "当前状态 {:?} 无法播放",
                other
            ))),
        }
    }

    /// 并发的恢复请求共享同一个进行中的 future
    ///
    /// future 存放在管线内部，只持有弱引用，等待中途被丢弃也不会形成引用环。
    async fn resume(&self) -> Result<()> {
        let future = {
            let mut slot = self.inner.resume_inflight.lock();
            match slot.as_ref() {
                Some(inflight) => inflight.clone(),
                None => {
                    let weak: Weak<AudioInner> = Arc::downgrade(&self.inner);
                    let future = async move {
                        let output = weak
                            .upgrade()
                            .and_then(|inner| AudioPipeline { inner }.output());
                        let result = match output {
                            Some(output) => output.resume().await.map_err(|e| e.to_string()),
                            None => Err("音频输出不存在".to_string()),
                        };
                        if let Some(inner) = weak.upgrade() {
                            let pipeline = AudioPipeline { inner };
                            if result.is_ok() && pipeline.state() == AudioPipelineState::Paused {
                                pipeline.set_state(AudioPipelineState::Playing);
                            }
                            pipeline.inner.resume_inflight.lock().take();
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(future.clone());
                    future
                }
            }
        };
        future.await.map_err(PlayerError::AudioError)
    }

    /// 暂停（重复调用无副作用）
    pub async fn pause(&self) -> Result<()> {
        if self.state() != AudioPipelineState::Playing {
            return Ok(());
        }
        if let Some(output) = self.output() {
            output.suspend().await?;
        }
        self.set_state(AudioPipelineState::Paused);
        info!("⏸️ [音频][ad {}] 已暂停", self.inner.item_index);
        Ok(())
    }

    /// 关闭解码器和输出，只执行一次
    pub async fn stop(&self) {
        self.inner
            .stop_cell
            .get_or_init(|| async move {
                if let Some(mut decoder) = self.inner.decoder.lock().take() {
                    decoder.close();
                }
                let output = self.inner.output.lock().take();
                if let Some(output) = output {
                    if let Err(e) = output.close().await {
                        warn!("[音频][ad {}] 关闭输出失败: {}", self.inner.item_index, e);
                    }
                }
                self.inner.done.store(true, Ordering::SeqCst);
                self.set_state(AudioPipelineState::Stopped);
                info!("⏹ [音频][ad {}] 已停止", self.inner.item_index);
            })
            .await;
    }

    /// 播放位置（秒）
    pub fn current_time(&self) -> f64 {
        self.output().map(|o| o.current_time()).unwrap_or(0.0)
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }

    pub fn buffer_size_bytes(&self) -> usize {
        self.inner.buffer_bytes.load(Ordering::Relaxed)
    }
}

/// 按各帧时长之和分配缓冲，逐帧按声道偏移拷贝（越界部分截断）
fn assemble_buffer(frames: &[AudioFrame], sample_rate: u32, channels: usize) -> AudioBuffer {
    let total_ms: f64 = frames.iter().map(|f| f.duration).sum();
    let length = (total_ms / 1000.0 * sample_rate as f64).round() as usize;
    let mut buffer = AudioBuffer::new(channels, length, sample_rate);

    for (channel, destination) in buffer.channels.iter_mut().enumerate() {
        let mut offset = 0usize;
        for frame in frames {
            // 缺少该声道的帧留出静音，后续帧位置不变
            if let Some(plane) = frame.planes.get(channel) {
                let start = offset.min(length);
                let end = (offset + plane.len()).min(length);
                destination[start..end].copy_from_slice(&plane[..end - start]);
            }
            offset += frame.number_of_frames();
        }
    }
    buffer
}
