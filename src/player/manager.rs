use crate::core::{
    AudioDecoderConfig, ChunkQueue, EncodedAudioChunk, EncodedVideoChunk, Item, MediaInfo,
    PlaybackClock, PlaybackState, PlayerConfig, PlayerError, PlayerMetrics, Result,
    VideoDecoderConfig, VideoMetrics, VisualizationSnapshot,
};
use crate::player::audio_output::AudioOutputProvider;
use crate::player::audio_pipeline::AudioPipeline;
use crate::player::codec::CodecProvider;
use crate::player::container::ContainerParser;
use crate::player::demuxer::{Demuxed, Demuxer};
use crate::player::fetch::Fetcher;
use crate::player::video_pipeline::VideoPipeline;
use crate::player::work_delegator::WorkDelegator;
use crate::renderer::RenderSurface;
use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::process;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 宿主提供的外部能力
#[derive(Clone)]
pub struct PlayerHost {
    pub codecs: Arc<dyn CodecProvider>,
    pub audio_outputs: Arc<dyn AudioOutputProvider>,
    pub container: Arc<dyn ContainerParser>,
    pub fetcher: Arc<dyn Fetcher>,
}

/// 当前项目的时间来源：音频时钟，或音频不可用时的后备时钟
#[derive(Clone)]
enum Transport {
    Audio(AudioPipeline),
    Fallback(PlaybackClock),
}

impl Transport {
    fn now_ms(&self) -> f64 {
        match self {
            Transport::Audio(audio) => audio.current_time() * 1000.0,
            Transport::Fallback(clock) => clock.now_ms(),
        }
    }

    async fn start(&self) -> Result<()> {
        match self {
            Transport::Audio(audio) => audio.play().await,
            Transport::Fallback(clock) => {
                clock.set_time(0.0);
                clock.play();
                Ok(())
            }
        }
    }

    async fn resume(&self) -> Result<()> {
        match self {
            Transport::Audio(audio) => audio.play().await,
            Transport::Fallback(clock) => {
                clock.play();
                Ok(())
            }
        }
    }

    async fn suspend(&self) -> Result<()> {
        match self {
            Transport::Audio(audio) => audio.pause().await,
            Transport::Fallback(clock) => {
                clock.pause();
                Ok(())
            }
        }
    }

    fn audio_buffer_bytes(&self) -> usize {
        match self {
            Transport::Audio(audio) => audio.buffer_size_bytes(),
            Transport::Fallback(_) => 0,
        }
    }
}

/// 正在播放的项目
struct CurrentItem {
    index: usize,
    url: String,
    media_info: MediaInfo,
}

struct ManagerShared {
    config: PlayerConfig,
    host: PlayerHost,
    delegator: Arc<WorkDelegator>,
    surface: Mutex<Box<dyn RenderSurface>>,

    state: Mutex<PlaybackState>,
    subscribers: Mutex<Vec<Sender<PlaybackState>>>,
    items: Mutex<Vec<Item>>,

    transport: Mutex<Option<Transport>>,
    current: Mutex<Option<CurrentItem>>,
    video_metrics: Mutex<VideoMetrics>,
    visualization: Mutex<VisualizationSnapshot>,
}

impl ManagerShared {
    fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// 状态变化同步通知订阅者，断开的订阅者被移除
    fn set_state(&self, next: PlaybackState) {
        {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            info!("{} 播放状态: {} -> {}", log_ctx(), *state, next);
            *state = next;
        }
        self.subscribers.lock().retain(|tx| tx.send(next).is_ok());
    }

    fn transport(&self) -> Option<Transport> {
        self.transport.lock().clone()
    }

    fn clear_item(&self) {
        *self.transport.lock() = None;
        *self.current.lock() = None;
        *self.video_metrics.lock() = VideoMetrics::default();
        *self.visualization.lock() = VisualizationSnapshot::default();
    }
}

/// 正在运行的队列任务；`done` 在队列自然结束时置为 true，任务被取消时发送端随之析构
struct QueueTask {
    handle: JoinHandle<()>,
    done: watch::Receiver<bool>,
}

/// 播放管理器 - 按顺序获取、解封装、播放一组广告
pub struct PlaybackManager {
    shared: Arc<ManagerShared>,
    queue_task: Mutex<Option<QueueTask>>,
}

impl PlaybackManager {
    pub fn new(
        config: PlayerConfig,
        host: PlayerHost,
        delegator: Arc<WorkDelegator>,
        surface: Box<dyn RenderSurface>,
    ) -> Self {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        Self {
            shared: Arc::new(ManagerShared {
                config,
                host,
                delegator,
                surface: Mutex::new(surface),
                state: Mutex::new(PlaybackState::Stopped),
                subscribers: Mutex::new(Vec::new()),
                items: Mutex::new(Vec::new()),
                transport: Mutex::new(None),
                current: Mutex::new(None),
                video_metrics: Mutex::new(VideoMetrics::default()),
                visualization: Mutex::new(VisualizationSnapshot::default()),
            }),
            queue_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    pub fn subscribe(&self) -> Receiver<PlaybackState> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// 提交新的播放队列（会先重置当前播放）
    pub async fn submit_queue(&self, items: Vec<Item>) {
        self.reset().await;
        info!("{} 📋 提交播放队列: {} 个项目", log_ctx(), items.len());
        *self.shared.items.lock() = items.clone();
        self.shared.set_state(PlaybackState::PlaybackRequested);

        let shared = self.shared.clone();
        let (done_tx, done) = watch::channel(false);
        let handle = tokio::spawn(async move {
            run_queue(shared, items).await;
            let _ = done_tx.send(true);
        });
        let previous = self.queue_task.lock().replace(QueueTask { handle, done });
        if let Some(previous) = previous {
            // 并发提交时只保留最后一个队列
            warn!("{} ⚠️ 丢弃并发提交的队列任务", log_ctx());
            previous.handle.abort();
        }
    }

    /// 暂停中则恢复；已停止且有提交过的队列则重新播放
    pub async fn play(&self) -> Result<()> {
        match self.state() {
            PlaybackState::Paused => {
                if let Some(transport) = self.shared.transport() {
                    transport.resume().await?;
                }
                self.shared.set_state(PlaybackState::Playing);
            }
            PlaybackState::Stopped => {
                let items = self.shared.items.lock().clone();
                if !items.is_empty() {
                    self.submit_queue(items).await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        if self.state() != PlaybackState::Playing {
            return Ok(());
        }
        if let Some(transport) = self.shared.transport() {
            transport.suspend().await?;
        }
        self.shared.set_state(PlaybackState::Paused);
        Ok(())
    }

    pub fn metrics(&self) -> PlayerMetrics {
        let video = self.shared.video_metrics.lock().clone();
        let audio_buffer_bytes = self
            .shared
            .transport()
            .map(|t| t.audio_buffer_bytes())
            .unwrap_or(0);
        let current = self.shared.current.lock();
        let (item_index, url, width, height, codec) = match current.as_ref() {
            Some(item) => (
                Some(item.index),
                item.url.clone(),
                item.media_info.width,
                item.media_info.height,
                item.media_info.video_codec.clone(),
            ),
            None => (None, String::new(), 0, 0, String::new()),
        };
        PlayerMetrics {
            item_index,
            url,
            width,
            height,
            codec,
            source_fps: video.source_fps,
            decode_fps: video.decode_fps,
            conversion_fps: video.conversion_fps,
            playback_fps: video.playback_fps,
            dropped_frames: video.dropped_frames,
            buffered_ms: video.buffered_ms,
            video_encoded_bytes: video.encoded_bytes,
            frame_buffer_bytes: video.frame_buffer_bytes,
            audio_buffer_bytes,
        }
    }

    pub fn visualization(&self) -> VisualizationSnapshot {
        self.shared.visualization.lock().clone()
    }

    /// 取消队列任务，丢弃所有管线
    pub async fn reset(&self) {
        let task = self.queue_task.lock().take();
        if let Some(task) = task {
            task.handle.abort();
            // 等待任务真正结束，管线随之析构
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    error!("{} ❌ 队列任务异常: {}", log_ctx(), e);
                }
            }
            debug!("{} 队列任务已取消", log_ctx());
        }
        if let Some(Transport::Audio(audio)) = self.shared.transport() {
            audio.stop().await;
        }
        self.shared.clear_item();
        self.shared.set_state(PlaybackState::Stopped);
    }

    /// 等待当前队列播放结束或被重置
    ///
    /// 任务句柄始终留在管理器里，等待期间 `reset` 仍能取消队列。
    pub async fn join(&self) {
        let done = self.queue_task.lock().as_ref().map(|task| task.done.clone());
        let Some(mut done) = done else {
            return;
        };
        loop {
            let finished = *done.borrow_and_update();
            if finished || done.changed().await.is_err() {
                break;
            }
        }
    }
}

/// 三个阶段各自按顺序处理，阶段之间可以重叠
async fn run_queue(shared: Arc<ManagerShared>, items: Vec<Item>) {
    let (fetched_tx, mut fetched_rx) = mpsc::unbounded_channel::<(usize, Item, Bytes)>();
    let (demuxed_tx, mut demuxed_rx) = mpsc::unbounded_channel::<(usize, Item, Demuxed)>();

    let fetcher = shared.host.fetcher.clone();
    let fetch_stage = async move {
        for (index, item) in items.into_iter().enumerate() {
            info!("{} 📥 开始获取 ad {}: {}", log_ctx(), index, item.source.locator());
            match fetcher.fetch(&item.source).await {
                Ok(bytes) => {
                    info!("{} 获取完成 ad {} ({} 字节)", log_ctx(), index, bytes.len());
                    if fetched_tx.send((index, item, bytes)).is_err() {
                        break;
                    }
                }
                Err(e) => error!("{} ❌ 获取 ad {} 失败, 跳过: {}", log_ctx(), index, e),
            }
        }
    };

    let demuxer = Demuxer::new(shared.host.container.clone(), shared.config.samples_per_batch);
    let demux_stage = async move {
        while let Some((index, item, bytes)) = fetched_rx.recv().await {
            let worker = demuxer.clone();
            let result = match tokio::task::spawn_blocking(move || worker.demux(bytes)).await {
                Ok(result) => result,
                Err(e) => Err(PlayerError::Other(format!("解封装任务失败: {}", e))),
            };
            match result {
                Ok(demuxed) => {
                    info!("{} 解封装完成 ad {}", log_ctx(), index);
                    if demuxed_tx.send((index, item, demuxed)).is_err() {
                        break;
                    }
                }
                Err(e) => error!("{} ❌ 解封装 ad {} 失败, 跳过: {}", log_ctx(), index, e),
            }
        }
    };

    let play_shared = shared.clone();
    let play_stage = async move {
        while let Some((index, item, demuxed)) = demuxed_rx.recv().await {
            if let Err(e) = play_item(&play_shared, index, &item, demuxed).await {
                error!("{} ❌ 播放 ad {} 失败, 跳过: {}", log_ctx(), index, e);
            }
        }
    };

    tokio::join!(fetch_stage, demux_stage, play_stage);

    shared.clear_item();
    shared.set_state(PlaybackState::Stopped);
    info!("{} ✅ 播放队列结束", log_ctx());
}

async fn play_item(
    shared: &Arc<ManagerShared>,
    index: usize,
    item: &Item,
    demuxed: Demuxed,
) -> Result<()> {
    let Demuxed {
        media_info,
        video_config,
        audio_config,
        video_chunks,
        audio_chunks,
    } = demuxed;
    info!(
        "{} 🎬 开始播放 ad {}: {} {}x{}, {:.0}ms",
        log_ctx(),
        index,
        item.source.locator(),
        media_info.width,
        media_info.height,
        media_info.duration
    );
    *shared.current.lock() = Some(CurrentItem {
        index,
        url: item.source.locator(),
        media_info,
    });

    let mut video = VideoPipeline::new(
        index,
        shared.config.clone(),
        shared.host.codecs.clone(),
        shared.delegator.clone(),
    );
    let audio = AudioPipeline::new(
        index,
        shared.config.clone(),
        shared.host.codecs.clone(),
        shared.host.audio_outputs.clone(),
    );

    let result = drive_item(
        shared,
        &mut video,
        &audio,
        &video_config,
        &audio_config,
        video_chunks,
        audio_chunks,
    )
    .await;

    audio.stop().await;
    video.close();
    *shared.transport.lock() = None;
    result
}

#[allow(clippy::too_many_arguments)]
async fn drive_item(
    shared: &Arc<ManagerShared>,
    video: &mut VideoPipeline,
    audio: &AudioPipeline,
    video_config: &VideoDecoderConfig,
    audio_config: &AudioDecoderConfig,
    video_chunks: ChunkQueue<EncodedVideoChunk>,
    audio_chunks: ChunkQueue<EncodedAudioChunk>,
) -> Result<()> {
    let (video_setup, audio_setup) = tokio::join!(
        video.setup(video_config, video_chunks),
        audio.setup(audio_config, audio_chunks)
    );
    video_setup?;
    if let Err(e) = audio_setup {
        warn!("{} ⚠️ 音频不可用，改用后备时钟: {}", log_ctx(), e);
    }

    let audio_prebuffer = async {
        if audio.is_functional() {
            audio.prebuffer().await
        } else {
            Ok(())
        }
    };
    let (video_prebuffer, audio_prebuffer) = tokio::join!(video.prebuffer(), audio_prebuffer);
    video_prebuffer?;
    if let Err(e) = audio_prebuffer {
        warn!("{} ⚠️ 音频预缓冲失败，改用后备时钟: {}", log_ctx(), e);
    }

    let transport = if audio.is_functional() {
        Transport::Audio(audio.clone())
    } else {
        Transport::Fallback(PlaybackClock::new())
    };
    *shared.transport.lock() = Some(transport.clone());
    transport.start().await?;
    if shared.state() == PlaybackState::Paused {
        // 预缓冲期间收到了暂停
        transport.suspend().await?;
    } else {
        shared.set_state(PlaybackState::Playing);
    }

    let mut ticker = tokio::time::interval(shared.config.render_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let now_ms = transport.now_ms();
        {
            let mut surface = shared.surface.lock();
            video.render_at(now_ms, &mut **surface)?;
        }
        *shared.video_metrics.lock() = video.metrics();
        *shared.visualization.lock() = video.visualization();

        let done = match &transport {
            Transport::Audio(audio) => audio.is_done(),
            Transport::Fallback(_) => video.is_done_playing(),
        };
        if done {
            info!("{} ✅ ad 播放结束 @ {:.0}ms", log_ctx(), now_ms);
            return Ok(());
        }
    }
}
