use crate::core::{
    ChunkQueue, EncodedVideoChunk, FrameBufferEntry, PlayerConfig, PlayerError, RawVideoFrame,
    Result, VideoDecoderConfig, VideoMetrics, VisualizationSnapshot,
};
use crate::player::codec::{
    decoder_channel, BoxedVideoDecoder, CodecProvider, DecoderEvent, DecoderEvents, DecoderSink,
};
use crate::player::work_delegator::{ConversionJob, ConversionResult, WorkDelegator};
use crate::renderer::RenderSurface;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// 没有任何时长信息时看门狗使用的步长（30fps）
const DEFAULT_FRAME_DURATION_MS: f64 = 1000.0 / 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoPipelineState {
    Unconfigured,
    Configuring,
    Ready,
    Prebuffering,
    Playing,
    Flushing,
    Done,
}

/// 一次 `render_at` 的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderOutcome {
    Presented(f64),
    /// 命中的帧已经画过
    AlreadyPresented,
    Dropped,
    DrawFailed,
}

/// 按时间戳删除的有序集合（允许重复时间戳）
#[derive(Debug, Default)]
struct TimestampSet {
    entries: BTreeMap<i64, (f64, usize)>,
}

impl TimestampSet {
    fn key(timestamp: f64) -> i64 {
        // 微秒精度
        (timestamp * 1000.0).round() as i64
    }

    fn insert(&mut self, timestamp: f64) {
        self.entries
            .entry(Self::key(timestamp))
            .or_insert((timestamp, 0))
            .1 += 1;
    }

    fn remove(&mut self, timestamp: f64) -> bool {
        let key = Self::key(timestamp);
        match self.entries.get_mut(&key) {
            Some((_, count)) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn values(&self) -> Vec<f64> {
        self.entries
            .values()
            .flat_map(|(ts, count)| std::iter::repeat(*ts).take(*count))
            .collect()
    }
}

/// 统计某类事件的发生率
#[derive(Debug, Default)]
struct RateCounter {
    first: Option<Instant>,
    count: u64,
}

impl RateCounter {
    fn record(&mut self) {
        self.first.get_or_insert_with(Instant::now);
        self.count += 1;
    }

    fn per_second(&self) -> f64 {
        match self.first {
            Some(first) => {
                let elapsed = first.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.count as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

/// 视频管线 - 解码调度、帧缓冲、淘汰与按时间取帧
///
/// 解码输出和转换完成都经由 channel 回到持有管线的任务，
/// 帧缓冲和在途集合只有一个写者。
pub struct VideoPipeline {
    id: u64,
    item_index: usize,
    config: PlayerConfig,
    codecs: Arc<dyn CodecProvider>,
    delegator: Arc<WorkDelegator>,
    state: VideoPipelineState,
    setup_outcome: Option<Result<()>>,

    decoder: Option<BoxedVideoDecoder>,
    decoder_sink: Option<DecoderSink<RawVideoFrame>>,
    decoder_events: DecoderEvents<RawVideoFrame>,
    conversions_tx: mpsc::UnboundedSender<ConversionResult>,
    conversions_rx: mpsc::UnboundedReceiver<ConversionResult>,

    chunks: ChunkQueue<EncodedVideoChunk>,
    last_dts_pushed: f64,
    decoding: TimestampSet,
    converting: TimestampSet,
    /// 到达顺序，读取时按时间戳查找
    frame_buffer: Vec<FrameBufferEntry>,
    highest_decoded: f64,
    frame_duration: Option<f64>,
    fallback_duration: Option<f64>,
    flush_started: bool,
    flush_done: bool,

    last_drawn: Option<f64>,
    dropped_frames: u64,
    decode_rate: RateCounter,
    conversion_rate: RateCounter,
    playback_rate: RateCounter,
}

impl VideoPipeline {
    pub fn new(
        item_index: usize,
        config: PlayerConfig,
        codecs: Arc<dyn CodecProvider>,
        delegator: Arc<WorkDelegator>,
    ) -> Self {
        let (sink, events) = decoder_channel();
        let (conversions_tx, conversions_rx) = mpsc::unbounded_channel();
        Self {
            id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
            item_index,
            config,
            codecs,
            delegator,
            state: VideoPipelineState::Unconfigured,
            setup_outcome: None,
            decoder: None,
            decoder_sink: Some(sink),
            decoder_events: events,
            conversions_tx,
            conversions_rx,
            chunks: ChunkQueue::new(),
            last_dts_pushed: f64::NEG_INFINITY,
            decoding: TimestampSet::default(),
            converting: TimestampSet::default(),
            frame_buffer: Vec::new(),
            highest_decoded: f64::NEG_INFINITY,
            frame_duration: None,
            fallback_duration: None,
            flush_started: false,
            flush_done: false,
            last_drawn: None,
            dropped_frames: 0,
            decode_rate: RateCounter::default(),
            conversion_rate: RateCounter::default(),
            playback_rate: RateCounter::default(),
        }
    }

    pub fn state(&self) -> VideoPipelineState {
        self.state
    }

    /// 配置解码器（重复调用返回首次结果）
    pub async fn setup(
        &mut self,
        config: &VideoDecoderConfig,
        chunks: ChunkQueue<EncodedVideoChunk>,
    ) -> Result<()> {
        if let Some(outcome) = &self.setup_outcome {
            return outcome.as_ref().map(|_| ()).map_err(PlayerError::replay);
        }
        self.state = VideoPipelineState::Configuring;

        let result = self.configure(config, chunks).await;
        match &result {
            Ok(()) => self.state = VideoPipelineState::Ready,
            Err(e) => {
                warn!("[视频][ad {}] 解码器配置失败: {}", self.item_index, e);
                self.state = VideoPipelineState::Unconfigured;
            }
        }
        let replayed = result.as_ref().map(|_| ()).map_err(PlayerError::replay);
        self.setup_outcome = Some(result);
        replayed
    }

    async fn configure(
        &mut self,
        config: &VideoDecoderConfig,
        chunks: ChunkQueue<EncodedVideoChunk>,
    ) -> Result<()> {
        let mut requested = config.clone();
        requested.hardware_acceleration = self.config.hardware_acceleration();
        requested.optimize_for_latency = self.config.optimize_for_latency;

        let support = self.codecs.is_video_config_supported(&requested).await?;
        if !support.supported {
            return Err(PlayerError::ConfigNotSupported(requested.codec));
        }

        let sink = self
            .decoder_sink
            .take()
            .ok_or_else(|| PlayerError::Invariant("视频解码器 sink 已被使用".to_string()))?;
        let mut decoder = self.codecs.create_video_decoder(sink)?;
        decoder.configure(&support.config)?;
        self.decoder = Some(decoder);

        self.fallback_duration = chunks.front().map(|c| c.duration);
        self.chunks = chunks;

        let tx = self.conversions_tx.clone();
        self.delegator.on_completion(Arc::new(move |result| {
            let _ = tx.send(result);
        }));

        info!(
            "✅ [视频][ad {}] 解码器已配置: {} {}x{}, {} 个压缩单元",
            self.item_index,
            support.config.codec,
            support.config.coded_width,
            support.config.coded_height,
            self.chunks.len()
        );
        Ok(())
    }

    /// 按解码顺序提交压缩单元，直到最后提交的 DTS 达到目标
    pub fn schedule_up_to(&mut self, target_dts: f64) -> Result<()> {
        let decoder = self.decoder.as_mut().ok_or(PlayerError::NotConfigured)?;

        while self.last_dts_pushed < target_dts {
            let Some(chunk) = self.chunks.pop_front() else {
                break;
            };
            if chunk.dts < self.last_dts_pushed {
                warn!(
                    "[视频][ad {}] DTS 回退: {:.2} < {:.2}",
                    self.item_index, chunk.dts, self.last_dts_pushed
                );
            }
            if self.config.noisy_logs {
                debug!(
                    "[视频][ad {}] 送入解码器 cts {:.2} dts {:.2}",
                    self.item_index, chunk.timestamp, chunk.dts
                );
            }
            self.last_dts_pushed = self.last_dts_pushed.max(chunk.dts);
            let timestamp = chunk.timestamp;
            self.decoding.insert(timestamp);
            if let Err(e) = decoder.decode(chunk) {
                warn!("[视频][ad {}] 提交解码失败 {:.2}: {}", self.item_index, timestamp, e);
                self.decoding.remove(timestamp);
            }
        }

        if self.chunks.is_empty() && !self.flush_started {
            info!("[视频][ad {}] 压缩单元已全部送出，开始 flush", self.item_index);
            self.flush_started = true;
            self.state = VideoPipelineState::Flushing;
            if let Err(e) = decoder.flush() {
                // 不会再有 Flushed 事件
                warn!("[视频][ad {}] flush 失败: {}", self.item_index, e);
                self.flush_done = true;
            }
        }
        Ok(())
    }

    /// 处理所有已到达的解码输出和转换结果
    pub fn pump(&mut self) -> Result<()> {
        while let Ok(event) = self.decoder_events.try_recv() {
            self.handle_decoder_event(event)?;
        }
        while let Ok(result) = self.conversions_rx.try_recv() {
            self.handle_conversion(result)?;
        }
        Ok(())
    }

    fn invariant(&self, message: String) -> PlayerError {
        error!("❌ [视频][ad {}] {}", self.item_index, message);
        PlayerError::Invariant(message)
    }

    fn handle_decoder_event(&mut self, event: DecoderEvent<RawVideoFrame>) -> Result<()> {
        match event {
            DecoderEvent::Output(frame) => self.handle_decoded_frame(frame),
            DecoderEvent::Flushed => {
                info!("[视频][ad {}] flush 完成", self.item_index);
                self.flush_done = true;
                Ok(())
            }
            DecoderEvent::Error(msg) => {
                warn!("[视频][ad {}] 解码器错误: {}", self.item_index, msg);
                Ok(())
            }
        }
    }

    fn handle_decoded_frame(&mut self, frame: RawVideoFrame) -> Result<()> {
        let timestamp = frame.timestamp;
        if self.config.noisy_logs {
            debug!("[视频][ad {}] 解码输出 {:.2}", self.item_index, timestamp);
        }
        if !self.decoding.remove(timestamp) {
            return Err(self.invariant(format!("解码输出 {:.2} 不在解码中集合内", timestamp)));
        }
        self.decode_rate.record();
        self.highest_decoded = self.highest_decoded.max(timestamp);
        if self.frame_duration.is_none() {
            self.frame_duration = frame.duration.or(self.fallback_duration);
        }

        self.converting.insert(timestamp);
        let job = ConversionJob {
            owner: self.id,
            timestamp,
            frame,
        };
        if let Err(e) = self.delegator.dispatch(job) {
            warn!("[视频][ad {}] 分派转换失败 {:.2}: {}", self.item_index, timestamp, e);
            self.converting.remove(timestamp);
        }
        Ok(())
    }

    fn handle_conversion(&mut self, result: ConversionResult) -> Result<()> {
        if result.owner != self.id {
            debug!(
                "[视频][ad {}] 忽略其他管线的转换结果 (owner {})",
                self.item_index, result.owner
            );
            return Ok(());
        }
        if !self.converting.remove(result.timestamp) {
            return Err(self.invariant(format!(
                "转换结果 {:.2} 不在转换中集合内",
                result.timestamp
            )));
        }
        self.conversion_rate.record();
        match result.outcome {
            Ok(image) => {
                if self.config.noisy_logs {
                    debug!(
                        "[视频][ad {}] 转换完成 {:.2} ({:.1}ms, worker {})",
                        self.item_index, result.timestamp, result.conversion_ms, result.worker
                    );
                }
                self.frame_buffer.push(FrameBufferEntry {
                    timestamp: result.timestamp,
                    image,
                });
            }
            Err(e) => warn!(
                "[视频][ad {}] 帧 {:.2} 转换失败: {}",
                self.item_index, result.timestamp, e
            ),
        }
        Ok(())
    }

    fn prebuffer_reached(&self) -> bool {
        self.highest_decoded >= self.config.prebuffer_target_ms || self.flush_done
    }

    /// 预缓冲到目标时间戳
    ///
    /// 有些解码器攒批输出，宽限期过后看门狗按帧时长继续推送，直到出现目标帧。
    pub async fn prebuffer(&mut self) -> Result<()> {
        let started = Instant::now();
        self.state = VideoPipelineState::Prebuffering;
        info!(
            "[视频][ad {}] 开始预缓冲, 目标 {}ms",
            self.item_index, self.config.prebuffer_target_ms
        );

        self.pump()?;
        self.schedule_up_to(self.config.prebuffer_target_ms)?;

        let grace = Duration::from_millis(self.config.prebuffer_grace_ms);
        let retry = Duration::from_millis(self.config.prebuffer_retry_ms);
        let mut watchdog = tokio::time::interval_at(tokio::time::Instant::now() + grace, retry);
        let deadline = tokio::time::sleep(Duration::from_millis(self.config.prebuffer_timeout_ms));
        tokio::pin!(deadline);

        while !self.prebuffer_reached() {
            tokio::select! {
                event = self.decoder_events.recv() => match event {
                    Some(event) => self.handle_decoder_event(event)?,
                    None => return Err(PlayerError::DecodeError("视频解码器事件通道已关闭".to_string())),
                },
                Some(result) = self.conversions_rx.recv() => self.handle_conversion(result)?,
                _ = watchdog.tick() => {
                    let step = self
                        .frame_duration
                        .or_else(|| self.chunks.front().map(|c| c.duration))
                        .or(self.fallback_duration)
                        .unwrap_or(DEFAULT_FRAME_DURATION_MS);
                    debug!("[视频][ad {}] 预缓冲未完成，继续推送", self.item_index);
                    self.schedule_up_to(self.last_dts_pushed + step)?;
                }
                _ = &mut deadline => {
                    warn!("[视频][ad {}] 预缓冲超时", self.item_index);
                    return Err(PlayerError::PrebufferTimeout(self.config.prebuffer_timeout_ms));
                }
            }
        }

        info!(
            "✅ [视频][ad {}] 预缓冲完成, 耗时 {}ms",
            self.item_index,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// 淘汰落后播放头超过阈值的帧
    fn evict_before(&mut self, current_ms: f64) {
        let Some(frame_duration) = self.frame_duration else {
            return;
        };
        let cutoff = current_ms - frame_duration * self.config.frame_purge_threshold;
        self.frame_buffer.retain(|entry| entry.timestamp >= cutoff);
    }

    /// 时间戳不大于 `time_ms` 的最新帧
    fn find_frame_for_time(&self, time_ms: f64) -> Option<&FrameBufferEntry> {
        self.frame_buffer
            .iter()
            .filter(|entry| entry.timestamp <= time_ms)
            .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
    }

    /// 在给定播放时间呈现一帧，同一帧只画一次
    pub fn render_at(
        &mut self,
        current_ms: f64,
        surface: &mut dyn RenderSurface,
    ) -> Result<RenderOutcome> {
        self.pump()?;
        if matches!(
            self.state,
            VideoPipelineState::Ready | VideoPipelineState::Prebuffering
        ) {
            self.state = VideoPipelineState::Playing;
        }

        self.schedule_up_to(current_ms + self.config.buffer_target_ms)?;
        self.evict_before(current_ms);

        let outcome = match self.find_frame_for_time(current_ms.round()) {
            None => {
                self.dropped_frames += 1;
                if self.config.noisy_logs {
                    debug!("[视频][ad {}] 丢帧 {:.2}", self.item_index, current_ms);
                }
                RenderOutcome::Dropped
            }
            Some(entry) if self.last_drawn == Some(entry.timestamp) => {
                RenderOutcome::AlreadyPresented
            }
            Some(entry) => {
                let timestamp = entry.timestamp;
                match surface.draw(entry) {
                    Ok(()) => {
                        self.last_drawn = Some(timestamp);
                        self.playback_rate.record();
                        RenderOutcome::Presented(timestamp)
                    }
                    Err(e) => {
                        warn!("[视频][ad {}] 绘制失败 {:.2}: {}", self.item_index, timestamp, e);
                        RenderOutcome::DrawFailed
                    }
                }
            }
        };

        if self.is_done_playing() {
            self.state = VideoPipelineState::Done;
        }
        Ok(outcome)
    }

    /// 压缩单元耗尽、帧缓冲为空且 flush 完成
    pub fn is_done_playing(&self) -> bool {
        self.decoder.is_some()
            && self.chunks.is_empty()
            && self.frame_buffer.is_empty()
            && self.flush_done
            && self.converting.is_empty()
    }

    pub fn metrics(&self) -> VideoMetrics {
        let buffered_ms = if self.highest_decoded.is_finite() {
            (self.highest_decoded - self.last_drawn.unwrap_or(0.0)).max(0.0)
        } else {
            0.0
        };
        VideoMetrics {
            source_fps: self.frame_duration.map(|d| 1000.0 / d).unwrap_or(0.0),
            decode_fps: self.decode_rate.per_second(),
            conversion_fps: self.conversion_rate.per_second(),
            playback_fps: self.playback_rate.per_second(),
            dropped_frames: self.dropped_frames,
            buffered_ms,
            encoded_bytes: self.chunks.byte_size(),
            frame_buffer_bytes: self.frame_buffer.iter().map(|e| e.image.byte_size()).sum(),
        }
    }

    pub fn visualization(&self) -> VisualizationSnapshot {
        let mut buffered: Vec<f64> = self.frame_buffer.iter().map(|e| e.timestamp).collect();
        buffered.sort_by(|a, b| a.total_cmp(b));
        VisualizationSnapshot {
            decoding: self.decoding.values(),
            converting: self.converting.values(),
            buffered,
        }
    }

    /// 关闭解码器（可重复调用）
    pub fn close(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
            debug!("[视频][ad {}] 解码器已关闭", self.item_index);
        }
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.close();
    }
}
