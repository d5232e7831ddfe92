//! 测试用的假解码器、假输出和 MP4 构造器

use crate::core::{
    AudioDecoderConfig, AudioFrame, ChunkQueue, ChunkType, EncodedAudioChunk, EncodedVideoChunk,
    FrameBufferEntry, HardwareAcceleration, MediaSource, PixelFormat, PlayerError, RawVideoFrame,
    Result, VideoDecoderConfig,
};
use crate::player::audio_output::{
    AudioBuffer, AudioOutput, AudioOutputProvider, ClockAudioOutput, EndedCallback,
};
use crate::player::codec::{
    BoxedAudioDecoder, BoxedVideoDecoder, CodecProvider, ConfigSupport, DecoderEvent, DecoderSink,
    MediaDecoder,
};
use crate::player::container::{ContainerFile, ContainerParser};
use crate::player::fetch::Fetcher;
use crate::player::mp4::IsoBmffParser;
use crate::renderer::RenderSurface;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// 压缩单元

pub fn video_config() -> VideoDecoderConfig {
    VideoDecoderConfig {
        codec: "avc1.64001f".to_string(),
        coded_width: 2,
        coded_height: 2,
        description: Some(Bytes::from_static(&[1, 0x64, 0, 0x1f, 0xff, 0xe0, 0])),
        hardware_acceleration: HardwareAcceleration::NoPreference,
        optimize_for_latency: false,
    }
}

/// 30fps，无重排
pub fn video_chunks(count: usize) -> ChunkQueue<EncodedVideoChunk> {
    (0..count)
        .map(|i| {
            let ts = (i * 1000) as f64 / 30.0;
            EncodedVideoChunk {
                chunk_type: if i == 0 { ChunkType::Key } else { ChunkType::Delta },
                timestamp: ts,
                duration: 1000.0 / 30.0,
                dts: ts,
                data: Bytes::from(vec![i as u8; 8]),
            }
        })
        .collect()
}

/// 30fps，I P B P B ... 结构：解码顺序与显示顺序不同
///
/// 显示序号依次为 0, 2, 1, 4, 3, ...；DTS 从 -1 帧开始，保证 DTS <= CTS。
/// `count` 为奇数时显示序号正好覆盖 0..count。
pub fn reordered_video_chunks(count: usize) -> ChunkQueue<EncodedVideoChunk> {
    (0..count)
        .map(|i| {
            let display = match i {
                0 => 0,
                i if i % 2 == 1 => i + 1,
                i => i - 1,
            };
            EncodedVideoChunk {
                chunk_type: if i == 0 { ChunkType::Key } else { ChunkType::Delta },
                timestamp: (display * 1000) as f64 / 30.0,
                duration: 1000.0 / 30.0,
                dts: ((i as i64 - 1) * 1000) as f64 / 30.0,
                data: Bytes::from(vec![i as u8; 8]),
            }
        })
        .collect()
}

pub fn audio_config() -> AudioDecoderConfig {
    AudioDecoderConfig {
        codec: "mp4a.40.2".to_string(),
        sample_rate: 48_000,
        number_of_channels: 2,
        description: Some(Bytes::from_static(&[0x11, 0x90])),
    }
}

/// 每个单元 1024 采样 @ 48kHz
pub fn audio_chunks(count: usize) -> ChunkQueue<EncodedAudioChunk> {
    (0..count)
        .map(|i| EncodedAudioChunk {
            chunk_type: ChunkType::Key,
            timestamp: i as f64 * 1024.0 / 48.0,
            duration: 1024.0 / 48.0,
            data: Bytes::from(vec![0x21; 6]),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// 解码器

#[derive(Debug, Default)]
pub struct CodecStats {
    video_created: usize,
    video_closed: usize,
    audio_created: usize,
    audio_closed: usize,
    last_video_config: Option<VideoDecoderConfig>,
    video_submissions: Vec<(f64, f64)>,
}

/// 同步产出帧的假解码能力，克隆共享统计
#[derive(Clone)]
pub struct FakeCodecProvider {
    pub video_supported: bool,
    pub audio_supported: bool,
    /// 解码器攒够这么多单元后才开始输出，按显示顺序（最小时间戳）吐出
    pub video_output_lag: usize,
    /// 视频解码器既不输出帧也不报告 flush 完成
    pub video_silent: bool,
    /// 音频解码器对每个单元报错
    pub audio_error: bool,
    pub stats: Arc<Mutex<CodecStats>>,
}

impl Default for FakeCodecProvider {
    fn default() -> Self {
        Self {
            video_supported: true,
            audio_supported: true,
            video_output_lag: 0,
            video_silent: false,
            audio_error: false,
            stats: Arc::new(Mutex::new(CodecStats::default())),
        }
    }
}

impl FakeCodecProvider {
    pub fn video_decoders_created(&self) -> usize {
        self.stats.lock().video_created
    }

    pub fn video_decoders_closed(&self) -> usize {
        self.stats.lock().video_closed
    }

    pub fn last_video_config(&self) -> Option<VideoDecoderConfig> {
        self.stats.lock().last_video_config.clone()
    }

    /// 按提交顺序的 (timestamp, dts)
    pub fn video_submissions(&self) -> Vec<(f64, f64)> {
        self.stats.lock().video_submissions.clone()
    }

    pub fn audio_decoders_created(&self) -> usize {
        self.stats.lock().audio_created
    }

    pub fn audio_decoders_closed(&self) -> usize {
        self.stats.lock().audio_closed
    }
}

#[async_trait]
impl CodecProvider for FakeCodecProvider {
    async fn is_video_config_supported(
        &self,
        config: &VideoDecoderConfig,
    ) -> Result<ConfigSupport<VideoDecoderConfig>> {
        Ok(ConfigSupport {
            supported: self.video_supported,
            config: config.clone(),
        })
    }

    async fn is_audio_config_supported(
        &self,
        config: &AudioDecoderConfig,
    ) -> Result<ConfigSupport<AudioDecoderConfig>> {
        Ok(ConfigSupport {
            supported: self.audio_supported,
            config: config.clone(),
        })
    }

    fn create_video_decoder(&self, sink: DecoderSink<RawVideoFrame>) -> Result<BoxedVideoDecoder> {
        self.stats.lock().video_created += 1;
        Ok(Box::new(FakeVideoDecoder {
            sink,
            lag: self.video_output_lag,
            silent: self.video_silent,
            pending: Vec::new(),
            stats: self.stats.clone(),
            closed: false,
        }))
    }

    fn create_audio_decoder(&self, sink: DecoderSink<AudioFrame>) -> Result<BoxedAudioDecoder> {
        self.stats.lock().audio_created += 1;
        Ok(Box::new(FakeAudioDecoder {
            sink,
            error: self.audio_error,
            stats: self.stats.clone(),
            closed: false,
        }))
    }
}

struct FakeVideoDecoder {
    sink: DecoderSink<RawVideoFrame>,
    lag: usize,
    silent: bool,
    pending: Vec<(f64, f64)>,
    stats: Arc<Mutex<CodecStats>>,
    closed: bool,
}

impl FakeVideoDecoder {
    fn emit_earliest(&mut self) {
        let Some(index) = self
            .pending
            .iter()
            .enumerate()
            .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
            .map(|(index, _)| index)
        else {
            return;
        };
        let (timestamp, duration) = self.pending.remove(index);
        self.emit(timestamp, duration);
    }

    fn emit(&self, timestamp: f64, duration: f64) {
        let frame = RawVideoFrame {
            timestamp,
            duration: Some(duration),
            width: 2,
            height: 2,
            format: PixelFormat::I420,
            data: vec![128; 6],
        };
        let _ = self.sink.send(DecoderEvent::Output(frame));
    }
}

impl MediaDecoder<VideoDecoderConfig, EncodedVideoChunk> for FakeVideoDecoder {
    fn configure(&mut self, config: &VideoDecoderConfig) -> Result<()> {
        self.stats.lock().last_video_config = Some(config.clone());
        Ok(())
    }

    fn decode(&mut self, unit: EncodedVideoChunk) -> Result<()> {
        if self.closed {
            return Err(PlayerError::DecodeError("解码器已关闭".to_string()));
        }
        self.stats
            .lock()
            .video_submissions
            .push((unit.timestamp, unit.dts));
        if self.silent {
            return Ok(());
        }
        self.pending.push((unit.timestamp, unit.duration));
        while self.pending.len() > self.lag {
            self.emit_earliest();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.silent {
            return Ok(());
        }
        while !self.pending.is_empty() {
            self.emit_earliest();
        }
        let _ = self.sink.send(DecoderEvent::Flushed);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.lock().video_closed += 1;
        }
    }
}

struct FakeAudioDecoder {
    sink: DecoderSink<AudioFrame>,
    error: bool,
    stats: Arc<Mutex<CodecStats>>,
    closed: bool,
}

impl MediaDecoder<AudioDecoderConfig, EncodedAudioChunk> for FakeAudioDecoder {
    fn configure(&mut self, _config: &AudioDecoderConfig) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, unit: EncodedAudioChunk) -> Result<()> {
        if self.error {
            let _ = self
                .sink
                .send(DecoderEvent::Error(format!("坏数据 @ {:.2}", unit.timestamp)));
            return Ok(());
        }
        let samples = (unit.duration * 48.0).round() as usize;
        let frame = AudioFrame {
            timestamp: unit.timestamp,
            duration: unit.duration,
            sample_rate: 48_000,
            planes: vec![vec![0.1; samples], vec![-0.1; samples]],
        };
        let _ = self.sink.send(DecoderEvent::Output(frame));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let _ = self.sink.send(DecoderEvent::Flushed);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.lock().audio_closed += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// 音频输出

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutputCounts {
    pub starts: usize,
    pub resumes: usize,
    pub suspends: usize,
    pub closes: usize,
}

#[derive(Default)]
struct OutputStats {
    counts: OutputCounts,
    loaded_lengths: Vec<usize>,
}

/// 记录调用次数的静音输出
#[derive(Clone, Default)]
pub struct FakeAudioOutputProvider {
    stats: Arc<Mutex<OutputStats>>,
}

impl FakeAudioOutputProvider {
    pub fn counts(&self) -> OutputCounts {
        self.stats.lock().counts
    }

    pub fn loaded_lengths(&self) -> Vec<usize> {
        self.stats.lock().loaded_lengths.clone()
    }
}

impl AudioOutputProvider for FakeAudioOutputProvider {
    fn create(&self, _sample_rate: u32, _channels: u16) -> Result<Arc<dyn AudioOutput>> {
        Ok(Arc::new(FakeAudioOutput {
            clock: ClockAudioOutput::new(),
            stats: self.stats.clone(),
        }))
    }
}

struct FakeAudioOutput {
    clock: ClockAudioOutput,
    stats: Arc<Mutex<OutputStats>>,
}

#[async_trait]
impl AudioOutput for FakeAudioOutput {
    fn load(&self, buffer: Arc<AudioBuffer>, on_ended: EndedCallback) -> Result<()> {
        self.stats.lock().loaded_lengths.push(buffer.length());
        self.clock.load(buffer, on_ended)
    }

    fn start(&self) -> Result<()> {
        self.stats.lock().counts.starts += 1;
        self.clock.start()
    }

    async fn resume(&self) -> Result<()> {
        self.stats.lock().counts.resumes += 1;
        // 真实设备的恢复需要一点时间
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.clock.resume().await
    }

    async fn suspend(&self) -> Result<()> {
        self.stats.lock().counts.suspends += 1;
        self.clock.suspend().await
    }

    async fn close(&self) -> Result<()> {
        self.stats.lock().counts.closes += 1;
        self.clock.close().await
    }

    fn current_time(&self) -> f64 {
        self.clock.current_time()
    }
}

// ---------------------------------------------------------------------------
// 渲染

#[derive(Default)]
struct SurfaceLog {
    drawn: Vec<f64>,
}

/// 记录绘制过的时间戳，克隆共享记录
#[derive(Clone, Default)]
pub struct RecordingSurface {
    log: Arc<Mutex<SurfaceLog>>,
    fail: bool,
}

impl RecordingSurface {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn drawn(&self) -> Vec<f64> {
        self.log.lock().drawn.clone()
    }
}

impl RenderSurface for RecordingSurface {
    fn draw(&mut self, frame: &FrameBufferEntry) -> Result<()> {
        if self.fail {
            return Err(PlayerError::Other("表面不可用".to_string()));
        }
        self.log.lock().drawn.push(frame.timestamp);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 获取与解封装

/// 从内存表中返回文件内容，并记录事件顺序
#[derive(Clone)]
pub struct RecordingFetcher {
    files: Arc<HashMap<String, Bytes>>,
    fetched: Arc<Mutex<Vec<String>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingFetcher {
    pub fn new(files: Vec<(&str, Bytes)>) -> Self {
        Self {
            files: Arc::new(
                files
                    .into_iter()
                    .map(|(name, data)| (name.to_string(), data))
                    .collect(),
            ),
            fetched: Arc::new(Mutex::new(Vec::new())),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }

    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, source: &MediaSource) -> Result<Bytes> {
        let locator = source.locator();
        self.fetched.lock().push(locator.clone());
        self.log.lock().push(format!("fetch-start {}", locator));
        tokio::task::yield_now().await;
        let result = self
            .files
            .get(&locator)
            .cloned()
            .ok_or_else(|| PlayerError::UnsupportedSource(locator.clone()));
        self.log.lock().push(format!("fetch-end {}", locator));
        result
    }
}

/// 第一次解析要等到指定文件开始获取后才返回
pub struct GatedParser {
    inner: IsoBmffParser,
    log: Arc<Mutex<Vec<String>>>,
    gate: String,
    opened: AtomicUsize,
}

impl GatedParser {
    pub fn new(log: Arc<Mutex<Vec<String>>>, gate_locator: &str) -> Self {
        Self {
            inner: IsoBmffParser,
            log,
            gate: format!("fetch-start {}", gate_locator),
            opened: AtomicUsize::new(0),
        }
    }
}

impl ContainerParser for GatedParser {
    fn open(&self, data: Bytes) -> Result<Box<dyn ContainerFile>> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!("demux-start {}", n));
        if n == 0 {
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline && !self.log.lock().iter().any(|e| *e == self.gate) {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        let file = self.inner.open(data);
        self.log.lock().push(format!("demux-end {}", n));
        file
    }
}

// ---------------------------------------------------------------------------
// MP4 构造器

const VIDEO_TIMESCALE: u32 = 90_000;
const VIDEO_DELTA: u32 = 3_000;
const AUDIO_TIMESCALE: u32 = 48_000;
const AUDIO_DELTA: u32 = 1_024;
const B_FRAME_OFFSETS: [u32; 4] = [6_000, 9_000, 3_000, 6_000];

/// 生成最小可解析的 MP4：H.264 640x360 视频轨（id 1）+ AAC 立体声音频轨（id 2）
///
/// 帧数为 0 的轨道不写入。
#[derive(Debug, Clone)]
pub struct Mp4Builder {
    video_frames: usize,
    audio_frames: usize,
    b_frames: bool,
    avcc: bool,
}

impl Default for Mp4Builder {
    fn default() -> Self {
        Self {
            video_frames: 6,
            audio_frames: 4,
            b_frames: false,
            avcc: true,
        }
    }
}

fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(8 + body.len());
    out.put_u32(8 + body.len() as u32);
    out.put_slice(kind);
    out.put_slice(body);
    out.to_vec()
}

fn full_box(kind: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
    let mut content = vec![version, 0, 0, 0];
    content.extend_from_slice(body);
    mp4_box(kind, &content)
}

fn container(kind: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    mp4_box(kind, &children.concat())
}

struct TrackLayout {
    id: u32,
    handler: [u8; 4],
    timescale: u32,
    delta: u32,
    sample_entry: Vec<u8>,
    sizes: Vec<u32>,
    chunk_offset: u32,
    sync_samples: Option<Vec<u32>>,
    composition_offsets: Option<Vec<u32>>,
}

impl Mp4Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video_frames(mut self, count: usize) -> Self {
        self.video_frames = count;
        self
    }

    pub fn audio_frames(mut self, count: usize) -> Self {
        self.audio_frames = count;
        self
    }

    pub fn with_b_frames(mut self) -> Self {
        self.b_frames = true;
        self
    }

    pub fn without_avcc(mut self) -> Self {
        self.avcc = false;
        self
    }

    pub fn video_payload(index: usize) -> Vec<u8> {
        let nal_type = if index == 0 { 0x65 } else { 0x41 };
        let mut payload = vec![0, 0, 0, 12, nal_type];
        payload.extend(std::iter::repeat((index % 256) as u8).take(11));
        payload
    }

    fn audio_payload(index: usize) -> Vec<u8> {
        vec![0x21, (index % 256) as u8, 0, 0, 0, 0, 0, 0]
    }

    pub fn build(&self) -> Bytes {
        let ftyp = mp4_box(b"ftyp", b"isom\x00\x00\x02\x00isomavc1mp41");

        let video: Vec<Vec<u8>> = (0..self.video_frames).map(Self::video_payload).collect();
        let audio: Vec<Vec<u8>> = (0..self.audio_frames).map(Self::audio_payload).collect();
        let video_size: usize = video.iter().map(|p| p.len()).sum();
        let mdat = mp4_box(b"mdat", &[video.concat(), audio.concat()].concat());

        let data_start = (ftyp.len() + 8) as u32;
        let mut traks = Vec::new();
        if self.video_frames > 0 {
            traks.push(trak(&TrackLayout {
                id: 1,
                handler: *b"vide",
                timescale: VIDEO_TIMESCALE,
                delta: VIDEO_DELTA,
                sample_entry: self.avc1_entry(),
                sizes: video.iter().map(|p| p.len() as u32).collect(),
                chunk_offset: data_start,
                sync_samples: Some(vec![1]),
                composition_offsets: self.b_frames.then(|| {
                    (0..self.video_frames)
                        .map(|i| B_FRAME_OFFSETS[i % B_FRAME_OFFSETS.len()])
                        .collect()
                }),
            }));
        }
        if self.audio_frames > 0 {
            traks.push(trak(&TrackLayout {
                id: 2,
                handler: *b"soun",
                timescale: AUDIO_TIMESCALE,
                delta: AUDIO_DELTA,
                sample_entry: mp4a_entry(),
                sizes: audio.iter().map(|p| p.len() as u32).collect(),
                chunk_offset: data_start + video_size as u32,
                sync_samples: None,
                composition_offsets: None,
            }));
        }

        let mut mvhd = vec![0u8; 8];
        mvhd.extend_from_slice(&1000u32.to_be_bytes());
        mvhd.extend_from_slice(&0u32.to_be_bytes());
        let mut moov_children = vec![full_box(b"mvhd", 0, &mvhd)];
        moov_children.extend(traks);
        let moov = container(b"moov", &moov_children);

        Bytes::from([ftyp, mdat, moov].concat())
    }

    fn avc1_entry(&self) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_slice(&[0; 6]);
        body.put_u16(1); // data_reference_index
        body.put_slice(&[0; 16]);
        body.put_u16(640);
        body.put_u16(360);
        body.put_u32(0x0048_0000);
        body.put_u32(0x0048_0000);
        body.put_u32(0);
        body.put_u16(1); // frame_count
        body.put_slice(&[0; 32]);
        body.put_u16(0x0018);
        body.put_i16(-1);
        if self.avcc {
            let sps = [0x67, 0x64, 0x00, 0x1f, 0xac, 0xd9];
            let pps = [0x68, 0xeb, 0xe3, 0xcb];
            let mut avcc = vec![1, 0x64, 0x00, 0x1f, 0xff, 0xe1];
            avcc.extend_from_slice(&(sps.len() as u16).to_be_bytes());
            avcc.extend_from_slice(&sps);
            avcc.push(1);
            avcc.extend_from_slice(&(pps.len() as u16).to_be_bytes());
            avcc.extend_from_slice(&pps);
            body.put_slice(&mp4_box(b"avcC", &avcc));
        }
        mp4_box(b"avc1", &body)
    }
}

fn mp4a_entry() -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_slice(&[0; 6]);
    body.put_u16(1);
    body.put_u16(0); // version
    body.put_slice(&[0; 6]);
    body.put_u16(2); // channel_count
    body.put_u16(16);
    body.put_u16(0);
    body.put_u16(0);
    body.put_u32(48_000 << 16);

    let asc = [0x11, 0x90];
    let mut decoder_config = vec![0x40, 0x15, 0, 0, 0];
    decoder_config.extend_from_slice(&128_000u32.to_be_bytes());
    decoder_config.extend_from_slice(&128_000u32.to_be_bytes());
    decoder_config.extend_from_slice(&[0x05, asc.len() as u8]);
    decoder_config.extend_from_slice(&asc);

    let mut es = vec![0, 2, 0]; // ES_ID + flags
    es.push(0x04);
    es.push(decoder_config.len() as u8);
    es.extend_from_slice(&decoder_config);

    let mut descriptor = vec![0x03, es.len() as u8];
    descriptor.extend_from_slice(&es);
    body.put_slice(&full_box(b"esds", 0, &descriptor));
    mp4_box(b"mp4a", &body)
}

fn u32_table(values: &[u32]) -> Vec<u8> {
    let mut out = (values.len() as u32).to_be_bytes().to_vec();
    for v in values {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out
}

fn trak(layout: &TrackLayout) -> Vec<u8> {
    let count = layout.sizes.len() as u32;

    let mut tkhd = vec![0u8; 8];
    tkhd.extend_from_slice(&layout.id.to_be_bytes());
    tkhd.extend_from_slice(&[0; 8]);

    let mut mdhd = vec![0u8; 8];
    mdhd.extend_from_slice(&layout.timescale.to_be_bytes());
    mdhd.extend_from_slice(&(count * layout.delta).to_be_bytes());
    mdhd.extend_from_slice(&[0x55, 0xc4, 0, 0]);

    let mut hdlr = vec![0u8; 4];
    hdlr.extend_from_slice(&layout.handler);
    hdlr.extend_from_slice(&[0; 13]);

    let mut stsd = 1u32.to_be_bytes().to_vec();
    stsd.extend_from_slice(&layout.sample_entry);

    let mut stts = 1u32.to_be_bytes().to_vec();
    stts.extend_from_slice(&count.to_be_bytes());
    stts.extend_from_slice(&layout.delta.to_be_bytes());

    let mut stbl = vec![full_box(b"stsd", 0, &stsd), full_box(b"stts", 0, &stts)];
    if let Some(offsets) = &layout.composition_offsets {
        let mut ctts = (offsets.len() as u32).to_be_bytes().to_vec();
        for offset in offsets {
            ctts.extend_from_slice(&1u32.to_be_bytes());
            ctts.extend_from_slice(&offset.to_be_bytes());
        }
        stbl.push(full_box(b"ctts", 0, &ctts));
    }
    if let Some(sync) = &layout.sync_samples {
        stbl.push(full_box(b"stss", 0, &u32_table(sync)));
    }
    let mut stsz = 0u32.to_be_bytes().to_vec();
    stsz.extend_from_slice(&u32_table(&layout.sizes));
    stbl.push(full_box(b"stsz", 0, &stsz));

    let mut stsc = 1u32.to_be_bytes().to_vec();
    stsc.extend_from_slice(&[1u32, count, 1].map(u32::to_be_bytes).concat());
    stbl.push(full_box(b"stsc", 0, &stsc));
    stbl.push(full_box(b"stco", 0, &u32_table(&[layout.chunk_offset])));

    let minf = container(b"minf", &[container(b"stbl", &stbl)]);
    let mdia = container(
        b"mdia",
        &[full_box(b"mdhd", 0, &mdhd), full_box(b"hdlr", 0, &hdlr), minf],
    );
    container(b"trak", &[full_box(b"tkhd", 0, &tkhd), mdia])
}
