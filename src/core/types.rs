use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

/// 媒体源类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 远程 URL（由宿主负责下载）
    Remote(String),
}

impl MediaSource {
    /// 从 URL 字符串解析媒体源
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("http://") || url.starts_with("https://") {
            MediaSource::Remote(url.to_string())
        } else {
            // 默认当作本地文件
            MediaSource::LocalFile(PathBuf::from(url))
        }
    }

    pub fn locator(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().to_string(),
            MediaSource::Remote(url) => url.clone(),
        }
    }
}

/// 一条待播放的广告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub source: MediaSource,
}

impl Item {
    pub fn new(locator: &str) -> Self {
        Self {
            source: MediaSource::from_url(locator),
        }
    }
}

/// 压缩数据单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Key,
    Delta,
}

/// 视频压缩单元（时间单位均为毫秒）
#[derive(Debug, Clone)]
pub struct EncodedVideoChunk {
    pub chunk_type: ChunkType,
    /// 显示时间戳（CTS）
    pub timestamp: f64,
    pub duration: f64,
    /// 解码时间戳（DTS），调度按解码顺序推进
    pub dts: f64,
    pub data: Bytes,
}

/// 音频压缩单元
#[derive(Debug, Clone)]
pub struct EncodedAudioChunk {
    pub chunk_type: ChunkType,
    pub timestamp: f64,
    pub duration: f64,
    pub data: Bytes,
}

pub trait EncodedChunk {
    fn byte_length(&self) -> usize;
}

impl EncodedChunk for EncodedVideoChunk {
    fn byte_length(&self) -> usize {
        self.data.len()
    }
}

impl EncodedChunk for EncodedAudioChunk {
    fn byte_length(&self) -> usize {
        self.data.len()
    }
}

/// 按解码顺序排列的压缩单元队列（FIFO，弹出即消费）
#[derive(Debug, Clone)]
pub struct ChunkQueue<T> {
    items: VecDeque<T>,
    bytes: usize,
}

impl<T: EncodedChunk> ChunkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            bytes: 0,
        }
    }

    pub fn push(&mut self, chunk: T) {
        self.bytes += chunk.byte_length();
        self.items.push_back(chunk);
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let chunk = self.items.pop_front()?;
        self.bytes -= chunk.byte_length();
        Some(chunk)
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 尚未送入解码器的压缩字节数
    pub fn byte_size(&self) -> usize {
        self.bytes
    }
}

impl<T: EncodedChunk> Default for ChunkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EncodedChunk> FromIterator<T> for ChunkQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        for chunk in iter {
            queue.push(chunk);
        }
        queue
    }
}

/// 硬件加速偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    NoPreference,
    PreferHardware,
    PreferSoftware,
}

/// 视频解码器配置
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDecoderConfig {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    /// avcC 形式的 extradata
    pub description: Option<Bytes>,
    pub hardware_acceleration: HardwareAcceleration,
    pub optimize_for_latency: bool,
}

/// 音频解码器配置
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDecoderConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub number_of_channels: u16,
    /// AudioSpecificConfig（来自 esds）
    pub description: Option<Bytes>,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    /// 三平面 YUV 4:2:0
    I420,
    NV12,
}

/// 解码器输出的原始视频帧
#[derive(Debug)]
pub struct RawVideoFrame {
    pub timestamp: f64,
    pub duration: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// 紧凑排列的各平面数据
    pub data: Vec<u8>,
}

/// 转换后可直接绘制的 RGBA 图像
#[derive(Debug, Clone)]
pub struct VideoImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoImage {
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// 帧缓冲条目
#[derive(Debug, Clone)]
pub struct FrameBufferEntry {
    pub timestamp: f64,
    pub image: VideoImage,
}

/// 解码后的音频帧（平面 f32）
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub timestamp: f64,
    pub duration: f64,
    pub sample_rate: u32,
    /// 每个声道一个平面
    pub planes: Vec<Vec<f32>>,
}

impl AudioFrame {
    pub fn number_of_frames(&self) -> usize {
        self.planes.first().map(|p| p.len()).unwrap_or(0)
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Stopped,
    PlaybackRequested,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::PlaybackRequested => "playback_requested",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: f64, // 总时长（毫秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 视频管线指标
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMetrics {
    pub source_fps: f64,
    pub decode_fps: f64,
    pub conversion_fps: f64,
    pub playback_fps: f64,
    pub dropped_frames: u64,
    pub buffered_ms: f64,
    pub encoded_bytes: usize,
    pub frame_buffer_bytes: usize,
}

/// 播放器指标快照（供 UI 轮询）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerMetrics {
    pub item_index: Option<usize>,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub source_fps: f64,
    pub decode_fps: f64,
    pub conversion_fps: f64,
    pub playback_fps: f64,
    pub dropped_frames: u64,
    pub buffered_ms: f64,
    pub video_encoded_bytes: usize,
    pub frame_buffer_bytes: usize,
    pub audio_buffer_bytes: usize,
}

/// 可视化快照：各阶段中的时间戳
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualizationSnapshot {
    pub decoding: Vec<f64>,
    pub converting: Vec<f64>,
    pub buffered: Vec<f64>,
}
