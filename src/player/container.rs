use crate::core::Result;
use crate::player::description::AvcDecoderConfigurationRecord;
use bytes::Bytes;

/// 轨道类型及其专有参数
#[derive(Debug, Clone, PartialEq)]
pub enum TrackKind {
    Video { width: u32, height: u32 },
    Audio { sample_rate: u32, channel_count: u16 },
    Other,
}

/// 轨道元数据
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub id: u32,
    pub codec: String,
    pub kind: TrackKind,
    pub timescale: u32,
    /// 以 timescale 计的轨道时长
    pub duration: u64,
    pub sample_count: usize,
}

impl TrackInfo {
    pub fn is_video(&self) -> bool {
        matches!(self.kind, TrackKind::Video { .. })
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, TrackKind::Audio { .. })
    }
}

/// 容器整体信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    pub tracks: Vec<TrackInfo>,
}

impl ContainerInfo {
    pub fn video_tracks(&self) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.iter().filter(|t| t.is_video())
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.iter().filter(|t| t.is_audio())
    }
}

/// 容器中的一个样本
#[derive(Debug, Clone)]
pub struct Sample {
    pub cts: u64,
    pub dts: u64,
    pub duration: u32,
    pub timescale: u32,
    pub is_sync: bool,
    pub data: Bytes,
}

/// 已打开的容器文件
///
/// 调用 `set_extraction_options` 选择轨道后，反复调用 `next_samples`
/// 按批次取出样本，直到返回 `None`。
pub trait ContainerFile: Send {
    fn info(&self) -> &ContainerInfo;

    /// 视频轨道的 avcC 配置
    fn avc_config(&self, track_id: u32) -> Option<&AvcDecoderConfigurationRecord>;

    /// 音频轨道的 AudioSpecificConfig
    fn audio_specific_config(&self, track_id: u32) -> Option<Bytes>;

    fn set_extraction_options(&mut self, track_id: u32, samples_per_batch: usize);

    fn next_samples(&mut self) -> Result<Option<(u32, Vec<Sample>)>>;
}

/// 容器解析库
pub trait ContainerParser: Send + Sync {
    fn open(&self, data: Bytes) -> Result<Box<dyn ContainerFile>>;
}
