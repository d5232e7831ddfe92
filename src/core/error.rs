use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("无效配置: {0}")]
    Config(String),

    #[error("不支持的媒体源: {0}")]
    UnsupportedSource(String),

    #[error("容器解析错误: {0}")]
    Container(String),

    #[error("缺少{0}轨道")]
    MissingTrack(&'static str),

    #[error("未找到 avcC 配置盒，无法生成 description")]
    NoConfigurationBox,

    #[error("description 预留大小 {expected} 字节与实际写入 {actual} 字节不一致")]
    DescriptionSizeMismatch { expected: usize, actual: usize },

    #[error("解码器不支持该配置: {0}")]
    ConfigNotSupported(String),

    #[error("解码器尚未配置")]
    NotConfigured,

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("渲染错误: {0}")]
    RenderError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("预缓冲超时（{0}ms）")]
    PrebufferTimeout(u64),

    #[error("内部状态不一致: {0}")]
    Invariant(String),

    #[error("其他错误: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

impl PlayerError {
    /// 复制一份错误，用于重复返回缓存的结果
    pub fn replay(&self) -> PlayerError {
        match self {
            PlayerError::Config(s) => PlayerError::Config(s.clone()),
            PlayerError::UnsupportedSource(s) => PlayerError::UnsupportedSource(s.clone()),
            PlayerError::Container(s) => PlayerError::Container(s.clone()),
            PlayerError::MissingTrack(kind) => PlayerError::MissingTrack(*kind),
            PlayerError::NoConfigurationBox => PlayerError::NoConfigurationBox,
            PlayerError::DescriptionSizeMismatch { expected, actual } => {
                PlayerError::DescriptionSizeMismatch {
                    expected: *expected,
                    actual: *actual,
                }
            }
            PlayerError::ConfigNotSupported(s) => PlayerError::ConfigNotSupported(s.clone()),
            PlayerError::NotConfigured => PlayerError::NotConfigured,
            PlayerError::DecodeError(s) => PlayerError::DecodeError(s.clone()),
            PlayerError::RenderError(s) => PlayerError::RenderError(s.clone()),
            PlayerError::AudioError(s) => PlayerError::AudioError(s.clone()),
            PlayerError::PrebufferTimeout(ms) => PlayerError::PrebufferTimeout(*ms),
            PlayerError::Invariant(s) => PlayerError::Invariant(s.clone()),
            PlayerError::Other(s) => PlayerError::Other(s.clone()),
            other => PlayerError::Other(other.to_string()),
        }
    }
}
