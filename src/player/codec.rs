use crate::core::{
    AudioDecoderConfig, AudioFrame, EncodedAudioChunk, EncodedVideoChunk, RawVideoFrame, Result,
    VideoDecoderConfig,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// 解码器通过 sink 异步上报的事件
#[derive(Debug)]
pub enum DecoderEvent<T> {
    Output(T),
    /// flush 完成，之后不会再有输出
    Flushed,
    /// 运行时解码错误
    Error(String),
}

pub type DecoderSink<T> = mpsc::UnboundedSender<DecoderEvent<T>>;
pub type DecoderEvents<T> = mpsc::UnboundedReceiver<DecoderEvent<T>>;

/// 配置支持查询结果，`config` 为解码器归一化后的配置
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSupport<C> {
    pub supported: bool,
    pub config: C,
}

/// 平台解码器
///
/// `decode` 只负责提交，输出通过创建时传入的 sink 送回；
/// `flush` 提交后以 `DecoderEvent::Flushed` 表示完成。
pub trait MediaDecoder<C, U>: Send {
    fn configure(&mut self, config: &C) -> Result<()>;

    fn decode(&mut self, unit: U) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn close(&mut self);
}

pub type BoxedVideoDecoder = Box<dyn MediaDecoder<VideoDecoderConfig, EncodedVideoChunk>>;
pub type BoxedAudioDecoder = Box<dyn MediaDecoder<AudioDecoderConfig, EncodedAudioChunk>>;

/// 解码能力提供方
#[async_trait]
pub trait CodecProvider: Send + Sync {
    async fn is_video_config_supported(
        &self,
        config: &VideoDecoderConfig,
    ) -> Result<ConfigSupport<VideoDecoderConfig>>;

    async fn is_audio_config_supported(
        &self,
        config: &AudioDecoderConfig,
    ) -> Result<ConfigSupport<AudioDecoderConfig>>;

    fn create_video_decoder(&self, sink: DecoderSink<RawVideoFrame>) -> Result<BoxedVideoDecoder>;

    fn create_audio_decoder(&self, sink: DecoderSink<AudioFrame>) -> Result<BoxedAudioDecoder>;
}

pub fn decoder_channel<T>() -> (DecoderSink<T>, DecoderEvents<T>) {
    mpsc::unbounded_channel()
}
