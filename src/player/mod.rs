// 播放器核心模块

pub mod audio_output;
pub mod audio_pipeline;
pub mod codec;
pub mod container;
pub mod converter;
pub mod demuxer;
pub mod description;
pub mod fetch;
pub mod manager;
pub mod mp4;
pub mod video_pipeline;
pub mod work_delegator;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_codec;

pub use audio_output::{AudioOutput, AudioOutputProvider, ClockAudioOutputProvider};
pub use audio_pipeline::AudioPipeline;
pub use codec::CodecProvider;
pub use container::ContainerParser;
pub use converter::{Bt709Converter, FrameConverter};
pub use demuxer::{Demuxed, Demuxer};
pub use fetch::{Fetcher, FileFetcher};
pub use manager::{PlaybackManager, PlayerHost};
pub use mp4::IsoBmffParser;
pub use video_pipeline::VideoPipeline;
pub use work_delegator::WorkDelegator;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_codec::FfmpegCodecProvider;
