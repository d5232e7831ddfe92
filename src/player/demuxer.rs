use crate::core::{
    AudioDecoderConfig, ChunkQueue, ChunkType, EncodedAudioChunk, EncodedVideoChunk,
    HardwareAcceleration, MediaInfo, MediaSource, PlayerError, Result, VideoDecoderConfig,
};
use crate::player::container::{ContainerFile, ContainerParser, Sample, TrackInfo, TrackKind};
use crate::player::fetch::Fetcher;
use bytes::Bytes;
use log::{debug, info};
use std::sync::Arc;

/// 解封装结果：两条轨道的解码配置和按解码顺序排列的压缩单元
#[derive(Debug)]
pub struct Demuxed {
    pub media_info: MediaInfo,
    pub video_config: VideoDecoderConfig,
    pub audio_config: AudioDecoderConfig,
    pub video_chunks: ChunkQueue<EncodedVideoChunk>,
    pub audio_chunks: ChunkQueue<EncodedAudioChunk>,
}

/// 解封装器 - 把容器字节拆成音视频压缩单元
#[derive(Clone)]
pub struct Demuxer {
    parser: Arc<dyn ContainerParser>,
    samples_per_batch: usize,
}

fn to_ms(value: u64, timescale: u32) -> f64 {
    1000.0 * value as f64 / timescale as f64
}

impl Demuxer {
    pub fn new(parser: Arc<dyn ContainerParser>, samples_per_batch: usize) -> Self {
        Self {
            parser,
            samples_per_batch: samples_per_batch.max(1),
        }
    }

    /// 获取并解封装，只返回媒体信息；不需要解码器
    pub async fn inspect(&self, fetcher: &dyn Fetcher, source: &MediaSource) -> Result<MediaInfo> {
        let data = fetcher.fetch(source).await?;
        let worker = self.clone();
        let demuxed = tokio::task::spawn_blocking(move || worker.demux(data))
            .await
            .map_err(|e| PlayerError::Other(format!("解封装任务失败: {}", e)))??;
        Ok(demuxed.media_info)
    }

    /// 解析整个文件（阻塞调用，由上层放到 blocking 线程池）
    pub fn demux(&self, data: Bytes) -> Result<Demuxed> {
        info!("正在解封装: {} 字节", data.len());
        let mut file = self.parser.open(data)?;

        let video_track = single_track(file.info().video_tracks().collect(), "video")?;
        let audio_track = single_track(file.info().audio_tracks().collect(), "audio")?;

        let video_config = video_config(file.as_ref(), &video_track)?;
        let audio_config = audio_config(file.as_ref(), &audio_track);
        let media_info = media_info(&video_track, &audio_track, &video_config, &audio_config);

        file.set_extraction_options(video_track.id, self.samples_per_batch);
        file.set_extraction_options(audio_track.id, self.samples_per_batch);

        let mut video_chunks = ChunkQueue::new();
        let mut audio_chunks = ChunkQueue::new();
        while let Some((track_id, samples)) = file.next_samples()? {
            if track_id == video_track.id {
                samples
                    .iter()
                    .map(to_video_chunk)
                    .for_each(|c| video_chunks.push(c));
            } else if track_id == audio_track.id {
                samples
                    .iter()
                    .map(to_audio_chunk)
                    .for_each(|c| audio_chunks.push(c));
            }
        }

        info!(
            "✅ 解封装完成: {} {}x{} {} 个视频单元, {} {}Hz {} 个音频单元",
            video_config.codec,
            video_config.coded_width,
            video_config.coded_height,
            video_chunks.len(),
            audio_config.codec,
            audio_config.sample_rate,
            audio_chunks.len()
        );

        Ok(Demuxed {
            media_info,
            video_config,
            audio_config,
            video_chunks,
            audio_chunks,
        })
    }
}

fn single_track(tracks: Vec<&TrackInfo>, kind: &'static str) -> Result<TrackInfo> {
    match tracks.as_slice() {
        [track] => Ok((*track).clone()),
        other => {
            debug!("{} 轨道数量: {}", kind, other.len());
            Err(PlayerError::MissingTrack(kind))
        }
    }
}

fn video_config(file: &dyn ContainerFile, track: &TrackInfo) -> Result<VideoDecoderConfig> {
    let record = file
        .avc_config(track.id)
        .ok_or(PlayerError::NoConfigurationBox)?;
    let (coded_width, coded_height) = match track.kind {
        TrackKind::Video { width, height } => (width, height),
        _ => (0, 0),
    };
    Ok(VideoDecoderConfig {
        codec: track.codec.clone(),
        coded_width,
        coded_height,
        description: Some(record.to_description()?),
        // 由视频管线按配置覆盖
        hardware_acceleration: HardwareAcceleration::NoPreference,
        optimize_for_latency: false,
    })
}

fn audio_config(file: &dyn ContainerFile, track: &TrackInfo) -> AudioDecoderConfig {
    let (sample_rate, number_of_channels) = match track.kind {
        TrackKind::Audio {
            sample_rate,
            channel_count,
        } => (sample_rate, channel_count),
        _ => (0, 0),
    };
    AudioDecoderConfig {
        codec: track.codec.clone(),
        sample_rate,
        number_of_channels,
        description: file.audio_specific_config(track.id),
    }
}

fn media_info(
    video: &TrackInfo,
    audio: &TrackInfo,
    video_config: &VideoDecoderConfig,
    audio_config: &AudioDecoderConfig,
) -> MediaInfo {
    let video_ms = to_ms(video.duration, video.timescale);
    let audio_ms = to_ms(audio.duration, audio.timescale);
    let fps = if video_ms > 0.0 {
        video.sample_count as f64 * 1000.0 / video_ms
    } else {
        0.0
    };
    MediaInfo {
        duration: video_ms.max(audio_ms),
        width: video_config.coded_width,
        height: video_config.coded_height,
        fps,
        video_codec: video_config.codec.clone(),
        audio_codec: audio_config.codec.clone(),
        sample_rate: audio_config.sample_rate,
        channels: audio_config.number_of_channels,
    }
}

fn chunk_type(sample: &Sample) -> ChunkType {
    if sample.is_sync {
        ChunkType::Key
    } else {
        ChunkType::Delta
    }
}

fn to_video_chunk(sample: &Sample) -> EncodedVideoChunk {
    EncodedVideoChunk {
        chunk_type: chunk_type(sample),
        timestamp: to_ms(sample.cts, sample.timescale),
        duration: to_ms(sample.duration as u64, sample.timescale),
        dts: to_ms(sample.dts, sample.timescale),
        data: sample.data.clone(),
    }
}

fn to_audio_chunk(sample: &Sample) -> EncodedAudioChunk {
    EncodedAudioChunk {
        chunk_type: chunk_type(sample),
        timestamp: to_ms(sample.cts, sample.timescale),
        duration: to_ms(sample.duration as u64, sample.timescale),
        data: sample.data.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::mp4::IsoBmffParser;
    use crate::testing::{Mp4Builder, RecordingFetcher};

    fn demuxer() -> Demuxer {
        Demuxer::new(Arc::new(IsoBmffParser), 2)
    }

    #[test]
    fn test_demux_both_tracks() {
        let data = Mp4Builder::new().video_frames(6).audio_frames(4).build();
        let demuxed = demuxer().demux(data).unwrap();

        assert_eq!(demuxed.video_config.codec, "avc1.64001f");
        assert_eq!(demuxed.video_config.coded_width, 640);
        assert!(demuxed.video_config.description.is_some());
        assert_eq!(demuxed.audio_config.codec, "mp4a.40.2");
        assert_eq!(demuxed.audio_config.sample_rate, 48_000);
        assert_eq!(demuxed.audio_config.number_of_channels, 2);
        assert_eq!(demuxed.video_chunks.len(), 6);
        assert_eq!(demuxed.audio_chunks.len(), 4);
        assert!((demuxed.media_info.fps - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_video_units_scaled_to_ms() {
        let data = Mp4Builder::new().video_frames(3).audio_frames(1).build();
        let mut demuxed = demuxer().demux(data).unwrap();

        let first = demuxed.video_chunks.pop_front().unwrap();
        assert_eq!(first.chunk_type, ChunkType::Key);
        assert_eq!(first.timestamp, 0.0);
        assert!((first.duration - 100.0 / 3.0).abs() < 1e-9);

        let second = demuxed.video_chunks.pop_front().unwrap();
        assert_eq!(second.chunk_type, ChunkType::Delta);
        assert!((second.dts - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(second.data.as_ref(), Mp4Builder::video_payload(1).as_slice());

        let audio = demuxed.audio_chunks.pop_front().unwrap();
        assert_eq!(audio.chunk_type, ChunkType::Key);
        assert!((audio.duration - 1024.0 / 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_audio_track() {
        let data = Mp4Builder::new().video_frames(2).audio_frames(0).build();
        let err = demuxer().demux(data).unwrap_err();
        assert!(matches!(err, PlayerError::MissingTrack("audio")));
    }

    #[test]
    fn test_missing_video_track() {
        let data = Mp4Builder::new().video_frames(0).audio_frames(2).build();
        let err = demuxer().demux(data).unwrap_err();
        assert!(matches!(err, PlayerError::MissingTrack("video")));
    }

    #[test]
    fn test_missing_avcc() {
        let data = Mp4Builder::new().video_frames(2).audio_frames(2).without_avcc().build();
        let err = demuxer().demux(data).unwrap_err();
        assert!(matches!(err, PlayerError::NoConfigurationBox));
    }

    #[tokio::test]
    async fn test_inspect_reports_media_info() {
        let fetcher = RecordingFetcher::new(vec![(
            "a.mp4",
            Mp4Builder::new().video_frames(6).audio_frames(4).build(),
        )]);
        let info = demuxer()
            .inspect(&fetcher, &MediaSource::from_url("a.mp4"))
            .await
            .unwrap();

        assert_eq!(info.width, 640);
        assert_eq!(info.height, 360);
        assert_eq!(info.video_codec, "avc1.64001f");
        assert_eq!(info.audio_codec, "mp4a.40.2");
        assert_eq!(info.sample_rate, 48_000);

        let err = demuxer()
            .inspect(&fetcher, &MediaSource::from_url("missing.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::UnsupportedSource(_)));
    }
}
