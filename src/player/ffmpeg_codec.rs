use crate::core::{
    AudioDecoderConfig, AudioFrame, ChunkType, EncodedAudioChunk, EncodedVideoChunk,
    HardwareAcceleration, PixelFormat, PlayerError, RawVideoFrame, Result, VideoDecoderConfig,
};
use crate::player::codec::{
    BoxedAudioDecoder, BoxedVideoDecoder, CodecProvider, ConfigSupport, DecoderEvent, DecoderSink,
    MediaDecoder,
};
use async_trait::async_trait;
use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, software, util};
use log::{debug, info, warn};
use std::collections::HashMap;

/// 时间戳以微秒送入 FFmpeg，输出时换回毫秒
fn ms_to_us(ms: f64) -> i64 {
    (ms * 1000.0).round() as i64
}

fn us_to_ms(us: i64) -> f64 {
    us as f64 / 1000.0
}

/// 把 extradata 拷进 AVCodecContext（FFmpeg 负责释放）
fn set_extradata(context: &mut codec::context::Context, data: &Bytes) -> Result<()> {
    unsafe {
        use ffmpeg_next::ffi;
        let padding = ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
        let buffer = ffi::av_mallocz(data.len() + padding) as *mut u8;
        if buffer.is_null() {
            return Err(PlayerError::DecodeError("分配 extradata 失败".to_string()));
        }
        std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, data.len());
        let ctx = context.as_mut_ptr();
        (*ctx).extradata = buffer;
        (*ctx).extradata_size = data.len() as i32;
        (*ctx).pkt_timebase = ffi::AVRational {
            num: 1,
            den: 1_000_000,
        };
    }
    Ok(())
}

fn build_packet(
    data: &[u8],
    pts_ms: f64,
    dts_ms: f64,
    duration_ms: f64,
    key: bool,
) -> ffmpeg::Packet {
    let mut packet = ffmpeg::Packet::copy(data);
    packet.set_pts(Some(ms_to_us(pts_ms)));
    packet.set_dts(Some(ms_to_us(dts_ms)));
    packet.set_duration(ms_to_us(duration_ms));
    if key {
        packet.set_flags(codec::packet::Flags::KEY);
    }
    packet
}

/// 基于 FFmpeg 的解码能力（H.264 + AAC）
#[derive(Debug, Clone, Copy)]
pub struct FfmpegCodecProvider;

impl FfmpegCodecProvider {
    pub fn new() -> Result<Self> {
        ffmpeg::init()?;
        info!("✅ FFmpeg 初始化成功");
        Ok(Self)
    }
}

#[async_trait]
impl CodecProvider for FfmpegCodecProvider {
    async fn is_video_config_supported(
        &self,
        config: &VideoDecoderConfig,
    ) -> Result<ConfigSupport<VideoDecoderConfig>> {
        let supported = (config.codec.starts_with("avc1") || config.codec.starts_with("avc3"))
            && codec::decoder::find(codec::Id::H264).is_some();
        Ok(ConfigSupport {
            supported,
            config: config.clone(),
        })
    }

    async fn is_audio_config_supported(
        &self,
        config: &AudioDecoderConfig,
    ) -> Result<ConfigSupport<AudioDecoderConfig>> {
        let supported =
            config.codec.starts_with("mp4a.40") && codec::decoder::find(codec::Id::AAC).is_some();
        Ok(ConfigSupport {
            supported,
            config: config.clone(),
        })
    }

    fn create_video_decoder(&self, sink: DecoderSink<RawVideoFrame>) -> Result<BoxedVideoDecoder> {
        Ok(Box::new(FfmpegVideoDecoder {
            sink,
            decoder: None,
            scaler: None,
            durations: HashMap::new(),
        }))
    }

    fn create_audio_decoder(&self, sink: DecoderSink<AudioFrame>) -> Result<BoxedAudioDecoder> {
        Ok(Box::new(FfmpegAudioDecoder {
            sink,
            decoder: None,
            resampler: None,
        }))
    }
}

/// H.264 解码器，YUV420P 直接输出，其他格式缩放为 RGBA
///
/// 只做软件解码：`hardware_acceleration` 偏好不会挂载硬件设备上下文，
/// 请求硬件时记录一条警告后按软件路径继续。
pub struct FfmpegVideoDecoder {
    sink: DecoderSink<RawVideoFrame>,
    decoder: Option<codec::decoder::Video>,
    scaler: Option<software::scaling::Context>,
    /// 按 pts 记录的单元时长
    durations: HashMap<i64, f64>,
}

// SwsContext 本身不是 Send，但每个解码器实例只在一个线程中使用
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn decoder(&mut self) -> Result<&mut codec::decoder::Video> {
        self.decoder.as_mut().ok_or(PlayerError::NotConfigured)
    }

    /// 取出所有可用帧
    fn drain(&mut self) -> Result<()> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder()?.receive_frame(&mut decoded) {
                Ok(()) => {
                    let frame = self.convert_frame(&decoded)?;
                    let _ = self.sink.send(DecoderEvent::Output(frame));
                }
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("视频解码错误（已跳过）: {}", e);
                    let _ = self.sink.send(DecoderEvent::Error(e.to_string()));
                    break;
                }
            }
        }
        Ok(())
    }

    fn convert_frame(&mut self, frame: &util::frame::Video) -> Result<RawVideoFrame> {
        let width = frame.width();
        let height = frame.height();
        let pts = frame.timestamp().or(frame.pts()).unwrap_or(0);
        let duration = self.durations.remove(&pts);

        if frame.format() == util::format::Pixel::YUV420P {
            let chroma_w = width.div_ceil(2) as usize;
            let chroma_h = height.div_ceil(2) as usize;
            let mut data =
                Vec::with_capacity(width as usize * height as usize + 2 * chroma_w * chroma_h);
            copy_plane(frame, 0, width as usize, height as usize, &mut data);
            copy_plane(frame, 1, chroma_w, chroma_h, &mut data);
            copy_plane(frame, 2, chroma_w, chroma_h, &mut data);
            return Ok(RawVideoFrame {
                timestamp: us_to_ms(pts),
                duration,
                width,
                height,
                format: PixelFormat::I420,
                data,
            });
        }

        if self.scaler.is_none() {
            debug!("初始化缩放器: {:?} -> RGBA", frame.format());
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
        }
        let mut rgba = util::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut rgba)?;
        }
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        copy_plane(&rgba, 0, width as usize * 4, height as usize, &mut data);
        Ok(RawVideoFrame {
            timestamp: us_to_ms(pts),
            duration,
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }
}

/// 去掉行尾填充，按紧凑布局追加
fn copy_plane(
    frame: &util::frame::Video,
    plane: usize,
    row_bytes: usize,
    rows: usize,
    out: &mut Vec<u8>,
) {
    let stride = frame.stride(plane);
    let source = frame.data(plane);
    for y in 0..rows {
        let start = y * stride;
        out.extend_from_slice(&source[start..start + row_bytes]);
    }
}

impl MediaDecoder<VideoDecoderConfig, EncodedVideoChunk> for FfmpegVideoDecoder {
    fn configure(&mut self, config: &VideoDecoderConfig) -> Result<()> {
        let h264 = codec::decoder::find(codec::Id::H264)
            .ok_or_else(|| PlayerError::ConfigNotSupported(config.codec.clone()))?;
        let mut context = codec::context::Context::new_with_codec(h264);
        if let Some(description) = &config.description {
            set_extradata(&mut context, description)?;
        }
        if config.optimize_for_latency {
            unsafe {
                use ffmpeg_next::ffi;
                let ctx = context.as_mut_ptr();
                (*ctx).flags |= ffi::AV_CODEC_FLAG_LOW_DELAY as i32;
                (*ctx).thread_count = 4;
                (*ctx).thread_type = ffi::FF_THREAD_SLICE;
            }
        }
        let decoder = context.decoder().video()?;
        if config.hardware_acceleration == HardwareAcceleration::PreferHardware {
            warn!("⚠️  FFmpeg 后端仅支持软件解码，忽略硬件加速偏好");
        }
        info!(
            "视频解码器已创建: {} {}x{} (软件解码)",
            config.codec, config.coded_width, config.coded_height
        );
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decode(&mut self, unit: EncodedVideoChunk) -> Result<()> {
        let packet = build_packet(
            &unit.data,
            unit.timestamp,
            unit.dts,
            unit.duration,
            unit.chunk_type == ChunkType::Key,
        );
        self.durations.insert(ms_to_us(unit.timestamp), unit.duration);
        self.decoder()?.send_packet(&packet)?;
        self.drain()
    }

    fn flush(&mut self) -> Result<()> {
        self.decoder()?.send_eof()?;
        self.drain()?;
        self.decoder()?.flush();
        let _ = self.sink.send(DecoderEvent::Flushed);
        Ok(())
    }

    fn close(&mut self) {
        if self.decoder.take().is_some() {
            self.scaler = None;
            self.durations.clear();
            debug!("视频解码器已关闭");
        }
    }
}

/// AAC 解码器，输出重采样为平面 f32（保持原采样率和声道）
pub struct FfmpegAudioDecoder {
    sink: DecoderSink<AudioFrame>,
    decoder: Option<codec::decoder::Audio>,
    resampler: Option<software::resampling::Context>,
}

// SwrContext 同样只在单个线程中使用
unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    fn decoder(&mut self) -> Result<&mut codec::decoder::Audio> {
        self.decoder.as_mut().ok_or(PlayerError::NotConfigured)
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder()?.receive_frame(&mut decoded) {
                Ok(()) => {
                    let frame = self.convert_frame(&decoded)?;
                    let _ = self.sink.send(DecoderEvent::Output(frame));
                }
                Err(ffmpeg::Error::Other { errno: 11 }) => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    let _ = self.sink.send(DecoderEvent::Error(e.to_string()));
                    break;
                }
            }
        }
        Ok(())
    }

    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<AudioFrame> {
        let rate = frame.rate();
        if self.resampler.is_none() {
            debug!(
                "🔧 初始化音频重采样器: {:?} {}Hz/{}ch -> F32 planar",
                frame.format(),
                rate,
                frame.channels()
            );
            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                rate,
                util::format::Sample::F32(util::format::sample::Type::Planar),
                frame.channel_layout(),
                rate,
            )?);
        }
        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(frame, &mut resampled)?;
        }

        let samples = resampled.samples();
        let planes = (0..resampled.planes())
            .map(|channel| resampled.plane::<f32>(channel)[..samples].to_vec())
            .collect();
        let timestamp = frame.timestamp().or(frame.pts()).map(us_to_ms).unwrap_or(0.0);
        Ok(AudioFrame {
            timestamp,
            duration: samples as f64 * 1000.0 / rate.max(1) as f64,
            sample_rate: rate,
            planes,
        })
    }
}

impl MediaDecoder<AudioDecoderConfig, EncodedAudioChunk> for FfmpegAudioDecoder {
    fn configure(&mut self, config: &AudioDecoderConfig) -> Result<()> {
        let aac = codec::decoder::find(codec::Id::AAC)
            .ok_or_else(|| PlayerError::ConfigNotSupported(config.codec.clone()))?;
        let mut context = codec::context::Context::new_with_codec(aac);
        if let Some(description) = &config.description {
            set_extradata(&mut context, description)?;
        }
        let decoder = context.decoder().audio()?;
        info!(
            "音频解码器已创建: {} {} Hz, {} 声道",
            config.codec, config.sample_rate, config.number_of_channels
        );
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decode(&mut self, unit: EncodedAudioChunk) -> Result<()> {
        let packet = build_packet(
            &unit.data,
            unit.timestamp,
            unit.timestamp,
            unit.duration,
            true,
        );
        self.decoder()?.send_packet(&packet)?;
        self.drain()
    }

    fn flush(&mut self) -> Result<()> {
        self.decoder()?.send_eof()?;
        self.drain()?;
        self.decoder()?.flush();
        let _ = self.sink.send(DecoderEvent::Flushed);
        Ok(())
    }

    fn close(&mut self) {
        if self.decoder.take().is_some() {
            self.resampler = None;
            debug!("音频解码器已关闭");
        }
    }
}
