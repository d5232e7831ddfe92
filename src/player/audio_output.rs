use crate::core::{PlaybackClock, Result};
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// 解码完成后拼接出的连续音频缓冲（平面 f32）
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(number_of_channels: usize, length: usize, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![vec![0.0; length]; number_of_channels],
        }
    }

    /// 每声道帧数
    pub fn length(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.length() as f64 * 1000.0 / self.sample_rate as f64
    }

    pub fn byte_size(&self) -> usize {
        self.channels.iter().map(|c| c.len()).sum::<usize>() * std::mem::size_of::<f32>()
    }
}

pub type EndedCallback = Box<dyn Fn() + Send + Sync>;

/// 音频输出上下文，同时是播放的权威时钟
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// 装载缓冲，播放到结尾时调用 `on_ended`
    fn load(&self, buffer: Arc<AudioBuffer>, on_ended: EndedCallback) -> Result<()>;

    fn start(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn suspend(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// 当前播放位置（秒）
    fn current_time(&self) -> f64;
}

pub trait AudioOutputProvider: Send + Sync {
    fn create(&self, sample_rate: u32, channels: u16) -> Result<Arc<dyn AudioOutput>>;
}

#[derive(Default)]
struct ClockOutputState {
    duration_ms: Option<f64>,
    on_ended: Option<EndedCallback>,
    closed: bool,
}

/// 静音输出，用墙上时钟模拟音频时钟
///
/// 结束回调在读取时钟发现已到结尾时触发。
pub struct ClockAudioOutput {
    clock: PlaybackClock,
    state: Mutex<ClockOutputState>,
}

impl ClockAudioOutput {
    pub fn new() -> Self {
        Self {
            clock: PlaybackClock::new(),
            state: Mutex::new(ClockOutputState::default()),
        }
    }

    fn check_ended(&self, now_ms: f64) {
        let callback = {
            let mut state = self.state.lock();
            match state.duration_ms {
                Some(duration) if now_ms >= duration => state.on_ended.take(),
                _ => None,
            }
        };
        if let Some(callback) = callback {
            debug!("静音输出播放结束 @ {:.1}ms", now_ms);
            callback();
        }
    }
}

impl Default for ClockAudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for ClockAudioOutput {
    fn load(&self, buffer: Arc<AudioBuffer>, on_ended: EndedCallback) -> Result<()> {
        let mut state = self.state.lock();
        state.duration_ms = Some(buffer.duration_ms());
        state.on_ended = Some(on_ended);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.clock.set_time(0.0);
        self.clock.play();
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        if !self.state.lock().closed {
            self.clock.play();
        }
        Ok(())
    }

    async fn suspend(&self) -> Result<()> {
        self.clock.pause();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.clock.pause();
        let mut state = self.state.lock();
        state.closed = true;
        state.on_ended = None;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        let now_ms = self.clock.now_ms();
        self.check_ended(now_ms);
        now_ms / 1000.0
    }
}

/// 创建静音时钟输出
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockAudioOutputProvider;

impl AudioOutputProvider for ClockAudioOutputProvider {
    fn create(&self, sample_rate: u32, channels: u16) -> Result<Arc<dyn AudioOutput>> {
        info!("使用静音音频时钟: {} Hz, {} 声道", sample_rate, channels);
        Ok(Arc::new(ClockAudioOutput::new()))
    }
}

#[cfg(feature = "cpal")]
pub use self::device::{CpalAudioOutput, CpalAudioOutputProvider};

#[cfg(feature = "cpal")]
mod device {
    use super::{AudioBuffer, AudioOutput, AudioOutputProvider, EndedCallback};
    use crate::core::{PlayerError, Result};
    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
    use log::{debug, error, info, warn};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// 声卡回调与控制端共享的播放进度
    #[derive(Default)]
    struct Playhead {
        buffer: Option<Arc<AudioBuffer>>,
        /// 源缓冲中的帧位置
        position: f64,
        on_ended: Option<EndedCallback>,
    }

    /// cpal 声卡输出
    pub struct CpalAudioOutput {
        device: Device,
        config: StreamConfig,
        stream: Mutex<Option<Stream>>,
        playhead: Arc<Mutex<Playhead>>,
    }

    // cpal::Stream 不是 Send；只在持有锁时创建、暂停和销毁
    unsafe impl Send for CpalAudioOutput {}
    unsafe impl Sync for CpalAudioOutput {}

    impl CpalAudioOutput {
        /// 创建音频输出（设备不支持时回退到标准配置）
        pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
            info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
            debug!("使用音频设备: {}", device.name().unwrap_or_default());

            let mut candidates = vec![(sample_rate, channels)];
            candidates.extend([(48000, 2), (44100, 2), (48000, 1), (44100, 1)]);

            for (rate, chans) in candidates {
                let config = StreamConfig {
                    channels: chans,
                    sample_rate: cpal::SampleRate(rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                let supported = device.supported_output_configs().map_err(|e| {
                    PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e))
                })?;
                if supported.into_iter().any(|s| is_config_compatible(&config, &s)) {
                    if (rate, chans) != (sample_rate, channels) {
                        warn!("⚠️  音频设备不支持 {} Hz, {} 声道，使用回退配置 {} Hz, {} 声道",
                            sample_rate, channels, rate, chans);
                    }
                    return Ok(Self {
                        device,
                        config,
                        stream: Mutex::new(None),
                        playhead: Arc::new(Mutex::new(Playhead::default())),
                    });
                }
            }

            Err(PlayerError::AudioError(format!(
                "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                sample_rate, channels
            )))
        }
    }

    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;
        rate_in_range && config.channels == supported.channels()
    }

    /// 把平面缓冲按设备声道数交错写出，采样率不同时按比例步进
    fn fill(data: &mut [f32], device_channels: usize, device_rate: u32, playhead: &Mutex<Playhead>) {
        let mut ended = None;
        {
            let mut head = playhead.lock();
            let Some(buffer) = head.buffer.clone() else {
                data.fill(0.0);
                return;
            };
            let step = buffer.sample_rate as f64 / device_rate as f64;
            let length = buffer.length();
            let source_channels = buffer.channels.len();

            for frame in data.chunks_mut(device_channels) {
                let index = head.position as usize;
                for (c, sample) in frame.iter_mut().enumerate() {
                    *sample = if index < length && source_channels > 0 {
                        buffer.channels[c.min(source_channels - 1)][index]
                    } else {
                        0.0
                    };
                }
                if index < length {
                    head.position += step;
                }
            }
            if head.position as usize >= length {
                ended = head.on_ended.take();
            }
        }
        if let Some(callback) = ended {
            callback();
        }
    }

    #[async_trait]
    impl AudioOutput for CpalAudioOutput {
        fn load(&self, buffer: Arc<AudioBuffer>, on_ended: EndedCallback) -> Result<()> {
            let mut head = self.playhead.lock();
            head.buffer = Some(buffer);
            head.position = 0.0;
            head.on_ended = Some(on_ended);
            Ok(())
        }

        fn start(&self) -> Result<()> {
            let mut slot = self.stream.lock();
            if slot.is_some() {
                return Ok(());
            }

            let playhead = self.playhead.clone();
            let device_channels = self.config.channels as usize;
            let device_rate = self.config.sample_rate.0;
            let stream = self
                .device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        fill(data, device_channels, device_rate, &playhead);
                    },
                    move |err| {
                        error!("音频流错误: {}", err);
                    },
                    None,
                )
                .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

            stream
                .play()
                .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;
            *slot = Some(stream);
            info!("音频输出已启动");
            Ok(())
        }

        async fn resume(&self) -> Result<()> {
            if let Some(stream) = self.stream.lock().as_ref() {
                stream
                    .play()
                    .map_err(|e| PlayerError::AudioError(format!("恢复音频流失败: {}", e)))?;
            }
            Ok(())
        }

        async fn suspend(&self) -> Result<()> {
            if let Some(stream) = self.stream.lock().as_ref() {
                stream
                    .pause()
                    .map_err(|e| PlayerError::AudioError(format!("暂停音频流失败: {}", e)))?;
            }
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            if self.stream.lock().take().is_some() {
                info!("音频输出已停止");
            }
            self.playhead.lock().on_ended = None;
            Ok(())
        }

        fn current_time(&self) -> f64 {
            let head = self.playhead.lock();
            match &head.buffer {
                Some(buffer) if buffer.sample_rate > 0 => head.position / buffer.sample_rate as f64,
                _ => 0.0,
            }
        }
    }

    /// 默认声卡输出
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CpalAudioOutputProvider;

    impl AudioOutputProvider for CpalAudioOutputProvider {
        fn create(&self, sample_rate: u32, channels: u16) -> Result<Arc<dyn AudioOutput>> {
            Ok(Arc::new(CpalAudioOutput::new(sample_rate, channels)?))
        }
    }
}
