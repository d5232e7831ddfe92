use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use myy_ad_player::core::{Item, PlaybackState, PlayerConfig};
use myy_ad_player::player::{
    AudioOutputProvider, Bt709Converter, CodecProvider, Demuxer, FileFetcher, IsoBmffParser,
    PlaybackManager, PlayerHost, WorkDelegator,
};
use myy_ad_player::renderer::HeadlessSurface;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 按顺序播放一组广告（无界面），定期输出播放指标
#[derive(Parser, Debug)]
#[command(name = "myy_ad_player", version, about)]
struct Args {
    /// 依次播放的广告文件
    #[arg(required = true)]
    files: Vec<String>,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 帧转换线程数（覆盖配置）
    #[arg(long)]
    workers: Option<usize>,

    /// 指标以 JSON 行输出
    #[arg(long)]
    json: bool,
}

#[cfg(feature = "ffmpeg")]
fn codec_provider() -> Result<Option<Arc<dyn CodecProvider>>> {
    let provider = myy_ad_player::player::FfmpegCodecProvider::new()
        .map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    Ok(Some(Arc::new(provider)))
}

/// 没有解码后端时只能查看媒体信息
#[cfg(not(feature = "ffmpeg"))]
fn codec_provider() -> Result<Option<Arc<dyn CodecProvider>>> {
    Ok(None)
}

/// 逐个解封装并输出媒体信息，失败的文件跳过
async fn inspect(files: &[String], config: &PlayerConfig, json: bool) -> Result<()> {
    let demuxer = Demuxer::new(Arc::new(IsoBmffParser), config.samples_per_batch);
    for (index, file) in files.iter().enumerate() {
        let item = Item::new(file);
        match demuxer.inspect(&FileFetcher, &item.source).await {
            Ok(info) if json => println!("{}", serde_json::to_string(&info)?),
            Ok(info) => info!(
                "📄 ad {} {}: {}x{} {} {:.1}fps | {} {} Hz {} 声道 | {:.0}ms",
                index,
                file,
                info.width,
                info.height,
                info.video_codec,
                info.fps,
                info.audio_codec,
                info.sample_rate,
                info.channels,
                info.duration
            ),
            Err(e) => warn!("❌ ad {} {} 解析失败, 跳过: {}", index, file, e),
        }
    }
    Ok(())
}

#[cfg(feature = "cpal")]
fn audio_output_provider() -> Arc<dyn AudioOutputProvider> {
    Arc::new(myy_ad_player::player::audio_output::CpalAudioOutputProvider)
}

#[cfg(not(feature = "cpal"))]
fn audio_output_provider() -> Arc<dyn AudioOutputProvider> {
    Arc::new(myy_ad_player::player::ClockAudioOutputProvider)
}

fn report(manager: &PlaybackManager, json: bool) -> Result<()> {
    let metrics = manager.metrics();
    if json {
        println!("{}", serde_json::to_string(&metrics)?);
    } else if let Some(index) = metrics.item_index {
        info!(
            "📊 ad {} {}x{} {} | 源 {:.1}fps 解码 {:.1}fps 转换 {:.1}fps 播放 {:.1}fps | 丢帧 {} | 缓冲 {:.0}ms | 视频 {}KB 帧 {}KB 音频 {}KB",
            index,
            metrics.width,
            metrics.height,
            metrics.codec,
            metrics.source_fps,
            metrics.decode_fps,
            metrics.conversion_fps,
            metrics.playback_fps,
            metrics.dropped_frames,
            metrics.buffered_ms,
            metrics.video_encoded_bytes / 1024,
            metrics.frame_buffer_bytes / 1024,
            metrics.audio_buffer_bytes / 1024
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    info!("🎬 MYY 广告播放器启动");

    let mut config = match &args.config {
        Some(path) => PlayerConfig::from_file(path)
            .with_context(|| format!("读取配置失败: {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.frame_conversion_workers = workers;
    }
    config.validate()?;

    let Some(codecs) = codec_provider()? else {
        warn!("⚠️  未启用 ffmpeg 特性，只输出媒体信息（使用 --features ffmpeg 构建以播放）");
        return inspect(&args.files, &config, args.json).await;
    };

    let host = PlayerHost {
        codecs,
        audio_outputs: audio_output_provider(),
        container: Arc::new(IsoBmffParser),
        fetcher: Arc::new(FileFetcher),
    };
    let delegator = Arc::new(WorkDelegator::new(
        config.frame_conversion_workers,
        Arc::new(Bt709Converter),
    )?);
    let manager = PlaybackManager::new(
        config.clone(),
        host,
        delegator.clone(),
        Box::new(HeadlessSurface::new(config.noisy_logs)),
    );

    let states = manager.subscribe();
    let items: Vec<Item> = args.files.iter().map(|f| Item::new(f)).collect();
    manager.submit_queue(items).await;

    let mut metrics_tick =
        tokio::time::interval(Duration::from_millis(config.metrics_poll_interval_ms));
    let mut visualization_tick =
        tokio::time::interval(Duration::from_millis(config.visualization_poll_interval_ms));
    let mut started = false;
    loop {
        tokio::select! {
            _ = metrics_tick.tick() => report(&manager, args.json)?,
            _ = visualization_tick.tick() => {
                let snapshot = manager.visualization();
                debug!(
                    "解码中 {} 转换中 {} 已缓冲 {}",
                    snapshot.decoding.len(),
                    snapshot.converting.len(),
                    snapshot.buffered.len()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("收到中断信号，停止播放");
                manager.reset().await;
                break;
            }
        }

        let mut finished = false;
        while let Ok(state) = states.try_recv() {
            match state {
                PlaybackState::PlaybackRequested | PlaybackState::Playing => started = true,
                PlaybackState::Stopped if started => finished = true,
                _ => {}
            }
        }
        if finished {
            break;
        }
    }

    delegator.shutdown();
    info!("👋 播放结束");
    Ok(())
}
