use crate::core::{HardwareAcceleration, PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放管线调优参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 初始化视频解码器时是否请求硬件加速
    pub request_hardware_acceleration: bool,
    /// 是否传递低延迟优化标志
    pub optimize_for_latency: bool,
    /// 开播前的预缓冲目标（毫秒）
    pub prebuffer_target_ms: f64,
    /// 播放中领先播放头的缓冲目标（毫秒）
    pub buffer_target_ms: f64,
    /// 帧转换线程数
    pub frame_conversion_workers: usize,
    /// 落后播放头多少帧后开始清理帧缓冲
    pub frame_purge_threshold: f64,
    /// 预缓冲看门狗首次介入前的等待（毫秒）
    pub prebuffer_grace_ms: u64,
    /// 看门狗推送间隔（毫秒）
    pub prebuffer_retry_ms: u64,
    /// 预缓冲最长等待（毫秒）
    pub prebuffer_timeout_ms: u64,
    /// 渲染循环间隔（毫秒），对应显示刷新节奏
    pub render_interval_ms: u64,
    /// UI 指标轮询间隔（毫秒）
    pub metrics_poll_interval_ms: u64,
    /// UI 可视化轮询间隔（毫秒）
    pub visualization_poll_interval_ms: u64,
    /// 每批从容器取出的样本数
    pub samples_per_batch: usize,
    /// 逐帧日志
    pub noisy_logs: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            request_hardware_acceleration: true,
            optimize_for_latency: true,
            prebuffer_target_ms: 500.0,
            buffer_target_ms: 1000.0,
            frame_conversion_workers: 1,
            frame_purge_threshold: 10.0,
            prebuffer_grace_ms: 50,
            prebuffer_retry_ms: 50,
            prebuffer_timeout_ms: 10_000,
            render_interval_ms: 16,
            metrics_poll_interval_ms: 500,
            visualization_poll_interval_ms: 100,
            samples_per_batch: 1000,
            noisy_logs: false,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_conversion_workers == 0 {
            return Err(PlayerError::Config(
                "frame_conversion_workers 至少为 1".to_string(),
            ));
        }
        if self.prebuffer_target_ms < 0.0 || self.buffer_target_ms < 0.0 {
            return Err(PlayerError::Config("缓冲目标不能为负数".to_string()));
        }
        if self.frame_purge_threshold < 0.0 {
            return Err(PlayerError::Config(
                "frame_purge_threshold 不能为负数".to_string(),
            ));
        }
        if self.render_interval_ms == 0 || self.prebuffer_retry_ms == 0 {
            return Err(PlayerError::Config("定时间隔必须大于 0".to_string()));
        }
        if self.samples_per_batch == 0 {
            return Err(PlayerError::Config("samples_per_batch 至少为 1".to_string()));
        }
        Ok(())
    }

    pub fn hardware_acceleration(&self) -> HardwareAcceleration {
        if self.request_hardware_acceleration {
            HardwareAcceleration::PreferHardware
        } else {
            HardwareAcceleration::NoPreference
        }
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tuning_constants() {
        let config = PlayerConfig::default();
        assert_eq!(config.prebuffer_target_ms, 500.0);
        assert_eq!(config.buffer_target_ms, 1000.0);
        assert_eq!(config.frame_conversion_workers, 1);
        assert_eq!(config.frame_purge_threshold, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            PlayerConfig::from_json_str(r#"{"frame_conversion_workers": 3, "noisy_logs": true}"#)
                .unwrap();
        assert_eq!(config.frame_conversion_workers, 3);
        assert!(config.noisy_logs);
        assert_eq!(config.prebuffer_target_ms, 500.0);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = PlayerConfig::from_json_str(r#"{"frame_conversion_workers": 0}"#).unwrap_err();
        assert!(matches!(err, PlayerError::Config(_)));
    }

    #[test]
    fn test_hardware_acceleration_preference() {
        let mut config = PlayerConfig::default();
        assert_eq!(config.hardware_acceleration(), HardwareAcceleration::PreferHardware);
        config.request_hardware_acceleration = false;
        assert_eq!(config.hardware_acceleration(), HardwareAcceleration::NoPreference);
    }
}
