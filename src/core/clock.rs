use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 音频不可用时作为后备时间源
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_ms: f64,          // 基准位置（毫秒）
    base_instant: Instant, // 基准时刻
    paused: bool,
    paused_at: f64, // 暂停时的位置
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_ms: 0.0,
                base_instant: Instant::now(),
                paused: true,
                paused_at: 0.0,
            })),
        }
    }

    /// 获取当前播放时间（毫秒）
    pub fn now_ms(&self) -> f64 {
        let inner = self.inner.lock();
        Self::now_unlocked(&inner)
    }

    /// 设置播放位置
    pub fn set_time(&self, ms: f64) {
        let mut inner = self.inner.lock();
        inner.base_ms = ms;
        inner.base_instant = Instant::now();
        inner.paused_at = ms;
    }

    /// 开始/继续走时
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_ms = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停走时
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = Self::now_unlocked(&inner);
            inner.paused = true;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn now_unlocked(inner: &ClockInner) -> f64 {
        if inner.paused {
            inner.paused_at
        } else {
            inner.base_ms + inner.base_instant.elapsed().as_secs_f64() * 1000.0
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clock_starts_paused() {
        let clock = PlaybackClock::new();
        assert!(clock.is_paused());
        assert_eq!(clock.now_ms(), 0.0);
    }

    #[test]
    fn test_pause_freezes_time() {
        let clock = PlaybackClock::new();
        clock.play();
        thread::sleep(Duration::from_millis(20));
        clock.pause();
        let frozen = clock.now_ms();
        assert!(frozen >= 20.0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now_ms(), frozen);
    }

    #[test]
    fn test_set_time() {
        let clock = PlaybackClock::new();
        clock.set_time(1500.0);
        assert_eq!(clock.now_ms(), 1500.0);
        clock.play();
        assert!(clock.now_ms() >= 1500.0);
    }
}
