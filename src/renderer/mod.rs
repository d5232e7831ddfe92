// 渲染输出

use crate::core::{FrameBufferEntry, Result};
use log::{debug, info};

/// 呈现表面：把一帧画到屏幕（或其他目的地）
pub trait RenderSurface: Send {
    fn draw(&mut self, entry: &FrameBufferEntry) -> Result<()>;
}

/// 无界面表面，只统计并记录已呈现的帧
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    presented: u64,
    last_timestamp: Option<f64>,
    verbose: bool,
}

impl HeadlessSurface {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }
}

impl RenderSurface for HeadlessSurface {
    fn draw(&mut self, entry: &FrameBufferEntry) -> Result<()> {
        if self.presented == 0 {
            info!(
                "🖼️ 首帧呈现: {:.1}ms ({}x{})",
                entry.timestamp, entry.image.width, entry.image.height
            );
        } else if self.verbose {
            debug!("呈现帧 {:.1}ms", entry.timestamp);
        }
        self.presented += 1;
        self.last_timestamp = Some(entry.timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VideoImage;

    #[test]
    fn test_headless_counts_frames() {
        let mut surface = HeadlessSurface::new(false);
        for ts in [0.0, 33.3, 66.7] {
            let entry = FrameBufferEntry {
                timestamp: ts,
                image: VideoImage {
                    width: 1,
                    height: 1,
                    data: vec![0, 0, 0, 255],
                },
            };
            surface.draw(&entry).unwrap();
        }
        assert_eq!(surface.presented(), 3);
        assert_eq!(surface.last_timestamp(), Some(66.7));
    }
}
