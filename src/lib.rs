//! 广告播放器核心：解封装、解码调度、帧缓冲与音画同步

pub mod core;
pub mod player;
pub mod renderer;

#[cfg(test)]
mod testing;
