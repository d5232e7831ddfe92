use crate::core::{PixelFormat, RawVideoFrame, VideoImage};

/// 把解码帧转换成可直接绘制的 RGBA 图像
pub trait FrameConverter: Send + Sync {
    fn convert(&self, frame: RawVideoFrame) -> std::result::Result<VideoImage, String>;
}

/// BT.709 YUV -> RGBA（CPU 版本，系数与 GPU 着色器一致）
#[derive(Debug, Default, Clone, Copy)]
pub struct Bt709Converter;

#[inline]
fn to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let y = y as f32 / 255.0;
    let u = (u as f32 - 128.0) / 255.0;
    let v = (v as f32 - 128.0) / 255.0;

    let r = y + 1.5748 * v;
    let g = y - 0.1873 * u - 0.4681 * v;
    let b = y + 1.8556 * u;

    let clamp = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    [clamp(r), clamp(g), clamp(b), 255]
}

impl Bt709Converter {
    fn check_size(frame: &RawVideoFrame, expected: usize) -> std::result::Result<(), String> {
        if frame.data.len() != expected {
            return Err(format!(
                "{:?} 帧数据大小不符: {}x{} 需要 {} 字节, 实际 {}",
                frame.format,
                frame.width,
                frame.height,
                expected,
                frame.data.len()
            ));
        }
        Ok(())
    }
}

impl FrameConverter for Bt709Converter {
    fn convert(&self, frame: RawVideoFrame) -> std::result::Result<VideoImage, String> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let luma = width * height;
        let chroma_w = width.div_ceil(2);
        let chroma_h = height.div_ceil(2);
        let chroma = chroma_w * chroma_h;

        match frame.format {
            PixelFormat::RGBA => {
                Self::check_size(&frame, luma * 4)?;
                Ok(VideoImage {
                    width: frame.width,
                    height: frame.height,
                    data: frame.data,
                })
            }
            PixelFormat::I420 => {
                Self::check_size(&frame, luma + 2 * chroma)?;
                let (y_plane, rest) = frame.data.split_at(luma);
                let (u_plane, v_plane) = rest.split_at(chroma);
                let mut data = Vec::with_capacity(luma * 4);
                for row in 0..height {
                    for col in 0..width {
                        let c = (row / 2) * chroma_w + col / 2;
                        data.extend_from_slice(&to_rgba(
                            y_plane[row * width + col],
                            u_plane[c],
                            v_plane[c],
                        ));
                    }
                }
                Ok(VideoImage {
                    width: frame.width,
                    height: frame.height,
                    data,
                })
            }
            PixelFormat::NV12 => {
                Self::check_size(&frame, luma + 2 * chroma)?;
                let (y_plane, uv_plane) = frame.data.split_at(luma);
                let mut data = Vec::with_capacity(luma * 4);
                for row in 0..height {
                    for col in 0..width {
                        // UV 交错存放
                        let c = ((row / 2) * chroma_w + col / 2) * 2;
                        data.extend_from_slice(&to_rgba(
                            y_plane[row * width + col],
                            uv_plane[c],
                            uv_plane[c + 1],
                        ));
                    }
                }
                Ok(VideoImage {
                    width: frame.width,
                    height: frame.height,
                    data,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> RawVideoFrame {
        RawVideoFrame {
            timestamp: 0.0,
            duration: None,
            width,
            height,
            format,
            data,
        }
    }

    #[test]
    fn test_i420_grey() {
        // 2x2 灰色: Y=128, U=V=128
        let image = Bt709Converter
            .convert(frame(PixelFormat::I420, 2, 2, vec![128, 128, 128, 128, 128, 128]))
            .unwrap();
        assert_eq!(image.data.len(), 16);
        for px in image.data.chunks(4) {
            assert_eq!(px, &[128, 128, 128, 255]);
        }
    }

    #[test]
    fn test_nv12_matches_i420() {
        let i420 = Bt709Converter
            .convert(frame(PixelFormat::I420, 2, 2, vec![30, 90, 150, 210, 60, 200]))
            .unwrap();
        let nv12 = Bt709Converter
            .convert(frame(PixelFormat::NV12, 2, 2, vec![30, 90, 150, 210, 60, 200]))
            .unwrap();
        assert_eq!(i420.data, nv12.data);
    }

    #[test]
    fn test_white_and_black() {
        let white = Bt709Converter
            .convert(frame(PixelFormat::I420, 1, 1, vec![255, 128, 128]))
            .unwrap();
        assert_eq!(white.data, vec![255, 255, 255, 255]);
        let black = Bt709Converter
            .convert(frame(PixelFormat::I420, 1, 1, vec![0, 128, 128]))
            .unwrap();
        assert_eq!(black.data, vec![0, 0, 0, 255]);
    }

    #[test]
    fn test_rgba_passthrough() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let image = Bt709Converter
            .convert(frame(PixelFormat::RGBA, 2, 1, data.clone()))
            .unwrap();
        assert_eq!(image.data, data);
    }

    #[test]
    fn test_wrong_plane_size() {
        let err = Bt709Converter
            .convert(frame(PixelFormat::I420, 2, 2, vec![0; 5]))
            .unwrap_err();
        assert!(err.contains("大小不符"));
    }
}
