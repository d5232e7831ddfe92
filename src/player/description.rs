use crate::core::{PlayerError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// 一个参数集（SPS/PPS）及其声明长度
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    pub length: u16,
    pub nalu: Bytes,
}

impl ParameterSet {
    pub fn new(nalu: Bytes) -> Result<Self> {
        let length = u16::try_from(nalu.len())
            .map_err(|_| PlayerError::Container(format!("参数集过长: {} 字节", nalu.len())))?;
        Ok(Self { length, nalu })
    }
}

/// AVCDecoderConfigurationRecord（avcC 盒内容）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcDecoderConfigurationRecord {
    pub configuration_version: u8,
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    pub length_size_minus_one: u8,
    pub sps: Vec<ParameterSet>,
    pub pps: Vec<ParameterSet>,
}

impl AvcDecoderConfigurationRecord {
    /// 预先计算 description 的字节数
    pub fn encoded_size(&self) -> usize {
        // 6 字节头 + 1 字节 PPS 数量，NALU 长度各占 2 字节
        let sps: usize = self.sps.iter().map(|p| 2 + p.length as usize).sum();
        let pps: usize = self.pps.iter().map(|p| 2 + p.length as usize).sum();
        7 + sps + pps
    }

    /// 序列化为解码器需要的 description 字节
    pub fn to_description(&self) -> Result<Bytes> {
        if self.sps.len() > 0x1F {
            return Err(PlayerError::Container(format!(
                "SPS 数量 {} 超出 5 位上限",
                self.sps.len()
            )));
        }
        if self.pps.len() > u8::MAX as usize {
            return Err(PlayerError::Container(format!(
                "PPS 数量 {} 超出上限",
                self.pps.len()
            )));
        }

        let mut writer = DescriptionWriter::new(self.encoded_size());
        writer.write_u8(self.configuration_version);
        writer.write_u8(self.profile_indication);
        writer.write_u8(self.profile_compatibility);
        writer.write_u8(self.level_indication);
        writer.write_u8((63 << 2) | (self.length_size_minus_one & 0x03));
        writer.write_u8((7 << 5) | self.sps.len() as u8);
        for sps in &self.sps {
            writer.write_u16(sps.length);
            writer.write_bytes(&sps.nalu);
        }
        writer.write_u8(self.pps.len() as u8);
        for pps in &self.pps {
            writer.write_u16(pps.length);
            writer.write_bytes(&pps.nalu);
        }
        writer.finish()
    }

    /// 解析 avcC 布局
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let truncated = || PlayerError::Container("avcC 数据被截断".to_string());

        if buf.remaining() < 6 {
            return Err(truncated());
        }
        let configuration_version = buf.get_u8();
        let profile_indication = buf.get_u8();
        let profile_compatibility = buf.get_u8();
        let level_indication = buf.get_u8();
        let length_size_minus_one = buf.get_u8() & 0x03;
        let sps_count = (buf.get_u8() & 0x1F) as usize;

        let mut sps = Vec::with_capacity(sps_count);
        for _ in 0..sps_count {
            sps.push(read_parameter_set(&mut buf).ok_or_else(truncated)?);
        }

        if buf.remaining() < 1 {
            return Err(truncated());
        }
        let pps_count = buf.get_u8() as usize;
        let mut pps = Vec::with_capacity(pps_count);
        for _ in 0..pps_count {
            pps.push(read_parameter_set(&mut buf).ok_or_else(truncated)?);
        }

        Ok(Self {
            configuration_version,
            profile_indication,
            profile_compatibility,
            level_indication,
            length_size_minus_one,
            sps,
            pps,
        })
    }

    /// RFC 6381 编码字符串，如 avc1.64001f
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile_indication, self.profile_compatibility, self.level_indication
        )
    }
}

fn read_parameter_set(buf: &mut &[u8]) -> Option<ParameterSet> {
    if buf.remaining() < 2 {
        return None;
    }
    let length = buf.get_u16();
    if buf.remaining() < length as usize {
        return None;
    }
    let nalu = Bytes::copy_from_slice(&buf[..length as usize]);
    buf.advance(length as usize);
    Some(ParameterSet { length, nalu })
}

/// 预留固定大小的写入器，写完后校验实际字节数
pub struct DescriptionWriter {
    data: BytesMut,
    size: usize,
}

impl DescriptionWriter {
    pub fn new(size: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(size),
            size,
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    /// 大端序
    pub fn write_u16(&mut self, value: u16) {
        self.data.put_u16(value);
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.data.put_slice(value);
    }

    pub fn finish(self) -> Result<Bytes> {
        if self.data.len() != self.size {
            return Err(PlayerError::DescriptionSizeMismatch {
                expected: self.size,
                actual: self.data.len(),
            });
        }
        Ok(self.data.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> AvcDecoderConfigurationRecord {
        AvcDecoderConfigurationRecord {
            configuration_version: 1,
            profile_indication: 0x64,
            profile_compatibility: 0x00,
            level_indication: 0x1f,
            length_size_minus_one: 3,
            sps: vec![ParameterSet::new(Bytes::from_static(&[0x67, 0x64, 0x00, 0x1f, 0xac])).unwrap()],
            pps: vec![
                ParameterSet::new(Bytes::from_static(&[0x68, 0xeb, 0xe3])).unwrap(),
                ParameterSet::new(Bytes::from_static(&[0x68, 0x01])).unwrap(),
            ],
        }
    }

    #[test]
    fn test_exact_layout() {
        let description = sample_record().to_description().unwrap();
        let expected: Vec<u8> = vec![
            0x01, 0x64, 0x00, 0x1f, 0xff, 0xe1, // 头部
            0x00, 0x05, 0x67, 0x64, 0x00, 0x1f, 0xac, // SPS
            0x02, // PPS 数量
            0x00, 0x03, 0x68, 0xeb, 0xe3, //
            0x00, 0x02, 0x68, 0x01,
        ];
        assert_eq!(description.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_round_trip() {
        let record = sample_record();
        let description = record.to_description().unwrap();
        assert_eq!(description.len(), record.encoded_size());
        let parsed = AvcDecoderConfigurationRecord::parse(&description).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_declared_length_mismatch_fails() {
        let mut record = sample_record();
        // 声明长度比实际 NALU 多 1 字节
        record.sps[0].length = 6;
        let err = record.to_description().unwrap_err();
        assert!(matches!(
            err,
            PlayerError::DescriptionSizeMismatch { expected: 24, actual: 23 }
        ));
    }

    #[test]
    fn test_parse_truncated() {
        let description = sample_record().to_description().unwrap();
        let err = AvcDecoderConfigurationRecord::parse(&description[..10]).unwrap_err();
        assert!(matches!(err, PlayerError::Container(_)));
    }

    #[test]
    fn test_codec_string() {
        assert_eq!(sample_record().codec_string(), "avc1.64001f");
    }
}
