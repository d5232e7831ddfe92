use crate::core::{PlayerError, Result};
use crate::player::container::{
    ContainerFile, ContainerInfo, ContainerParser, Sample, TrackInfo, TrackKind,
};
use crate::player::description::AvcDecoderConfigurationRecord;
use bytes::{Buf, Bytes};
use log::{debug, warn};

/// ISO-BMFF（MP4）容器解析器
///
/// 只读取播放所需的 moov 样本表，样本数据直接从输入缓冲切片，不做拷贝。
pub struct IsoBmffParser;

impl ContainerParser for IsoBmffParser {
    fn open(&self, data: Bytes) -> Result<Box<dyn ContainerFile>> {
        Ok(Box::new(Mp4File::parse(data)?))
    }
}

fn malformed(reason: impl Into<String>) -> PlayerError {
    PlayerError::Container(reason.into())
}

/// 带边界检查的大端读取器
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(malformed(format!(
                "盒数据不足: 需要 {} 字节, 剩余 {}",
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    fn u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64())
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.buf.advance(n);
        Ok(())
    }

    fn fourcc(&mut self) -> Result<[u8; 4]> {
        self.ensure(4)?;
        let mut cc = [0u8; 4];
        self.buf.copy_to_slice(&mut cc);
        Ok(cc)
    }

    /// 读取 FullBox 的 version（忽略 flags）
    fn full_box_version(&mut self) -> Result<u8> {
        let version = self.u8()?;
        self.skip(3)?;
        Ok(version)
    }

    fn rest(&self) -> &'a [u8] {
        self.buf
    }
}

/// 拆分同一层级的子盒，返回（类型, 内容）
fn child_boxes(data: &[u8]) -> Result<Vec<([u8; 4], &[u8])>> {
    let mut boxes = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let mut reader = Reader::new(&data[pos..]);
        let size32 = reader.u32()?;
        let kind = reader.fourcc()?;
        let (header_len, size) = match size32 {
            0 => (8usize, (data.len() - pos) as u64),
            1 => (16usize, reader.u64()?),
            n => (8usize, n as u64),
        };
        let size = usize::try_from(size).map_err(|_| malformed("盒尺寸溢出"))?;
        // pos + 8 <= data.len()，减法不会下溢
        if size < header_len || size > data.len() - pos {
            return Err(malformed(format!(
                "盒 {} 尺寸 {} 越界",
                fourcc_to_string(&kind),
                size
            )));
        }
        boxes.push((kind, &data[pos + header_len..pos + size]));
        pos += size;
    }
    Ok(boxes)
}

fn find_box<'a>(boxes: &[([u8; 4], &'a [u8])], kind: &[u8; 4]) -> Option<&'a [u8]> {
    boxes.iter().find(|(k, _)| k == kind).map(|(_, body)| *body)
}

fn fourcc_to_string(cc: &[u8; 4]) -> String {
    String::from_utf8_lossy(cc).to_string()
}

/// 样本表中的一行
#[derive(Debug, Clone, Copy)]
struct SampleEntry {
    offset: u64,
    size: u32,
    dts: u64,
    cts: u64,
    duration: u32,
    is_sync: bool,
}

struct Mp4Track {
    info: TrackInfo,
    avcc: Option<AvcDecoderConfigurationRecord>,
    audio_specific_config: Option<Bytes>,
    samples: Vec<SampleEntry>,
}

struct Extraction {
    track_index: usize,
    next_sample: usize,
    batch: usize,
}

/// 解析后的 MP4 文件
pub struct Mp4File {
    data: Bytes,
    info: ContainerInfo,
    tracks: Vec<Mp4Track>,
    extractions: Vec<Extraction>,
    next_extraction: usize,
}

impl Mp4File {
    pub fn parse(data: Bytes) -> Result<Self> {
        let top = child_boxes(&data)?;
        let moov = find_box(&top, b"moov").ok_or_else(|| malformed("未找到 moov 盒"))?;

        let mut tracks = Vec::new();
        for (kind, body) in child_boxes(moov)? {
            if &kind == b"trak" {
                if let Some(track) = parse_trak(body, data.len())? {
                    tracks.push(track);
                }
            }
        }

        let info = ContainerInfo {
            tracks: tracks.iter().map(|t| t.info.clone()).collect(),
        };
        debug!("MP4 解析完成: {} 条轨道", tracks.len());

        Ok(Self {
            data,
            info,
            tracks,
            extractions: Vec::new(),
            next_extraction: 0,
        })
    }

    fn track(&self, track_id: u32) -> Option<&Mp4Track> {
        self.tracks.iter().find(|t| t.info.id == track_id)
    }

    fn slice_sample(&self, entry: &SampleEntry) -> Result<Bytes> {
        let start = usize::try_from(entry.offset).map_err(|_| malformed("样本偏移溢出"))?;
        let end = start
            .checked_add(entry.size as usize)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                malformed(format!(
                    "样本数据越界: {} + {} / {}",
                    start,
                    entry.size,
                    self.data.len()
                ))
            })?;
        Ok(self.data.slice(start..end))
    }
}

impl ContainerFile for Mp4File {
    fn info(&self) -> &ContainerInfo {
        &self.info
    }

    fn avc_config(&self, track_id: u32) -> Option<&AvcDecoderConfigurationRecord> {
        self.track(track_id).and_then(|t| t.avcc.as_ref())
    }

    fn audio_specific_config(&self, track_id: u32) -> Option<Bytes> {
        self.track(track_id)
            .and_then(|t| t.audio_specific_config.clone())
    }

    fn set_extraction_options(&mut self, track_id: u32, samples_per_batch: usize) {
        let Some(track_index) = self.tracks.iter().position(|t| t.info.id == track_id) else {
            warn!("忽略未知轨道的提取设置: {}", track_id);
            return;
        };
        match self
            .extractions
            .iter_mut()
            .find(|e| e.track_index == track_index)
        {
            Some(extraction) => extraction.batch = samples_per_batch.max(1),
            None => self.extractions.push(Extraction {
                track_index,
                next_sample: 0,
                batch: samples_per_batch.max(1),
            }),
        }
    }

    fn next_samples(&mut self) -> Result<Option<(u32, Vec<Sample>)>> {
        // 各轨道轮流交付一批
        for _ in 0..self.extractions.len() {
            let slot = self.next_extraction % self.extractions.len();
            self.next_extraction = slot + 1;

            let (track_index, start, batch) = {
                let e = &self.extractions[slot];
                (e.track_index, e.next_sample, e.batch)
            };
            let track = &self.tracks[track_index];
            if start >= track.samples.len() {
                continue;
            }
            let end = (start + batch).min(track.samples.len());
            let mut samples = Vec::with_capacity(end - start);
            for entry in &track.samples[start..end] {
                samples.push(Sample {
                    cts: entry.cts,
                    dts: entry.dts,
                    duration: entry.duration,
                    timescale: track.info.timescale,
                    is_sync: entry.is_sync,
                    data: self.slice_sample(entry)?,
                });
            }
            let track_id = track.info.id;
            self.extractions[slot].next_sample = end;
            return Ok(Some((track_id, samples)));
        }
        Ok(None)
    }
}

struct SampleDescription {
    codec: String,
    kind: TrackKind,
    avcc: Option<AvcDecoderConfigurationRecord>,
    audio_specific_config: Option<Bytes>,
}

fn parse_trak(trak: &[u8], file_len: usize) -> Result<Option<Mp4Track>> {
    let boxes = child_boxes(trak)?;
    let tkhd = find_box(&boxes, b"tkhd").ok_or_else(|| malformed("trak 缺少 tkhd"))?;
    let track_id = parse_tkhd(tkhd)?;

    let mdia = find_box(&boxes, b"mdia").ok_or_else(|| malformed("trak 缺少 mdia"))?;
    let mdia_boxes = child_boxes(mdia)?;
    let mdhd = find_box(&mdia_boxes, b"mdhd").ok_or_else(|| malformed("mdia 缺少 mdhd"))?;
    let (timescale, duration) = parse_mdhd(mdhd)?;
    if timescale == 0 {
        return Err(malformed(format!("轨道 {} timescale 为 0", track_id)));
    }

    let handler = find_box(&mdia_boxes, b"hdlr")
        .map(parse_hdlr)
        .transpose()?
        .unwrap_or(*b"    ");

    let minf = find_box(&mdia_boxes, b"minf").ok_or_else(|| malformed("mdia 缺少 minf"))?;
    let minf_boxes = child_boxes(minf)?;
    let stbl = find_box(&minf_boxes, b"stbl").ok_or_else(|| malformed("minf 缺少 stbl"))?;
    let stbl_boxes = child_boxes(stbl)?;

    let description = match find_box(&stbl_boxes, b"stsd") {
        Some(stsd) => parse_stsd(stsd)?,
        None => None,
    };
    let description = match description {
        Some(d) => d,
        None => {
            debug!("跳过不支持的轨道 {} ({})", track_id, fourcc_to_string(&handler));
            SampleDescription {
                codec: fourcc_to_string(&handler),
                kind: TrackKind::Other,
                avcc: None,
                audio_specific_config: None,
            }
        }
    };

    let samples = build_sample_table(&stbl_boxes, file_len)?;

    Ok(Some(Mp4Track {
        info: TrackInfo {
            id: track_id,
            codec: description.codec,
            kind: description.kind,
            timescale,
            duration,
            sample_count: samples.len(),
        },
        avcc: description.avcc,
        audio_specific_config: description.audio_specific_config,
        samples,
    }))
}

fn parse_tkhd(body: &[u8]) -> Result<u32> {
    let mut r = Reader::new(body);
    let version = r.full_box_version()?;
    // creation_time + modification_time
    r.skip(if version == 1 { 16 } else { 8 })?;
    r.u32()
}

fn parse_mdhd(body: &[u8]) -> Result<(u32, u64)> {
    let mut r = Reader::new(body);
    let version = r.full_box_version()?;
    if version == 1 {
        r.skip(16)?;
        let timescale = r.u32()?;
        let duration = r.u64()?;
        Ok((timescale, duration))
    } else {
        r.skip(8)?;
        let timescale = r.u32()?;
        let duration = r.u32()? as u64;
        Ok((timescale, duration))
    }
}

fn parse_hdlr(body: &[u8]) -> Result<[u8; 4]> {
    let mut r = Reader::new(body);
    r.full_box_version()?;
    r.skip(4)?; // pre_defined
    r.fourcc()
}

/// 只读取第一个样本描述
fn parse_stsd(body: &[u8]) -> Result<Option<SampleDescription>> {
    let mut r = Reader::new(body);
    r.full_box_version()?;
    let entry_count = r.u32()?;
    if entry_count == 0 {
        return Ok(None);
    }
    let entries = child_boxes(r.rest())?;
    let Some((kind, entry)) = entries.first() else {
        return Ok(None);
    };
    match kind {
        b"avc1" | b"avc3" => parse_avc_sample_entry(kind, entry).map(Some),
        b"mp4a" => parse_mp4a_sample_entry(entry).map(Some),
        other => {
            debug!("未支持的样本描述: {}", fourcc_to_string(other));
            Ok(None)
        }
    }
}

fn parse_avc_sample_entry(kind: &[u8; 4], entry: &[u8]) -> Result<SampleDescription> {
    let mut r = Reader::new(entry);
    r.skip(6 + 2)?; // reserved + data_reference_index
    r.skip(2 + 2 + 12)?; // pre_defined / reserved
    let width = r.u16()? as u32;
    let height = r.u16()? as u32;
    r.skip(4 + 4 + 4 + 2 + 32 + 2 + 2)?;

    let children = child_boxes(r.rest())?;
    let avcc = find_box(&children, b"avcC")
        .map(AvcDecoderConfigurationRecord::parse)
        .transpose()?;
    let codec = match &avcc {
        Some(record) => record.codec_string(),
        None => fourcc_to_string(kind),
    };

    Ok(SampleDescription {
        codec,
        kind: TrackKind::Video { width, height },
        avcc,
        audio_specific_config: None,
    })
}

fn parse_mp4a_sample_entry(entry: &[u8]) -> Result<SampleDescription> {
    let mut r = Reader::new(entry);
    r.skip(6 + 2)?;
    let version = r.u16()?;
    r.skip(2 + 4)?; // revision_level + vendor
    let channel_count = r.u16()?;
    r.skip(2 + 2 + 2)?; // sample_size, compression_id, packet_size
    let sample_rate = r.u32()? >> 16;
    match version {
        1 => r.skip(16)?,
        2 => r.skip(36)?,
        _ => {}
    }

    let children = child_boxes(r.rest())?;
    let (object_type, audio_specific_config) = match find_box(&children, b"esds") {
        Some(esds) => parse_esds(esds)?,
        None => (0x40, None),
    };
    let codec = match &audio_specific_config {
        Some(asc) if !asc.is_empty() => {
            format!("mp4a.{:x}.{}", object_type, audio_object_type(asc))
        }
        _ => format!("mp4a.{:x}", object_type),
    };

    Ok(SampleDescription {
        codec,
        kind: TrackKind::Audio {
            sample_rate,
            channel_count,
        },
        avcc: None,
        audio_specific_config,
    })
}

fn audio_object_type(asc: &[u8]) -> u8 {
    let aot = asc[0] >> 3;
    if aot == 31 && asc.len() > 1 {
        32 + (((asc[0] & 0x07) << 3) | (asc[1] >> 5))
    } else {
        aot
    }
}

fn read_descriptor_header(r: &mut Reader) -> Result<(u8, usize)> {
    let tag = r.u8()?;
    let mut len = 0usize;
    for _ in 0..4 {
        let b = r.u8()?;
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok((tag, len))
}

/// 返回 (objectTypeIndication, DecoderSpecificInfo)
fn parse_esds(body: &[u8]) -> Result<(u8, Option<Bytes>)> {
    let mut r = Reader::new(body);
    r.full_box_version()?;

    let (tag, _) = read_descriptor_header(&mut r)?;
    if tag != 0x03 {
        return Err(malformed(format!("esds 首个描述符标签异常: {:#x}", tag)));
    }
    r.skip(2)?; // ES_ID
    let flags = r.u8()?;
    if flags & 0x80 != 0 {
        r.skip(2)?;
    }
    if flags & 0x40 != 0 {
        let url_len = r.u8()? as usize;
        r.skip(url_len)?;
    }
    if flags & 0x20 != 0 {
        r.skip(2)?;
    }

    let (tag, _) = read_descriptor_header(&mut r)?;
    if tag != 0x04 {
        return Err(malformed(format!("esds 缺少 DecoderConfigDescriptor: {:#x}", tag)));
    }
    let object_type = r.u8()?;
    r.skip(1 + 3 + 4 + 4)?;

    if r.rest().is_empty() {
        return Ok((object_type, None));
    }
    let (tag, len) = read_descriptor_header(&mut r)?;
    if tag != 0x05 {
        return Ok((object_type, None));
    }
    r.ensure(len)?;
    let asc = Bytes::copy_from_slice(&r.rest()[..len]);
    Ok((object_type, Some(asc)))
}

fn parse_stts(body: &[u8]) -> Result<Vec<(u32, u32)>> {
    let mut r = Reader::new(body);
    r.full_box_version()?;
    let count = r.u32()?;
    let mut entries = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        entries.push((r.u32()?, r.u32()?));
    }
    Ok(entries)
}

fn parse_ctts(body: &[u8]) -> Result<Vec<(u32, i64)>> {
    let mut r = Reader::new(body);
    let version = r.full_box_version()?;
    let count = r.u32()?;
    let mut entries = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        let sample_count = r.u32()?;
        let raw = r.u32()?;
        let offset = if version == 1 {
            raw as i32 as i64
        } else {
            raw as i64
        };
        entries.push((sample_count, offset));
    }
    Ok(entries)
}

fn parse_u32_list(body: &[u8]) -> Result<Vec<u32>> {
    let mut r = Reader::new(body);
    r.full_box_version()?;
    let count = r.u32()?;
    let mut values = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        values.push(r.u32()?);
    }
    Ok(values)
}

/// 固定样本尺寸时，样本总量不能超过文件本身
fn parse_stsz(body: &[u8], file_len: usize) -> Result<Vec<u32>> {
    let mut r = Reader::new(body);
    r.full_box_version()?;
    let sample_size = r.u32()?;
    let count = r.u32()? as usize;
    if sample_size != 0 {
        if count > file_len / sample_size as usize {
            return Err(malformed(format!(
                "stsz 样本数 {} x {} 字节超出文件大小 {}",
                count, sample_size, file_len
            )));
        }
        return Ok(vec![sample_size; count]);
    }
    let mut sizes = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        sizes.push(r.u32()?);
    }
    Ok(sizes)
}

fn parse_stsc(body: &[u8]) -> Result<Vec<(u32, u32)>> {
    let mut r = Reader::new(body);
    r.full_box_version()?;
    let count = r.u32()?;
    let mut entries = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        let first_chunk = r.u32()?;
        let samples_per_chunk = r.u32()?;
        r.skip(4)?; // sample_description_index
        entries.push((first_chunk, samples_per_chunk));
    }
    Ok(entries)
}

fn parse_co64(body: &[u8]) -> Result<Vec<u64>> {
    let mut r = Reader::new(body);
    r.full_box_version()?;
    let count = r.u32()?;
    let mut offsets = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        offsets.push(r.u64()?);
    }
    Ok(offsets)
}

fn build_sample_table(stbl: &[([u8; 4], &[u8])], file_len: usize) -> Result<Vec<SampleEntry>> {
    let sizes = match find_box(stbl, b"stsz") {
        Some(body) => parse_stsz(body, file_len)?,
        None => return Ok(Vec::new()),
    };
    let stts = find_box(stbl, b"stts").map(parse_stts).transpose()?.unwrap_or_default();
    let ctts = find_box(stbl, b"ctts").map(parse_ctts).transpose()?.unwrap_or_default();
    let sync = find_box(stbl, b"stss").map(parse_u32_list).transpose()?;
    let stsc = find_box(stbl, b"stsc").map(parse_stsc).transpose()?.unwrap_or_default();
    let chunk_offsets = match (find_box(stbl, b"stco"), find_box(stbl, b"co64")) {
        (Some(stco), _) => parse_u32_list(stco)?.into_iter().map(u64::from).collect(),
        (None, Some(co64)) => parse_co64(co64)?,
        (None, None) => return Err(malformed("stbl 缺少 stco/co64")),
    };

    let sample_count = sizes.len();

    // 每个样本的 duration（stts 展开）
    let mut durations = Vec::with_capacity(sample_count);
    for (count, delta) in &stts {
        for _ in 0..*count {
            if durations.len() == sample_count {
                break;
            }
            durations.push(*delta);
        }
    }
    let last_delta = durations.last().copied().unwrap_or(0);
    durations.resize(sample_count, last_delta);

    // 每个样本的组合时间偏移（ctts 展开）
    let mut offsets = Vec::with_capacity(sample_count);
    for (count, offset) in &ctts {
        for _ in 0..*count {
            if offsets.len() == sample_count {
                break;
            }
            offsets.push(*offset);
        }
    }
    offsets.resize(sample_count, 0);

    // 每个样本的文件偏移（stsc + chunk offsets）
    let mut file_offsets = Vec::with_capacity(sample_count);
    for (chunk_index, chunk_offset) in chunk_offsets.iter().enumerate() {
        let chunk_number = chunk_index as u32 + 1;
        let samples_in_chunk = stsc
            .iter()
            .take_while(|(first_chunk, _)| *first_chunk <= chunk_number)
            .last()
            .map(|(_, n)| *n)
            .unwrap_or(0);
        let mut offset = *chunk_offset;
        for _ in 0..samples_in_chunk {
            let index = file_offsets.len();
            if index == sample_count {
                break;
            }
            file_offsets.push(offset);
            offset = offset.saturating_add(sizes[index] as u64);
        }
    }
    if file_offsets.len() < sample_count {
        return Err(malformed(format!(
            "样本分块信息不完整: {} / {}",
            file_offsets.len(),
            sample_count
        )));
    }

    let mut table = Vec::with_capacity(sample_count);
    let mut dts = 0u64;
    for i in 0..sample_count {
        let cts = (dts as i64).saturating_add(offsets[i]).max(0) as u64;
        let is_sync = match &sync {
            Some(list) => list.binary_search(&(i as u32 + 1)).is_ok(),
            None => true,
        };
        table.push(SampleEntry {
            offset: file_offsets[i],
            size: sizes[i],
            dts,
            cts,
            duration: durations[i],
            is_sync,
        });
        dts = dts.saturating_add(durations[i] as u64);
    }
    Ok(table)
}
