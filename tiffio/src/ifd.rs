//! Image File Directory (IFD) reading and writing

use crate::error::{Result, TiffError};
use crate::tags::data_type;
use byteorder::{ByteOrder, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};

/// Upper bound on entries in one directory; anything larger is corrupt.
const MAX_ENTRIES: u16 = 4096;

/// Directory field value
#[derive(Debug, Clone, PartialEq)]
pub enum IfdValue {
    Bytes(Vec<u8>),
    Ascii(String),
    Shorts(Vec<u16>),
    Longs(Vec<u32>),
    Rationals(Vec<(u32, u32)>),
    SBytes(Vec<i8>),
    Undefined(Vec<u8>),
    SShorts(Vec<i16>),
    SLongs(Vec<i32>),
    SRationals(Vec<(i32, i32)>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
}

impl IfdValue {
    /// First value as u16
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            IfdValue::Bytes(v) => v.first().map(|&b| b as u16),
            IfdValue::Shorts(v) => v.first().copied(),
            IfdValue::Longs(v) => v.first().and_then(|&l| u16::try_from(l).ok()),
            _ => None,
        }
    }

    /// First value as u32
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            IfdValue::Bytes(v) => v.first().map(|&b| b as u32),
            IfdValue::Shorts(v) => v.first().map(|&s| s as u32),
            IfdValue::Longs(v) => v.first().copied(),
            _ => None,
        }
    }

    /// All values widened to u32
    pub fn as_u32_vec(&self) -> Option<Vec<u32>> {
        match self {
            IfdValue::Bytes(v) => Some(v.iter().map(|&b| b as u32).collect()),
            IfdValue::Shorts(v) => Some(v.iter().map(|&s| s as u32).collect()),
            IfdValue::Longs(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            IfdValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// First value as a float, dividing rationals out
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            IfdValue::Rationals(v) => v
                .first()
                .filter(|(_, d)| *d != 0)
                .map(|&(n, d)| n as f64 / d as f64),
            IfdValue::SRationals(v) => v
                .first()
                .filter(|(_, d)| *d != 0)
                .map(|&(n, d)| n as f64 / d as f64),
            IfdValue::Floats(v) => v.first().map(|&f| f as f64),
            IfdValue::Doubles(v) => v.first().copied(),
            other => other.as_u32().map(|n| n as f64),
        }
    }

    /// Field type code
    pub fn type_id(&self) -> u16 {
        match self {
            IfdValue::Bytes(_) => data_type::BYTE,
            IfdValue::Ascii(_) => data_type::ASCII,
            IfdValue::Shorts(_) => data_type::SHORT,
            IfdValue::Longs(_) => data_type::LONG,
            IfdValue::Rationals(_) => data_type::RATIONAL,
            IfdValue::SBytes(_) => data_type::SBYTE,
            IfdValue::Undefined(_) => data_type::UNDEFINED,
            IfdValue::SShorts(_) => data_type::SSHORT,
            IfdValue::SLongs(_) => data_type::SLONG,
            IfdValue::SRationals(_) => data_type::SRATIONAL,
            IfdValue::Floats(_) => data_type::FLOAT,
            IfdValue::Doubles(_) => data_type::DOUBLE,
        }
    }

    /// Number of values (ASCII counts its terminating NUL)
    pub fn count(&self) -> u32 {
        let n = match self {
            IfdValue::Bytes(v) | IfdValue::Undefined(v) => v.len(),
            IfdValue::Ascii(s) => s.len() + 1,
            IfdValue::Shorts(v) => v.len(),
            IfdValue::Longs(v) => v.len(),
            IfdValue::Rationals(v) => v.len(),
            IfdValue::SBytes(v) => v.len(),
            IfdValue::SShorts(v) => v.len(),
            IfdValue::SLongs(v) => v.len(),
            IfdValue::SRationals(v) => v.len(),
            IfdValue::Floats(v) => v.len(),
            IfdValue::Doubles(v) => v.len(),
        };
        n as u32
    }

    /// Encoded size in bytes
    pub fn byte_size(&self) -> usize {
        data_type::size(self.type_id()) * self.count() as usize
    }

    fn parse<B: ByteOrder>(type_id: u16, count: usize, data: &[u8]) -> Option<Self> {
        let value = match type_id {
            data_type::BYTE => IfdValue::Bytes(data[..count].to_vec()),
            data_type::UNDEFINED => IfdValue::Undefined(data[..count].to_vec()),
            data_type::SBYTE => IfdValue::SBytes(data[..count].iter().map(|&b| b as i8).collect()),
            data_type::ASCII => {
                let s = String::from_utf8_lossy(&data[..count]);
                IfdValue::Ascii(s.trim_end_matches('\0').to_string())
            }
            data_type::SHORT => IfdValue::Shorts(data.chunks_exact(2).take(count).map(B::read_u16).collect()),
            data_type::SSHORT => IfdValue::SShorts(data.chunks_exact(2).take(count).map(B::read_i16).collect()),
            data_type::LONG => IfdValue::Longs(data.chunks_exact(4).take(count).map(B::read_u32).collect()),
            data_type::SLONG => IfdValue::SLongs(data.chunks_exact(4).take(count).map(B::read_i32).collect()),
            data_type::FLOAT => IfdValue::Floats(data.chunks_exact(4).take(count).map(B::read_f32).collect()),
            data_type::DOUBLE => IfdValue::Doubles(data.chunks_exact(8).take(count).map(B::read_f64).collect()),
            data_type::RATIONAL => IfdValue::Rationals(
                data.chunks_exact(8)
                    .take(count)
                    .map(|c| (B::read_u32(&c[..4]), B::read_u32(&c[4..])))
                    .collect(),
            ),
            data_type::SRATIONAL => IfdValue::SRationals(
                data.chunks_exact(8)
                    .take(count)
                    .map(|c| (B::read_i32(&c[..4]), B::read_i32(&c[4..])))
                    .collect(),
            ),
            _ => return None,
        };
        Some(value)
    }

    fn encode<W: Write, B: ByteOrder>(&self, writer: &mut W) -> Result<()> {
        match self {
            IfdValue::Bytes(v) | IfdValue::Undefined(v) => writer.write_all(v)?,
            IfdValue::Ascii(s) => {
                writer.write_all(s.as_bytes())?;
                writer.write_u8(0)?;
            }
            IfdValue::SBytes(v) => v.iter().try_for_each(|&x| writer.write_i8(x))?,
            IfdValue::Shorts(v) => v.iter().try_for_each(|&x| writer.write_u16::<B>(x))?,
            IfdValue::SShorts(v) => v.iter().try_for_each(|&x| writer.write_i16::<B>(x))?,
            IfdValue::Longs(v) => v.iter().try_for_each(|&x| writer.write_u32::<B>(x))?,
            IfdValue::SLongs(v) => v.iter().try_for_each(|&x| writer.write_i32::<B>(x))?,
            IfdValue::Floats(v) => v.iter().try_for_each(|&x| writer.write_f32::<B>(x))?,
            IfdValue::Doubles(v) => v.iter().try_for_each(|&x| writer.write_f64::<B>(x))?,
            IfdValue::Rationals(v) => v.iter().try_for_each(|&(n, d)| {
                writer.write_u32::<B>(n)?;
                writer.write_u32::<B>(d)
            })?,
            IfdValue::SRationals(v) => v.iter().try_for_each(|&(n, d)| {
                writer.write_i32::<B>(n)?;
                writer.write_i32::<B>(d)
            })?,
        }
        Ok(())
    }
}

/// Directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct IfdEntry {
    pub tag: u16,
    pub value: IfdValue,
}

impl IfdEntry {
    pub fn new(tag: u16, value: IfdValue) -> Self {
        IfdEntry { tag, value }
    }

    pub fn short(tag: u16, value: u16) -> Self {
        Self::new(tag, IfdValue::Shorts(vec![value]))
    }

    pub fn long(tag: u16, value: u32) -> Self {
        Self::new(tag, IfdValue::Longs(vec![value]))
    }

    pub fn rational(tag: u16, numerator: u32, denominator: u32) -> Self {
        Self::new(tag, IfdValue::Rationals(vec![(numerator, denominator)]))
    }

    pub fn ascii(tag: u16, value: &str) -> Self {
        Self::new(tag, IfdValue::Ascii(value.to_string()))
    }
}

/// Outcome of reading one raw entry
#[derive(Debug)]
pub(crate) enum RawEntry {
    Known(IfdEntry),
    /// Field type the codec cannot decode; skipped
    UnknownType { tag: u16, type_id: u16 },
}

/// Image File Directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ifd {
    entries: BTreeMap<u16, IfdEntry>,
    /// Offset of the next directory, 0 for the last one
    pub next_ifd_offset: u32,
}

impl Ifd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, entry: IfdEntry) {
        self.entries.insert(entry.tag, entry);
    }

    pub fn get_value(&self, tag: u16) -> Option<&IfdValue> {
        self.entries.get(&tag).map(|e| &e.value)
    }

    pub fn get_u32_or(&self, tag: u16, default: u32) -> u32 {
        self.get_value(tag).and_then(|v| v.as_u32()).unwrap_or(default)
    }

    pub fn get_u16_or(&self, tag: u16, default: u16) -> u16 {
        self.get_value(tag).and_then(|v| v.as_u16()).unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &IfdEntry> {
        self.entries.values()
    }

    /// Read the directory at `offset`. `stream_len` bounds every offset the
    /// directory points at. Entries of unknown field type are returned
    /// separately so the caller can report them.
    pub(crate) fn read<R: Read + Seek, B: ByteOrder>(
        reader: &mut R,
        offset: u32,
        stream_len: u64,
    ) -> Result<(Self, Vec<RawEntry>)> {
        if offset as u64 + 2 > stream_len {
            return Err(TiffError::InvalidIfd(format!(
                "directory offset {} beyond end of data ({})",
                offset, stream_len
            )));
        }
        reader.seek(SeekFrom::Start(offset as u64))?;

        let num_entries = reader.read_u16::<B>()?;
        if num_entries == 0 || num_entries > MAX_ENTRIES {
            return Err(TiffError::InvalidIfd(format!(
                "implausible entry count {}",
                num_entries
            )));
        }

        let mut ifd = Ifd::new();
        let mut skipped = Vec::new();
        for _ in 0..num_entries {
            match Self::read_entry::<R, B>(reader, stream_len)? {
                RawEntry::Known(entry) => ifd.insert(entry),
                unknown => skipped.push(unknown),
            }
        }
        ifd.next_ifd_offset = reader.read_u32::<B>()?;

        Ok((ifd, skipped))
    }

    fn read_entry<R: Read + Seek, B: ByteOrder>(reader: &mut R, stream_len: u64) -> Result<RawEntry> {
        let tag = reader.read_u16::<B>()?;
        let type_id = reader.read_u16::<B>()?;
        let count = reader.read_u32::<B>()? as usize;
        let mut field = [0u8; 4];
        reader.read_exact(&mut field)?;

        let type_size = data_type::size(type_id);
        if type_size == 0 {
            return Ok(RawEntry::UnknownType { tag, type_id });
        }

        let total = type_size
            .checked_mul(count)
            .ok_or_else(|| TiffError::InvalidIfd(format!("tag {} count overflow", tag)))?;

        let value = if total <= 4 {
            IfdValue::parse::<B>(type_id, count, &field)
        } else {
            let value_offset = B::read_u32(&field) as u64;
            if value_offset + total as u64 > stream_len {
                return Err(TiffError::InvalidIfd(format!(
                    "tag {} data at {}+{} beyond end of data ({})",
                    tag, value_offset, total, stream_len
                )));
            }
            let resume = reader.stream_position()?;
            reader.seek(SeekFrom::Start(value_offset))?;
            let mut data = vec![0u8; total];
            reader.read_exact(&mut data)?;
            reader.seek(SeekFrom::Start(resume))?;
            IfdValue::parse::<B>(type_id, count, &data)
        };

        Ok(match value {
            Some(value) => RawEntry::Known(IfdEntry { tag, value }),
            None => RawEntry::UnknownType { tag, type_id },
        })
    }

    /// Write the directory at the current (word aligned) position, followed
    /// by out-of-line values. Returns the directory offset and the offset of
    /// its next-directory pointer.
    pub fn write<W: Write + Seek, B: ByteOrder>(&self, writer: &mut W) -> Result<(u32, u32)> {
        let ifd_start = u32::try_from(writer.stream_position()?)
            .map_err(|_| TiffError::InvalidIfd("directory beyond 4 GiB".into()))?;

        writer.write_u16::<B>(self.entries.len() as u16)?;

        let table_size = 2 + self.entries.len() as u32 * 12 + 4;
        let mut value_offset = ifd_start + table_size;
        let mut out_of_line = Vec::new();

        for entry in self.entries.values() {
            writer.write_u16::<B>(entry.tag)?;
            writer.write_u16::<B>(entry.value.type_id())?;
            writer.write_u32::<B>(entry.value.count())?;

            let size = entry.value.byte_size();
            if size <= 4 {
                let mut inline = Vec::with_capacity(4);
                entry.value.encode::<_, B>(&mut inline)?;
                inline.resize(4, 0);
                writer.write_all(&inline)?;
            } else {
                writer.write_u32::<B>(value_offset)?;
                out_of_line.push(&entry.value);
                value_offset += size as u32 + (size as u32 & 1);
            }
        }

        let next_pointer = ifd_start + table_size - 4;
        writer.write_u32::<B>(self.next_ifd_offset)?;

        for value in out_of_line {
            value.encode::<_, B>(writer)?;
            if value.byte_size() % 2 != 0 {
                writer.write_u8(0)?;
            }
        }

        Ok((ifd_start, next_pointer))
    }
}
