//! Minimal TIFF client codec driven entirely through [`ClientProcs`].
//!
//! A [`Tiff`] is opened over a callback set, reads or writes classic
//! (version 42) files one directory at a time and stores uncompressed strips.
//! Structural problems (bad header, corrupt directory, short strip reads,
//! failed writes) are reported as [`TiffError::Fatal`]; the session manager
//! treats those as unrecoverable for the handle that raised them.

use crate::client::{ClientProcs, JobProcs, ProcIo};
use crate::diagnostics::Diagnostics;
use crate::error::{Result, TiffError};
use crate::ifd::{Ifd, IfdEntry, IfdValue, RawEntry};
use crate::tags::{tag, tag_name};
use crate::{TIFF_MAGIC_BE, TIFF_MAGIC_LE, TIFF_VERSION};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Seek, SeekFrom, Write};
use std::str::FromStr;
use tracing::debug;

/// Uncompressed strip data
const COMPRESSION_NONE: u16 = 1;

/// How a handle is opened, parsed from a mode string such as `"rmc"`.
///
/// The first character selects reading (`r`) or writing (`w`). Flags:
/// `m`/`M` disable/enable memory mapping, `c`/`C` disable/enable strip
/// chopping, `l`/`b` choose little/big endian output. Unknown flags are
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    /// Open for writing instead of reading
    pub write: bool,
    /// Ask the callbacks for a memory mapping before streaming
    pub map: bool,
    /// Split large strips into smaller ones on read
    pub chop: bool,
    /// Emit big-endian output (write mode)
    pub big_endian: bool,
}

impl OpenMode {
    /// Plain streaming read: no mapping, no chopping
    pub const READ: OpenMode = OpenMode {
        write: false,
        map: false,
        chop: false,
        big_endian: false,
    };

    /// Plain streaming little-endian write
    pub const WRITE: OpenMode = OpenMode {
        write: true,
        map: false,
        chop: false,
        big_endian: false,
    };
}

impl FromStr for OpenMode {
    type Err = TiffError;

    fn from_str(mode: &str) -> Result<Self> {
        let mut chars = mode.chars();
        let write = match chars.next() {
            Some('r') => false,
            Some('w') => true,
            _ => return Err(TiffError::InvalidMode(mode.to_string())),
        };

        let mut parsed = OpenMode {
            write,
            map: !write,
            chop: !write,
            big_endian: false,
        };
        for flag in chars {
            match flag {
                'm' => parsed.map = false,
                'M' => parsed.map = true,
                'c' => parsed.chop = false,
                'C' => parsed.chop = true,
                'l' => parsed.big_endian = false,
                'b' => parsed.big_endian = true,
                _ => {}
            }
        }
        Ok(parsed)
    }
}

/// An open TIFF handle
#[derive(Debug)]
pub struct Tiff<P: ClientProcs = JobProcs> {
    name: String,
    mode: OpenMode,
    procs: P,
    diagnostics: Diagnostics,
    big_endian: bool,
    directory: Ifd,
    directory_index: u32,
    /// Offset of the directory after the current one (read mode)
    next_directory: u32,
    /// Offsets of every directory loaded so far (read mode)
    visited: HashSet<u32>,
    /// Offset of the pointer the next written directory is linked from
    link_offset: u32,
    /// Strips written for the pending directory: index -> (offset, length)
    strips: BTreeMap<u32, (u32, u32)>,
    /// The pending directory has changes not yet written
    dirty: bool,
    closed: bool,
}

impl<P: ClientProcs> Tiff<P> {
    /// Open a handle over `procs`.
    ///
    /// In read mode the header and first directory are parsed; in write mode
    /// a header is emitted. On failure the callbacks' close procedure has
    /// already run, so the backing store is released.
    pub fn client_open(name: &str, mode: OpenMode, procs: P, diagnostics: Diagnostics) -> Result<Self> {
        let mut tiff = Tiff {
            name: name.to_string(),
            mode,
            procs,
            diagnostics,
            big_endian: mode.big_endian,
            directory: Ifd::new(),
            directory_index: 0,
            next_directory: 0,
            visited: HashSet::new(),
            link_offset: 4,
            strips: BTreeMap::new(),
            dirty: false,
            closed: false,
        };

        let opened = if mode.write {
            tiff.write_header()
        } else {
            tiff.read_header()
        };

        match opened {
            Ok(()) => {
                debug!(name, write = mode.write, big_endian = tiff.big_endian, "handle opened");
                Ok(tiff)
            }
            Err(e) => {
                let e = tiff.fatal(e);
                tiff.closed = true;
                let _ = tiff.procs.close();
                Err(e)
            }
        }
    }

    /// Name given at open
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mode given at open
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Byte order of the file
    pub fn is_big_endian(&self) -> bool {
        self.big_endian
    }

    /// Check if [`Tiff::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current directory
    pub fn directory(&self) -> &Ifd {
        &self.directory
    }

    /// Zero-based index of the current directory
    pub fn current_directory(&self) -> u32 {
        self.directory_index
    }

    /// Look up a field in the current directory
    pub fn get_field(&self, tag: u16) -> Option<&IfdValue> {
        self.directory.get_value(tag)
    }

    /// Set a field in the directory being written
    pub fn set_field(&mut self, entry: IfdEntry) -> Result<()> {
        self.require_write()?;
        self.directory.insert(entry);
        self.dirty = true;
        Ok(())
    }

    /// Advance to the next directory. Returns `false` after the last one.
    pub fn read_directory(&mut self) -> Result<bool> {
        self.require_read()?;
        if self.next_directory == 0 {
            return Ok(false);
        }
        let offset = self.next_directory;
        if self.visited.contains(&offset) {
            return Err(self.fatal_message(format!(
                "IFD looping detected: directory at offset {} already read",
                offset
            )));
        }
        self.load_directory(offset).map_err(|e| self.fatal(e))?;
        self.directory_index += 1;
        Ok(true)
    }

    /// Number of strips in the current directory
    pub fn number_of_strips(&self) -> u32 {
        if !self.mode.write {
            return self
                .directory
                .get_value(tag::STRIP_OFFSETS)
                .map(|v| v.count())
                .unwrap_or(0);
        }
        let height = self.directory.get_u32_or(tag::IMAGE_LENGTH, 0);
        let rows = self.directory.get_u32_or(tag::ROWS_PER_STRIP, 0);
        match (height, rows) {
            (0, _) | (_, 0) => self.strips.len() as u32,
            (h, r) => h.div_ceil(r),
        }
    }

    /// Read one raw strip of the current directory
    pub fn read_encoded_strip(&mut self, index: u32) -> Result<Vec<u8>> {
        self.require_read()?;

        let compression = self.directory.get_u16_or(tag::COMPRESSION, COMPRESSION_NONE);
        if compression != COMPRESSION_NONE {
            return Err(self.fatal_message(format!(
                "Compression scheme {} is not implemented",
                compression
            )));
        }

        let offsets = self.required_longs(tag::STRIP_OFFSETS)?;
        let counts = self.required_longs(tag::STRIP_BYTE_COUNTS)?;
        let count = offsets.len().min(counts.len()) as u32;
        if index >= count {
            return Err(TiffError::InvalidStrip { index, count });
        }

        let offset = offsets[index as usize] as u64;
        let expected = counts[index as usize] as usize;
        let stream_len = self.procs.size();
        if offset + expected as u64 > stream_len {
            return Err(self.fatal_message(format!(
                "Strip {} at offset {} with {} bytes lies beyond end of data ({})",
                index, offset, expected, stream_len
            )));
        }
        let mut data = vec![0u8; expected];
        let mut got = 0;

        {
            let mut io = ProcIo::new(&mut self.procs);
            if io.seek(SeekFrom::Start(offset)).is_ok() {
                while got < expected {
                    match io.read(&mut data[got..]) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => got += n,
                    }
                }
            }
        }

        if got < expected {
            return Err(self.fatal_message(format!(
                "Read error on strip {}; got {} bytes, expected {}",
                index, got, expected
            )));
        }
        Ok(data)
    }

    /// Append one raw strip to the directory being written
    pub fn write_encoded_strip(&mut self, index: u32, data: &[u8]) -> Result<usize> {
        self.require_write()?;
        self.check_strip_index(index)?;
        let written = self.append(data).map_err(|e| {
            self.fatal_message(format!("Write error at strip {}: {}", index, e))
        })?;
        self.strips.insert(index, (written, data.len() as u32));
        self.dirty = true;
        Ok(data.len())
    }

    /// Write the pending directory and start a new, empty one
    pub fn write_directory(&mut self) -> Result<()> {
        self.require_write()?;
        self.flush_directory()
    }

    fn flush_directory(&mut self) -> Result<()> {
        for (t, name) in [(tag::IMAGE_WIDTH, "ImageWidth"), (tag::IMAGE_LENGTH, "ImageLength")] {
            if self.directory.get_value(t).is_none() {
                return Err(TiffError::MissingTag(name.to_string()));
            }
        }

        // fields may have changed since the strips were written
        if let Some(&index) = self.strips.keys().next_back() {
            self.check_strip_index(index)?;
        }

        let mut ifd = std::mem::take(&mut self.directory);
        let strips = std::mem::take(&mut self.strips);
        let strip_count = strips.keys().next_back().map_or(0, |&last| last + 1);
        let mut offsets = vec![0u32; strip_count as usize];
        let mut counts = vec![0u32; strip_count as usize];
        for (index, (offset, length)) in strips {
            offsets[index as usize] = offset;
            counts[index as usize] = length;
        }
        if ifd.get_value(tag::COMPRESSION).is_none() {
            ifd.insert(IfdEntry::short(tag::COMPRESSION, COMPRESSION_NONE));
        }
        if ifd.get_value(tag::ROWS_PER_STRIP).is_none() && strip_count <= 1 {
            let height = ifd.get_u32_or(tag::IMAGE_LENGTH, 0);
            ifd.insert(IfdEntry::long(tag::ROWS_PER_STRIP, height));
        }
        ifd.insert(IfdEntry::new(tag::STRIP_OFFSETS, IfdValue::Longs(offsets)));
        ifd.insert(IfdEntry::new(tag::STRIP_BYTE_COUNTS, IfdValue::Longs(counts)));

        self.emit_directory(&ifd).map_err(|e| self.fatal(e))?;
        self.dirty = false;
        self.directory_index += 1;
        Ok(())
    }

    /// Flush a pending directory (write mode) and run the close callback.
    /// Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let flushed = if self.mode.write && self.dirty {
            self.flush_directory()
        } else {
            Ok(())
        };
        self.closed = true;
        let released = self.procs.close();
        debug!(name = %self.name, "handle closed");
        flushed.and(released)
    }

    /// Give back the callback set
    pub fn into_procs(self) -> P {
        self.procs
    }

    fn read_header(&mut self) -> Result<()> {
        if self.mode.map && self.procs.map_file().is_none() {
            debug!("mapping unavailable, streaming instead");
        }

        let mut io = ProcIo::new(&mut self.procs);
        io.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 2];
        io.read_exact(&mut magic)
            .map_err(|_| TiffError::InvalidIfd("Cannot read TIFF header".into()))?;

        self.big_endian = if magic == TIFF_MAGIC_LE {
            false
        } else if magic == TIFF_MAGIC_BE {
            true
        } else {
            let raw = u16::from_le_bytes(magic);
            return Err(TiffError::InvalidIfd(format!(
                "Not a TIFF file, bad magic number {} (0x{:x})",
                raw, raw
            )));
        };

        let (version, first) = if self.big_endian {
            (io.read_u16::<BigEndian>()?, io.read_u32::<BigEndian>()?)
        } else {
            (io.read_u16::<LittleEndian>()?, io.read_u32::<LittleEndian>()?)
        };
        if version != TIFF_VERSION {
            return Err(TiffError::UnsupportedVersion { version });
        }

        self.load_directory(first)
    }

    fn write_header(&mut self) -> Result<()> {
        let mut io = ProcIo::new(&mut self.procs);
        io.seek(SeekFrom::Start(0))?;
        if self.big_endian {
            io.write_all(&TIFF_MAGIC_BE)?;
            io.write_u16::<BigEndian>(TIFF_VERSION)?;
            io.write_u32::<BigEndian>(0)?;
        } else {
            io.write_all(&TIFF_MAGIC_LE)?;
            io.write_u16::<LittleEndian>(TIFF_VERSION)?;
            io.write_u32::<LittleEndian>(0)?;
        }
        Ok(())
    }

    fn load_directory(&mut self, offset: u32) -> Result<()> {
        let stream_len = self.procs.size();
        let mut io = ProcIo::new(&mut self.procs);
        let (mut ifd, skipped) = if self.big_endian {
            Ifd::read::<_, BigEndian>(&mut io, offset, stream_len)?
        } else {
            Ifd::read::<_, LittleEndian>(&mut io, offset, stream_len)?
        };

        let module = "TIFFReadDirectory";
        for raw in skipped {
            if let RawEntry::UnknownType { tag, type_id } = raw {
                self.diagnostics.warning(
                    module,
                    &format!("Wrong data type {} for tag {}; tag ignored", type_id, tag),
                );
            }
        }
        for entry in ifd.entries() {
            if tag_name(entry.tag).is_none() {
                self.diagnostics.warning(
                    module,
                    &format!("Unknown field with tag {} (0x{:x}) encountered", entry.tag, entry.tag),
                );
            }
        }
        self.infer_extra_samples(&mut ifd);

        self.visited.insert(offset);
        self.next_directory = ifd.next_ifd_offset;
        self.directory = ifd;
        Ok(())
    }

    /// Samples beyond what the photometric interpretation accounts for are
    /// declared as unspecified extra samples.
    fn infer_extra_samples(&self, ifd: &mut Ifd) {
        if ifd.get_value(tag::EXTRA_SAMPLES).is_some() {
            return;
        }
        let color_channels = match ifd.get_u16_or(tag::PHOTOMETRIC, 1) {
            0 | 1 | 3 => 1,
            2 | 6 => 3,
            5 => 4,
            _ => return,
        };
        let samples = ifd.get_u16_or(tag::SAMPLES_PER_PIXEL, 1);
        if samples > color_channels {
            self.diagnostics.warning(
                "TIFFReadDirectory",
                "Sum of Photometric type-related color channels and ExtraSamples doesn't match SamplesPerPixel. Defining non-color channels as ExtraSamples.",
            );
            let extra = vec![0u16; (samples - color_channels) as usize];
            ifd.insert(IfdEntry::new(tag::EXTRA_SAMPLES, IfdValue::Shorts(extra)));
        }
    }

    /// Write `data` at the end of the stream, word aligned; returns its offset.
    fn append(&mut self, data: &[u8]) -> Result<u32> {
        let mut io = ProcIo::new(&mut self.procs);
        let mut end = io.seek(SeekFrom::End(0))?;
        if end % 2 != 0 {
            io.write_all(&[0])?;
            end += 1;
        }
        let offset = u32::try_from(end)
            .map_err(|_| TiffError::InvalidIfd("file exceeds 4 GiB".into()))?;
        io.write_all(data)?;
        Ok(offset)
    }

    fn emit_directory(&mut self, ifd: &Ifd) -> Result<()> {
        let ifd_start = self.append(&[])?;
        let mut io = ProcIo::new(&mut self.procs);
        io.seek(SeekFrom::Start(ifd_start as u64))?;
        let (start, next_pointer) = if self.big_endian {
            ifd.write::<_, BigEndian>(&mut io)?
        } else {
            ifd.write::<_, LittleEndian>(&mut io)?
        };

        io.seek(SeekFrom::Start(self.link_offset as u64))?;
        let mut link = [0u8; 4];
        if self.big_endian {
            BigEndian::write_u32(&mut link, start);
        } else {
            LittleEndian::write_u32(&mut link, start);
        }
        io.write_all(&link)?;

        self.link_offset = next_pointer;
        debug!(offset = start, entries = ifd.len(), "directory written");
        Ok(())
    }

    fn required_longs(&self, t: u16) -> Result<Vec<u32>> {
        self.directory
            .get_value(t)
            .and_then(|v| v.as_u32_vec())
            .ok_or_else(|| {
                self.fatal_message(format!(
                    "TIFF directory is missing required \"{}\" field",
                    tag_name(t).unwrap_or("unknown")
                ))
            })
    }

    fn require_write(&self) -> Result<()> {
        if self.closed {
            Err(TiffError::Closed)
        } else if self.mode.write {
            Ok(())
        } else {
            Err(TiffError::WrongMode("write"))
        }
    }

    fn require_read(&self) -> Result<()> {
        if self.closed {
            Err(TiffError::Closed)
        } else if self.mode.write {
            Err(TiffError::WrongMode("read"))
        } else {
            Ok(())
        }
    }

    /// Strips a directory may hold: one per `RowsPerStrip` rows of
    /// `ImageLength`, or a single strip when `RowsPerStrip` is unset.
    fn strip_limit(&self) -> Option<u32> {
        let height = self.directory.get_u32_or(tag::IMAGE_LENGTH, 0);
        if height == 0 {
            return None;
        }
        let rows = self.directory.get_u32_or(tag::ROWS_PER_STRIP, height).max(1);
        Some(height.div_ceil(rows))
    }

    fn check_strip_index(&self, index: u32) -> Result<()> {
        match self.strip_limit() {
            Some(count) if index >= count => Err(TiffError::InvalidStrip { index, count }),
            None if index == u32::MAX => Err(TiffError::InvalidStrip { index, count: u32::MAX }),
            _ => Ok(()),
        }
    }

    fn fatal_message(&self, message: String) -> TiffError {
        TiffError::fatal(self.name.clone(), message)
    }

    /// Promote an error raised while parsing or emitting structure to fatal
    fn fatal(&self, e: TiffError) -> TiffError {
        if e.is_fatal() {
            e
        } else {
            self.fatal_message(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::job::StreamJob;
    use std::sync::Arc;

    fn diagnostics() -> (Arc<CollectingSink>, Diagnostics) {
        let sink = Arc::new(CollectingSink::new());
        (sink.clone(), Diagnostics::new(sink, Vec::new()))
    }

    fn encode(pixels: &[u8], width: u32, height: u32, mode: OpenMode) -> Vec<u8> {
        let (_, diag) = diagnostics();
        let procs = JobProcs::new(StreamJob::buffer(), diag.clone(), "test").release_buffer_on_close(false);
        let mut tiff = Tiff::client_open("test", mode, procs, diag).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_WIDTH, width)).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, height)).unwrap();
        tiff.set_field(IfdEntry::short(tag::BITS_PER_SAMPLE, 8)).unwrap();
        tiff.set_field(IfdEntry::short(tag::PHOTOMETRIC, 1)).unwrap();
        tiff.write_encoded_strip(0, pixels).unwrap();
        tiff.close().unwrap();
        tiff.into_procs().into_job().into_bytes().unwrap()
    }

    fn open_read(bytes: Vec<u8>) -> Result<Tiff> {
        let (_, diag) = diagnostics();
        let procs = JobProcs::new(StreamJob::from_bytes(bytes), diag.clone(), "test");
        Tiff::client_open("test", OpenMode::READ, procs, diag)
    }

    #[test]
    fn test_mode_parsing() {
        let mode: OpenMode = "rmc".parse().unwrap();
        assert_eq!(mode, OpenMode::READ);
        let mode: OpenMode = "r".parse().unwrap();
        assert!(mode.map && mode.chop && !mode.write);
        let mode: OpenMode = "wb".parse().unwrap();
        assert!(mode.write && mode.big_endian);
        assert!("a".parse::<OpenMode>().is_err());
        assert!("".parse::<OpenMode>().is_err());
    }

    #[test]
    fn test_write_then_read_strip() {
        let pixels: Vec<u8> = (0..12).collect();
        let bytes = encode(&pixels, 4, 3, OpenMode::WRITE);
        assert_eq!(&bytes[..4], b"II*\0");

        let mut tiff = open_read(bytes).unwrap();
        assert_eq!(tiff.get_field(tag::IMAGE_WIDTH).and_then(|v| v.as_u32()), Some(4));
        assert_eq!(tiff.get_field(tag::ROWS_PER_STRIP).and_then(|v| v.as_u32()), Some(3));
        assert_eq!(tiff.number_of_strips(), 1);
        assert_eq!(tiff.read_encoded_strip(0).unwrap(), pixels);
        assert!(!tiff.read_directory().unwrap());
    }

    #[test]
    fn test_big_endian_output() {
        let bytes = encode(&[9, 8, 7, 6], 2, 2, "wb".parse().unwrap());
        assert_eq!(&bytes[..4], b"MM\0*");
        let mut tiff = open_read(bytes).unwrap();
        assert!(tiff.is_big_endian());
        assert_eq!(tiff.read_encoded_strip(0).unwrap(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_multiple_directories() {
        let (_, diag) = diagnostics();
        let procs = JobProcs::new(StreamJob::buffer(), diag.clone(), "test").release_buffer_on_close(false);
        let mut tiff = Tiff::client_open("test", OpenMode::WRITE, procs, diag).unwrap();
        for page in 0..3u8 {
            tiff.set_field(IfdEntry::long(tag::IMAGE_WIDTH, 1)).unwrap();
            tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, 1)).unwrap();
            tiff.write_encoded_strip(0, &[page]).unwrap();
            tiff.write_directory().unwrap();
        }
        tiff.close().unwrap();
        let bytes = tiff.into_procs().into_job().into_bytes().unwrap();

        let mut tiff = open_read(bytes).unwrap();
        let mut pages = vec![tiff.read_encoded_strip(0).unwrap()];
        while tiff.read_directory().unwrap() {
            pages.push(tiff.read_encoded_strip(0).unwrap());
        }
        assert_eq!(pages, vec![vec![0], vec![1], vec![2]]);
        assert_eq!(tiff.current_directory(), 2);
    }

    #[test]
    fn test_bad_magic_is_fatal_and_releases() {
        let err = open_read(b"GIF89a\0\0".to_vec()).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("bad magic number"));
    }

    #[test]
    fn test_truncated_file_is_fatal() {
        let mut bytes = encode(&[1; 64], 8, 8, OpenMode::WRITE);
        // the directory follows the strip, so cutting into the strip loses it
        bytes.truncate(8 + 10);
        assert!(open_read(bytes).unwrap_err().is_fatal());
    }

    #[test]
    fn test_wrong_mode() {
        let bytes = encode(&[1, 2, 3, 4], 2, 2, OpenMode::WRITE);
        let mut tiff = open_read(bytes).unwrap();
        assert!(matches!(
            tiff.set_field(IfdEntry::short(tag::ORIENTATION, 1)),
            Err(TiffError::WrongMode("write"))
        ));
        assert!(matches!(
            tiff.read_encoded_strip(5),
            Err(TiffError::InvalidStrip { index: 5, count: 1 })
        ));
    }

    #[test]
    fn test_unknown_tag_warns() {
        let (sink, diag) = diagnostics();
        let procs = JobProcs::new(StreamJob::buffer(), diag.clone(), "test").release_buffer_on_close(false);
        let mut tiff = Tiff::client_open("test", OpenMode::WRITE, procs, diag).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_WIDTH, 1)).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, 1)).unwrap();
        tiff.set_field(IfdEntry::short(40000, 7)).unwrap();
        tiff.write_encoded_strip(0, &[0]).unwrap();
        tiff.close().unwrap();
        let bytes = tiff.into_procs().into_job().into_bytes().unwrap();

        let read_diag = Diagnostics::new(sink.clone(), Vec::new());
        let procs = JobProcs::new(StreamJob::from_bytes(bytes), read_diag.clone(), "test");
        let tiff = Tiff::client_open("test", OpenMode::READ, procs, read_diag).unwrap();
        assert_eq!(tiff.get_field(40000).and_then(|v| v.as_u16()), Some(7));
        assert!(sink
            .messages()
            .iter()
            .any(|m| m.contains("Unknown field with tag 40000")));
    }

    #[test]
    fn test_extra_samples_inferred() {
        let (sink, diag) = diagnostics();
        let procs = JobProcs::new(StreamJob::buffer(), diag.clone(), "test").release_buffer_on_close(false);
        let mut tiff = Tiff::client_open("test", OpenMode::WRITE, procs, diag).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_WIDTH, 1)).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, 1)).unwrap();
        tiff.set_field(IfdEntry::short(tag::PHOTOMETRIC, 2)).unwrap();
        tiff.set_field(IfdEntry::short(tag::SAMPLES_PER_PIXEL, 4)).unwrap();
        tiff.write_encoded_strip(0, &[1, 2, 3, 4]).unwrap();
        tiff.close().unwrap();
        let bytes = tiff.into_procs().into_job().into_bytes().unwrap();

        let read_diag = Diagnostics::new(sink.clone(), Vec::new());
        let procs = JobProcs::new(StreamJob::from_bytes(bytes), read_diag.clone(), "test");
        let tiff = Tiff::client_open("test", OpenMode::READ, procs, read_diag).unwrap();
        assert_eq!(
            tiff.get_field(tag::EXTRA_SAMPLES),
            Some(&IfdValue::Shorts(vec![0]))
        );
        assert!(sink.messages().iter().any(|m| m.contains("ExtraSamples")));
    }

    #[test]
    fn test_mapping_request_falls_back() {
        let bytes = encode(&[5; 4], 2, 2, OpenMode::WRITE);
        let (sink, diag) = diagnostics();
        let procs = JobProcs::new(StreamJob::from_bytes(bytes), diag.clone(), "test");
        let mut tiff = Tiff::client_open("test", "r".parse().unwrap(), procs, diag).unwrap();
        assert_eq!(tiff.read_encoded_strip(0).unwrap(), vec![5; 4]);
        assert!(sink.messages().iter().any(|m| m.contains("map callback")));
    }

    /// Offset of the first directory and the position of each of its entries
    fn first_directory(bytes: &[u8]) -> (usize, Vec<usize>) {
        let ifd = LittleEndian::read_u32(&bytes[4..8]) as usize;
        let count = LittleEndian::read_u16(&bytes[ifd..ifd + 2]) as usize;
        (ifd, (0..count).map(|i| ifd + 2 + 12 * i).collect())
    }

    fn patch_value(bytes: &mut [u8], t: u16, value: u32) {
        let (_, entries) = first_directory(bytes);
        let entry = entries
            .into_iter()
            .find(|&e| LittleEndian::read_u16(&bytes[e..e + 2]) == t)
            .unwrap();
        LittleEndian::write_u32(&mut bytes[entry + 8..entry + 12], value);
    }

    #[test]
    fn test_close_flushes_pending_directory() {
        let (_, diag) = diagnostics();
        let procs = JobProcs::new(StreamJob::buffer(), diag.clone(), "test").release_buffer_on_close(false);
        let mut tiff = Tiff::client_open("test", OpenMode::WRITE, procs, diag).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_WIDTH, 2)).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, 1)).unwrap();
        tiff.write_encoded_strip(0, &[3, 4]).unwrap();
        tiff.close().unwrap();
        assert!(tiff.is_closed());
        assert!(matches!(tiff.write_directory(), Err(TiffError::Closed)));

        let bytes = tiff.into_procs().into_job().into_bytes().unwrap();
        let mut tiff = open_read(bytes).unwrap();
        assert_eq!(tiff.read_encoded_strip(0).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_self_linked_directory_is_fatal() {
        let mut bytes = encode(&[1, 2], 2, 1, OpenMode::WRITE);
        let (ifd, entries) = first_directory(&bytes);
        let next = entries.last().unwrap() + 12;
        LittleEndian::write_u32(&mut bytes[next..next + 4], ifd as u32);

        let mut tiff = open_read(bytes).unwrap();
        let err = tiff.read_directory().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("IFD looping detected"));
    }

    #[test]
    fn test_strip_beyond_data_is_fatal() {
        let mut bytes = encode(&[7; 6], 3, 2, OpenMode::WRITE);
        let len = bytes.len();
        patch_value(&mut bytes, tag::STRIP_OFFSETS, 64 << 20);

        let mut tiff = open_read(bytes).unwrap();
        let err = tiff.read_encoded_strip(0).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("beyond end of data"));
        let buffer = tiff.into_procs().into_job();
        assert_eq!(buffer.as_buffer().map(|b| b.capacity()), Some(len));
    }

    #[test]
    fn test_strip_index_bounded_by_rows() {
        let (_, diag) = diagnostics();
        let procs = JobProcs::new(StreamJob::buffer(), diag.clone(), "test").release_buffer_on_close(false);
        let mut tiff = Tiff::client_open("test", OpenMode::WRITE, procs, diag).unwrap();
        assert!(matches!(
            tiff.write_encoded_strip(u32::MAX, &[1]),
            Err(TiffError::InvalidStrip { .. })
        ));

        tiff.set_field(IfdEntry::long(tag::IMAGE_WIDTH, 1)).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, 4)).unwrap();
        tiff.set_field(IfdEntry::long(tag::ROWS_PER_STRIP, 2)).unwrap();
        tiff.write_encoded_strip(1, &[1, 2]).unwrap();
        assert!(matches!(
            tiff.write_encoded_strip(2, &[3, 4]),
            Err(TiffError::InvalidStrip { index: 2, count: 2 })
        ));

        // shrinking the image after the fact is caught at flush time
        tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, 2)).unwrap();
        assert!(matches!(
            tiff.write_directory(),
            Err(TiffError::InvalidStrip { index: 1, count: 1 })
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let bytes = encode(&[1], 1, 1, OpenMode::WRITE);
        let mut tiff = open_read(bytes).unwrap();
        tiff.close().unwrap();
        tiff.close().unwrap();
        assert!(tiff.is_closed());
        assert!(tiff.into_procs().job().is_released());
    }
}
