// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Positioned byte stream over a single file with a switchable compressed
//! write stage.
//!
//! While a compressed stage is active, written bytes are fed to the
//! encoder and the compressed blob lands on disk when the stage is flushed
//! (the next transition back to [`Compression::None`]). [`ChunkedFile::tell`]
//! always reports the raw file offset, so back-patching record headers
//! after a flush works on plain file positions.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::core::{BagError, Compression, Result};

enum WriteStage {
    Raw,
    Bz2(BzEncoder<Vec<u8>>),
    Zlib(ZlibEncoder<Vec<u8>>),
}

impl std::fmt::Debug for WriteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteStage::Raw => f.write_str("WriteStage::Raw"),
            WriteStage::Bz2(_) => f.write_str("WriteStage::Bz2(..)"),
            WriteStage::Zlib(_) => f.write_str("WriteStage::Zlib(..)"),
        }
    }
}

/// A single file with tracked raw offset and an optional compression stage
/// on the write side.
#[derive(Debug)]
pub struct ChunkedFile {
    file: File,
    path: PathBuf,
    offset: u64,
    stage: WriteStage,
    bytes_in: u32,
}

impl ChunkedFile {
    /// Open an existing file for reading.
    pub fn open_read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| BagError::io("ChunkedFile::open_read", e))?;
        Ok(Self::from_file(file, path.as_ref()))
    }

    /// Create (or truncate) a file for writing.
    pub fn open_write<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(|e| BagError::io("ChunkedFile::open_write", e))?;
        Ok(Self::from_file(file, path.as_ref()))
    }

    /// Open an existing file for reading and writing.
    pub fn open_read_write<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(|e| BagError::io("ChunkedFile::open_read_write", e))?;
        Ok(Self::from_file(file, path.as_ref()))
    }

    fn from_file(file: File, path: &Path) -> Self {
        ChunkedFile {
            file,
            path: path.to_path_buf(),
            offset: 0,
            stage: WriteStage::Raw,
            bytes_in: 0,
        }
    }

    /// Path this file was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current raw file offset.
    pub fn tell(&self) -> u64 {
        self.offset
    }

    /// Current file length in bytes.
    pub fn len(&self) -> Result<u64> {
        let meta = self
            .file
            .metadata()
            .map_err(|e| BagError::io("ChunkedFile::len", e))?;
        Ok(meta.len())
    }

    /// Active write-side compression mode.
    pub fn write_mode(&self) -> Compression {
        match self.stage {
            WriteStage::Raw => Compression::None,
            WriteStage::Bz2(_) => Compression::Bz2,
            WriteStage::Zlib(_) => Compression::Zlib,
        }
    }

    /// Uncompressed bytes fed into the current compressed stage since the
    /// last mode transition.
    pub fn compressed_bytes_in(&self) -> u32 {
        self.bytes_in
    }

    /// Write bytes through the active stage.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        match &mut self.stage {
            WriteStage::Raw => {
                self.file
                    .write_all(buf)
                    .map_err(|e| BagError::io("ChunkedFile::write", e))?;
                self.offset += buf.len() as u64;
            }
            WriteStage::Bz2(enc) => {
                enc.write_all(buf)
                    .map_err(|e| BagError::io("ChunkedFile::write", e))?;
                self.bytes_in += buf.len() as u32;
            }
            WriteStage::Zlib(enc) => {
                enc.write_all(buf)
                    .map_err(|e| BagError::io("ChunkedFile::write", e))?;
                self.bytes_in += buf.len() as u32;
            }
        }
        Ok(())
    }

    /// Switch the write-side compression mode.
    ///
    /// Leaving a compressed mode finishes the encoder and writes the
    /// compressed stream to the file. The uncompressed-bytes-in counter
    /// resets on every transition.
    pub fn set_write_mode(&mut self, mode: Compression) -> Result<()> {
        if mode == self.write_mode() {
            return Ok(());
        }

        let stage = std::mem::replace(&mut self.stage, WriteStage::Raw);
        let flushed = match stage {
            WriteStage::Raw => None,
            WriteStage::Bz2(enc) => Some(
                enc.finish()
                    .map_err(|e| BagError::io("ChunkedFile::set_write_mode", e))?,
            ),
            WriteStage::Zlib(enc) => Some(
                enc.finish()
                    .map_err(|e| BagError::io("ChunkedFile::set_write_mode", e))?,
            ),
        };
        if let Some(data) = flushed {
            self.file
                .write_all(&data)
                .map_err(|e| BagError::io("ChunkedFile::set_write_mode", e))?;
            self.offset += data.len() as u64;
        }

        self.bytes_in = 0;
        self.stage = match mode {
            Compression::None => WriteStage::Raw,
            Compression::Bz2 => {
                WriteStage::Bz2(BzEncoder::new(Vec::new(), bzip2::Compression::default()))
            }
            Compression::Zlib => {
                WriteStage::Zlib(ZlibEncoder::new(Vec::new(), flate2::Compression::default()))
            }
        };
        Ok(())
    }

    /// Read exactly `buf.len()` bytes at the current offset.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                BagError::bad_format("ChunkedFile::read_exact", "unexpected end of file")
            } else {
                BagError::io("ChunkedFile::read_exact", e)
            }
        })?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Read through the next `\n`, returning the line without it.
    pub fn getline(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self
                .file
                .read(&mut byte)
                .map_err(|e| BagError::io("ChunkedFile::getline", e))?;
            if n == 0 {
                break;
            }
            self.offset += 1;
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8(line)
            .map_err(|_| BagError::bad_format("ChunkedFile::getline", "line is not valid UTF-8"))
    }

    /// Seek to a raw file position. The compressed stage must be flushed
    /// first; seeking with an open encoder would interleave its output.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if !matches!(self.stage, WriteStage::Raw) {
            return Err(BagError::invariant_violation(
                "seek while a compressed write stream is open",
            ));
        }
        self.offset = self
            .file
            .seek(pos)
            .map_err(|e| BagError::io("ChunkedFile::seek", e))?;
        Ok(self.offset)
    }

    /// Truncate the file to `size` bytes. The offset is unchanged.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        if !matches!(self.stage, WriteStage::Raw) {
            return Err(BagError::invariant_violation(
                "truncate while a compressed write stream is open",
            ));
        }
        self.file
            .set_len(size)
            .map_err(|e| BagError::io("ChunkedFile::truncate", e))
    }

    /// Flush buffered writes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| BagError::io("ChunkedFile::flush", e))
    }
}

/// Decompress `src` into a buffer of exactly `uncompressed_size` bytes.
pub fn decompress(mode: Compression, src: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(uncompressed_size);
    match mode {
        Compression::None => out.extend_from_slice(src),
        Compression::Bz2 => {
            BzDecoder::new(src)
                .read_to_end(&mut out)
                .map_err(|e| BagError::io("decompress", format!("bz2: {e}")))?;
        }
        Compression::Zlib => {
            ZlibDecoder::new(src)
                .read_to_end(&mut out)
                .map_err(|e| BagError::io("decompress", format!("zlib: {e}")))?;
        }
    }
    if out.len() != uncompressed_size {
        return Err(BagError::bad_format(
            "decompress",
            format!(
                "decompressed to {} bytes, chunk header declared {uncompressed_size}",
                out.len()
            ),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_file(dir: &TempDir) -> PathBuf {
        dir.path().join("test.bag")
    }

    #[test]
    fn test_write_seek_read() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir);

        let mut file = ChunkedFile::open_write(&path).unwrap();
        file.write(b"hello world").unwrap();
        assert_eq!(file.tell(), 11);

        file.seek(SeekFrom::Start(6)).unwrap();
        assert_eq!(file.tell(), 6);

        let mut buf = [0u8; 5];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(file.tell(), 11);
    }

    #[test]
    fn test_getline() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir);

        let mut file = ChunkedFile::open_write(&path).unwrap();
        file.write(b"#ROSBAG V1.3\nrest").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        assert_eq!(file.getline().unwrap(), "#ROSBAG V1.3");
        assert_eq!(file.tell(), 13);
    }

    #[test]
    fn test_truncate() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir);

        let mut file = ChunkedFile::open_write(&path).unwrap();
        file.write(b"0123456789").unwrap();
        file.truncate(4).unwrap();
        assert_eq!(file.len().unwrap(), 4);
    }

    #[test]
    fn test_compressed_round_trip_bz2() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir);

        let payload = vec![0xABu8; 4096];
        let mut file = ChunkedFile::open_write(&path).unwrap();
        let start = file.tell();
        file.set_write_mode(Compression::Bz2).unwrap();
        file.write(&payload).unwrap();
        assert_eq!(file.compressed_bytes_in(), 4096);
        // Offset does not advance until the stage is flushed
        assert_eq!(file.tell(), start);

        file.set_write_mode(Compression::None).unwrap();
        let compressed_size = (file.tell() - start) as usize;
        assert!(compressed_size > 0);
        assert_eq!(file.compressed_bytes_in(), 0);

        file.seek(SeekFrom::Start(start)).unwrap();
        let mut blob = vec![0u8; compressed_size];
        file.read_exact(&mut blob).unwrap();

        let restored = decompress(Compression::Bz2, &blob, payload.len()).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_compressed_round_trip_zlib() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir);

        let payload = b"zlib round trip payload".repeat(64);
        let mut file = ChunkedFile::open_write(&path).unwrap();
        file.set_write_mode(Compression::Zlib).unwrap();
        file.write(&payload).unwrap();
        file.set_write_mode(Compression::None).unwrap();
        let compressed_size = file.tell() as usize;

        file.seek(SeekFrom::Start(0)).unwrap();
        let mut blob = vec![0u8; compressed_size];
        file.read_exact(&mut blob).unwrap();

        let restored = decompress(Compression::Zlib, &blob, payload.len()).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_seek_rejected_while_compressed() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir);

        let mut file = ChunkedFile::open_write(&path).unwrap();
        file.set_write_mode(Compression::Bz2).unwrap();
        let err = file.seek(SeekFrom::Start(0)).unwrap_err();
        assert!(matches!(err, BagError::InvariantViolation { .. }));
    }

    #[test]
    fn test_decompress_size_mismatch() {
        let mut enc = BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(b"abcdef").unwrap();
        let blob = enc.finish().unwrap();

        let err = decompress(Compression::Bz2, &blob, 100).unwrap_err();
        assert!(matches!(err, BagError::BadFormat { .. }));
    }

    #[test]
    fn test_decompress_none_copies() {
        let out = decompress(Compression::None, b"raw", 3).unwrap();
        assert_eq!(out, b"raw");
    }

    #[test]
    fn test_read_past_eof() {
        let dir = TempDir::new().unwrap();
        let path = temp_file(&dir);

        let mut file = ChunkedFile::open_write(&path).unwrap();
        file.write(b"ab").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 8];
        let err = file.read_exact(&mut buf).unwrap_err();
        assert!(matches!(err, BagError::BadFormat { .. }));
    }
}
