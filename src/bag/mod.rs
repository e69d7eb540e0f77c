// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! The bag engine: a versioned, append-oriented, chunked binary log of
//! time-stamped typed messages on named topics.
//!
//! A [`Bag`] is opened in one of four modes ([`BagMode`]). In `Write` the
//! engine buffers messages into compressed chunks, maintains per-topic
//! indexes, and finalizes a trailer (message definitions plus a chunk
//! directory) on [`Bag::close`]. In `Read` the trailer is loaded up front
//! and messages are served through cheap [`MessageHandle`]s that
//! decompress chunks on demand. `Append` reopens a finished bag, discards
//! the trailer, and continues writing.
//!
//! # Example
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use robobag::{Bag, BagMode, BagTime, MessageSchema};
//!
//! let mut bag = Bag::open("out.bag", BagMode::Write)?;
//! let schema = MessageSchema {
//!     datatype: "std_msgs/String",
//!     md5sum: "992ce8a1687cec8c8bd883ec73ca41d1",
//!     definition: "string data",
//! };
//! bag.write("/chatter", BagTime::new(10, 0), b"hello", schema)?;
//! bag.close()?;
//!
//! let bag = Bag::open("out.bag", BagMode::Read)?;
//! for handle in bag.get_messages_by_topic(&["/chatter"], BagTime::ZERO, BagTime::MAX) {
//!     let payload = handle.instantiate()?;
//!     println!("{} @ {}: {} bytes", handle.topic(), handle.time(), payload.len());
//! }
//! # Ok(())
//! # }
//! ```

mod query;
mod reader;
mod writer;

pub use query::MessageHandle;

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::core::{
    BagError, BagMode, BagTime, ChunkInfo, Compression, IndexEntry, Result, TopicInfo,
};
use crate::io::{ChunkedFile, DiskGuard};

/// Default chunk threshold (768 KiB).
pub const DEFAULT_CHUNK_THRESHOLD: u32 = 768 * 1024;

/// Schema metadata supplied with each write.
///
/// The engine treats the payload as opaque bytes; these strings identify
/// and describe the topic's message type. They are fixed by the first
/// write on a topic.
#[derive(Debug, Clone, Copy)]
pub struct MessageSchema<'a> {
    /// Message datatype (e.g. "sensor_msgs/LaserScan")
    pub datatype: &'a str,
    /// 32-character hex hash of the message definition
    pub md5sum: &'a str,
    /// Message definition text
    pub definition: &'a str,
}

/// Adapter for callers whose message types carry their own schema.
pub trait MessageRecord {
    /// Message datatype name.
    fn datatype(&self) -> &str;
    /// 32-character hex hash of the message definition.
    fn md5sum(&self) -> &str;
    /// Message definition text.
    fn definition(&self) -> &str;
    /// Serialized payload bytes.
    fn payload(&self) -> &[u8];
}

/// Mutable I/O state shared between the write path (`&mut Bag`) and read
/// handles (`&Bag`): the file plus the one-chunk decompression cache.
#[derive(Debug)]
pub(crate) struct BagIo {
    pub(crate) file: ChunkedFile,
    /// Chunk position of the cached decompressed chunk
    pub(crate) decompressed_chunk: Option<u64>,
    pub(crate) decompress_buffer: Vec<u8>,
}

/// A bag file open for reading or writing.
///
/// Not safe for concurrent `write` calls or concurrent iteration from
/// multiple threads; callers must serialize access.
#[derive(Debug)]
pub struct Bag {
    mode: BagMode,
    /// Format version as major * 100 + minor (103 = v1.3)
    version: u32,
    compression: Compression,
    chunk_threshold: u32,

    pub(crate) file_header_pos: u64,
    pub(crate) index_data_pos: u64,
    pub(crate) topic_count: u32,
    pub(crate) chunk_count: u32,

    pub(crate) topic_infos: BTreeMap<String, TopicInfo>,
    pub(crate) topic_indexes: BTreeMap<String, Vec<IndexEntry>>,
    pub(crate) chunk_infos: Vec<ChunkInfo>,

    pub(crate) chunk_open: bool,
    pub(crate) curr_chunk_info: ChunkInfo,
    pub(crate) curr_chunk_compression: Compression,
    pub(crate) curr_chunk_data_pos: u64,
    pub(crate) curr_chunk_topic_indexes: BTreeMap<String, Vec<IndexEntry>>,

    pub(crate) io: Mutex<BagIo>,
    pub(crate) disk_guard: DiskGuard,
    /// Set once the file owes a trailer; close finalizes only then, so a
    /// failed open never rewrites a file it could not load
    writing_started: bool,
    closed: bool,
}

/// Field-level access to the I/O state, so the write path can borrow the
/// file while the in-memory tables stay borrowable.
pub(crate) fn io_mut(io: &mut Mutex<BagIo>) -> &mut BagIo {
    io.get_mut().unwrap_or_else(|e| e.into_inner())
}

impl Bag {
    /// Open a bag file in the given mode.
    ///
    /// `Write` creates (or truncates) the file; `Read` loads the trailer
    /// of a finished bag; `Append`/`ReadAppend` reopen a finished bag,
    /// discard its trailer, and continue writing.
    pub fn open<P: AsRef<Path>>(path: P, mode: BagMode) -> Result<Self> {
        match mode {
            BagMode::Read => Self::open_read(path.as_ref()),
            BagMode::Write => Self::open_write(path.as_ref()),
            BagMode::Append | BagMode::ReadAppend => Self::open_append(path.as_ref(), mode),
        }
    }

    fn new(file: ChunkedFile, mode: BagMode) -> Self {
        let disk_guard = DiskGuard::new(file.path());
        Bag {
            mode,
            version: 0,
            compression: Compression::default(),
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            file_header_pos: 0,
            index_data_pos: 0,
            topic_count: 0,
            chunk_count: 0,
            topic_infos: BTreeMap::new(),
            topic_indexes: BTreeMap::new(),
            chunk_infos: Vec::new(),
            chunk_open: false,
            curr_chunk_info: ChunkInfo::default(),
            curr_chunk_compression: Compression::None,
            curr_chunk_data_pos: 0,
            curr_chunk_topic_indexes: BTreeMap::new(),
            io: Mutex::new(BagIo {
                file,
                decompressed_chunk: None,
                decompress_buffer: Vec::new(),
            }),
            disk_guard,
            writing_started: false,
            closed: false,
        }
    }

    fn open_read(path: &Path) -> Result<Self> {
        let file = ChunkedFile::open_read(path)?;
        let mut bag = Bag::new(file, BagMode::Read);
        bag.read_version()?;
        match bag.version {
            102 => bag.start_reading_v102()?,
            103 => bag.start_reading_v103()?,
            other => {
                return Err(BagError::bad_version(format!(
                    "{}.{}",
                    other / 100,
                    other % 100
                )))
            }
        }
        Ok(bag)
    }

    fn open_write(path: &Path) -> Result<Self> {
        let file = ChunkedFile::open_write(path)?;
        let mut bag = Bag::new(file, BagMode::Write);
        bag.disk_guard.check_disk();
        bag.version = 103;
        bag.start_writing()?;
        bag.writing_started = true;
        Ok(bag)
    }

    fn open_append(path: &Path, mode: BagMode) -> Result<Self> {
        let file = ChunkedFile::open_read_write(path)?;
        let mut bag = Bag::new(file, mode);
        bag.disk_guard.check_disk();

        bag.read_version()?;
        if bag.version != 103 {
            return Err(BagError::bad_version(format!(
                "{}.{} (append requires 1.3)",
                bag.version / 100,
                bag.version % 100
            )));
        }
        bag.start_reading_v103()?;

        // Chop off the trailer; it is rewritten on close
        let index_pos = bag.index_data_pos;
        let io = io_mut(&mut bag.io);
        io.file.truncate(index_pos)?;
        bag.index_data_pos = 0;

        // Clear the index position so an unclosed file is recognizable
        io.file.seek(SeekFrom::Start(bag.file_header_pos))?;
        bag.write_file_header_record()?;

        io_mut(&mut bag.io).file.seek(SeekFrom::End(0))?;
        bag.writing_started = true;
        Ok(bag)
    }

    /// Finalize and close the bag.
    ///
    /// For writable modes this closes any open chunk, writes the trailer,
    /// and back-patches the file header. Interrupting a close leaves the
    /// index position zeroed and the file unreadable until reopened in
    /// `Append` — do not interrupt close on large files.
    ///
    /// Called automatically on drop; errors there are logged instead of
    /// surfaced.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.writing_started {
            self.stop_writing()?;
        }
        io_mut(&mut self.io).file.flush()?;
        self.closed = true;
        Ok(())
    }

    /// Copy every message of `src` into a fresh bag at `dst`.
    ///
    /// Messages are piped in global time order. Writes go to
    /// `<dst>.active` and the file is renamed into place on success.
    pub fn rewrite<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> Result<()> {
        let src_bag = Bag::open(src.as_ref(), BagMode::Read)?;

        let mut active = dst.as_ref().as_os_str().to_os_string();
        active.push(".active");
        let active = std::path::PathBuf::from(active);

        let mut out = Bag::open(&active, BagMode::Write)?;

        let topics: Vec<&str> = src_bag.topics().map(|t| t.topic.as_str()).collect();
        for handle in src_bag.get_messages_by_topic(&topics, BagTime::ZERO, BagTime::MAX) {
            let payload = handle.instantiate()?;
            let schema = MessageSchema {
                datatype: handle.datatype(),
                md5sum: handle.md5sum(),
                definition: handle.message_definition(),
            };
            out.write(handle.topic(), handle.time(), &payload, schema)?;
        }
        out.close()?;

        std::fs::rename(&active, dst.as_ref()).map_err(|e| BagError::io("Bag::rewrite", e))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The mode this bag was opened in.
    pub fn mode(&self) -> BagMode {
        self.mode
    }

    /// Format version as `major * 100 + minor`.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Format major version.
    pub fn major_version(&self) -> u32 {
        self.version / 100
    }

    /// Format minor version.
    pub fn minor_version(&self) -> u32 {
        self.version % 100
    }

    /// Compression used for new chunks.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Set the compression for chunks started after this call.
    pub fn set_compression(&mut self, compression: Compression) {
        self.compression = compression;
    }

    /// Chunk size threshold in bytes.
    pub fn chunk_threshold(&self) -> u32 {
        self.chunk_threshold
    }

    /// Set the chunk size threshold. A chunk is closed once its
    /// uncompressed data exceeds the threshold.
    pub fn set_chunk_threshold(&mut self, bytes: u32) {
        self.chunk_threshold = bytes;
    }

    /// Current raw file offset.
    pub fn offset(&self) -> u64 {
        self.lock_io().file.tell()
    }

    /// Whether the disk guard currently allows writing.
    pub fn writing_enabled(&self) -> bool {
        self.disk_guard.is_enabled()
    }

    /// Known topics, in name order.
    pub fn topics(&self) -> impl Iterator<Item = &TopicInfo> {
        self.topic_infos.values()
    }

    /// Schema of a known topic.
    pub fn topic_info(&self, topic: &str) -> Option<&TopicInfo> {
        self.topic_infos.get(topic)
    }

    /// Index entries of a topic, in write order.
    pub fn topic_index(&self, topic: &str) -> Option<&[IndexEntry]> {
        self.topic_indexes.get(topic).map(|v| v.as_slice())
    }

    /// Chunk directory, in write order.
    pub fn chunk_infos(&self) -> &[ChunkInfo] {
        &self.chunk_infos
    }

    pub(crate) fn lock_io(&self) -> MutexGuard<'_, BagIo> {
        self.io.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Bag {
    fn drop(&mut self) {
        if !self.closed && self.writing_started {
            if let Err(err) = self.close() {
                tracing::warn!(%err, "failed to finalize bag on drop");
            }
        }
    }
}
