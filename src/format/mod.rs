// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! On-disk record format: framing, well-known header fields, and wire
//! constants.
//!
//! # Record format
//!
//! All records follow `<header_len: u32><header><data_len: u32><data>`
//! where the header is a sequence of `<field_len: u32><name>=<value>`
//! entries. All integers are little-endian.
//!
//! # Op codes
//! - 0x01: Message definition
//! - 0x02: Message data
//! - 0x03: File header
//! - 0x04: Index data
//! - 0x05: Chunk
//! - 0x06: Chunk info

pub mod fields;
pub mod record;

pub use record::FieldMap;

/// Version written to new files, as it appears in the version line.
pub const VERSION: &str = "1.3";

/// Message definition record
pub const OP_MSG_DEF: u8 = 0x01;
/// Message data record
pub const OP_MSG_DATA: u8 = 0x02;
/// File header record
pub const OP_FILE_HEADER: u8 = 0x03;
/// Index data record
pub const OP_INDEX_DATA: u8 = 0x04;
/// Chunk record
pub const OP_CHUNK: u8 = 0x05;
/// Chunk info record
pub const OP_CHUNK_INFO: u8 = 0x06;

/// Index data record version
pub const INDEX_VERSION: u32 = 1;
/// Chunk info record version
pub const CHUNK_INFO_VERSION: u32 = 1;

/// Total on-disk size of the file header record, length prefixes included.
/// The data section is padded with spaces so the back-patched header always
/// fits its original slot.
pub const FILE_HEADER_LENGTH: u32 = 4096;

/// Well-known header field names.
pub mod field {
    /// Record opcode
    pub const OP: &str = "op";
    /// Topic name
    pub const TOPIC: &str = "topic";
    /// Record format version
    pub const VER: &str = "ver";
    /// Entry count
    pub const COUNT: &str = "count";
    /// Absolute chunk position
    pub const CHUNK_POS: &str = "chunk_pos";
    /// Chunk start time
    pub const START_TIME: &str = "start_time";
    /// Chunk end time
    pub const END_TIME: &str = "end_time";
    /// Chunk compression
    pub const COMPRESSION: &str = "compression";
    /// Uncompressed chunk size
    pub const SIZE: &str = "size";
    /// Trailer position
    pub const INDEX_POS: &str = "index_pos";
    /// Number of topics
    pub const TOPIC_COUNT: &str = "topic_count";
    /// Number of chunks
    pub const CHUNK_COUNT: &str = "chunk_count";
    /// Message definition hash
    pub const MD5: &str = "md5";
    /// Message datatype
    pub const TYPE: &str = "type";
    /// Message definition text
    pub const DEF: &str = "def";
    /// Latched-publisher flag
    pub const LATCHING: &str = "latching";
    /// Publishing node name
    pub const CALLERID: &str = "callerid";
    /// Message timestamp
    pub const TIME: &str = "time";
}
