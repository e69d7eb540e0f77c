// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # robobag
//!
//! Storage engine for a versioned, append-oriented, chunked binary log of
//! time-stamped typed messages published on named topics.
//!
//! The library is organized in four layers:
//! - [`core`] - shared data model and the error enum
//! - [`format`] - the on-disk record framing and well-known header fields
//! - [`io`] - the positioned/compressed file layer and the disk guard
//! - [`bag`] - the engine: writer pipeline, version-negotiated reader,
//!   and the merged time-ordered topic iterator
//!
//! ## Writing
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use robobag::{Bag, BagMode, BagTime, Compression, MessageSchema};
//!
//! let mut bag = Bag::open("session.bag", BagMode::Write)?;
//! bag.set_compression(Compression::Bz2);
//!
//! let schema = MessageSchema {
//!     datatype: "std_msgs/String",
//!     md5sum: "992ce8a1687cec8c8bd883ec73ca41d1",
//!     definition: "string data",
//! };
//! bag.write("/chatter", BagTime::new(1, 0), b"hello", schema)?;
//! bag.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Reading
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use robobag::{Bag, BagMode, BagTime};
//!
//! let bag = Bag::open("session.bag", BagMode::Read)?;
//! for handle in bag.get_messages_by_topic(&["/chatter"], BagTime::ZERO, BagTime::MAX) {
//!     let payload = handle.instantiate()?;
//!     println!("{} @ {}: {} bytes", handle.topic(), handle.time(), payload.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod bag;
pub mod core;
pub mod format;
pub mod io;

pub use crate::core::{
    BagError, BagMode, BagTime, ChunkInfo, Compression, IndexEntry, Result, TopicInfo,
};

pub use bag::{Bag, MessageHandle, MessageRecord, MessageSchema, DEFAULT_CHUNK_THRESHOLD};
