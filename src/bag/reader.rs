// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Read path: version detection, trailer loading, and random access into
//! chunks.
//!
//! Two on-disk generations are supported. Version 1.03 (current) stores a
//! trailer of message definition and chunk info records, with per-chunk
//! index records following each chunk. Version 1.02 stores a flat index
//! whose entries point at absolute message positions in the file, with
//! message definition records preceding the first message of each topic.
//!
//! Random access decompresses one chunk at a time and keeps it cached, so
//! iterating in chunk order costs one decompression per chunk.

use std::io::SeekFrom;

use crate::bag::{io_mut, Bag, BagIo};
use crate::core::{
    BagError, BagTime, ChunkHeader, ChunkInfo, Compression, IndexEntry, Result, TopicInfo,
};
use crate::format::record::{read_record_header, read_record_header_at};
use crate::format::{field, FieldMap, CHUNK_INFO_VERSION, OP_CHUNK, OP_CHUNK_INFO, OP_FILE_HEADER, OP_INDEX_DATA, OP_MSG_DATA, OP_MSG_DEF};
use crate::io::{decompress, ChunkedFile};

impl Bag {
    /// Read the version line and record where the file header starts.
    pub(crate) fn read_version(&mut self) -> Result<()> {
        let file = &mut io_mut(&mut self.io).file;
        let line = file.getline()?;
        self.file_header_pos = file.tell();
        self.version = parse_version_line(&line)?;
        tracing::debug!(version = self.version, "read bag version");
        Ok(())
    }

    /// Load a version 1.03 file: file header, trailer, then the per-chunk
    /// index records.
    pub(crate) fn start_reading_v103(&mut self) -> Result<()> {
        self.read_file_header_record()?;
        self.check_index_pos()?;

        io_mut(&mut self.io)
            .file
            .seek(SeekFrom::Start(self.index_data_pos))?;

        for _ in 0..self.topic_count {
            self.read_message_definition_record()?;
        }
        for _ in 0..self.chunk_count {
            self.read_chunk_info_record()?;
        }

        for i in 0..self.chunk_infos.len() {
            let (pos, topics_in_chunk) = {
                let info = &self.chunk_infos[i];
                (info.pos, info.topic_counts.len())
            };

            {
                let io = io_mut(&mut self.io);
                io.file.seek(SeekFrom::Start(pos))?;
                let header = read_chunk_header(&mut io.file)?;
                io.file.seek(SeekFrom::Current(header.compressed_size as i64))?;
            }

            for _ in 0..topics_in_chunk {
                self.read_index_data_record(Some(pos))?;
            }
        }

        Ok(())
    }

    /// Load a version 1.02 file: flat index records until end of file,
    /// then the message definitions found at each topic's first entry.
    pub(crate) fn start_reading_v102(&mut self) -> Result<()> {
        self.read_file_header_record()?;
        self.check_index_pos()?;

        let file_len = {
            let io = io_mut(&mut self.io);
            let len = io.file.len()?;
            io.file.seek(SeekFrom::Start(self.index_data_pos))?;
            len
        };

        while io_mut(&mut self.io).file.tell() < file_len {
            self.read_index_data_record(None)?;
        }

        let firsts: Vec<(String, u64)> = self
            .topic_indexes
            .iter()
            .filter_map(|(topic, index)| index.first().map(|e| (topic.clone(), e.chunk_pos)))
            .collect();

        for (topic, pos) in firsts {
            io_mut(&mut self.io).file.seek(SeekFrom::Start(pos))?;
            self.consume_message_definitions(&topic)?;
        }

        Ok(())
    }

    fn check_index_pos(&mut self) -> Result<()> {
        if self.index_data_pos == 0 {
            return Err(BagError::truncated_trailer(
                "index position is zero, the writer did not finish",
            ));
        }
        let len = io_mut(&mut self.io).file.len()?;
        if self.index_data_pos > len {
            return Err(BagError::truncated_trailer(format!(
                "index position {} is past the end of the {len}-byte file",
                self.index_data_pos
            )));
        }
        Ok(())
    }

    fn read_file_header_record(&mut self) -> Result<()> {
        let io = io_mut(&mut self.io);
        let (fields, data_size) = read_record_header(&mut io.file)?;
        fields.expect_op(OP_FILE_HEADER, "read_file_header_record")?;

        self.index_data_pos = fields.get_u64(field::INDEX_POS)?;
        if self.version >= 103 {
            self.topic_count = fields.get_u32(field::TOPIC_COUNT)?;
            self.chunk_count = fields.get_u32(field::CHUNK_COUNT)?;
        }

        tracing::debug!(
            index_pos = self.index_data_pos,
            topic_count = self.topic_count,
            chunk_count = self.chunk_count,
            "read file header"
        );

        // The data section is only padding
        io.file.seek(SeekFrom::Current(data_size as i64))?;
        Ok(())
    }

    fn read_message_definition_record(&mut self) -> Result<()> {
        let io = io_mut(&mut self.io);
        let (fields, data_size) = read_record_header(&mut io.file)?;
        fields.expect_op(OP_MSG_DEF, "read_message_definition_record")?;
        io.file.seek(SeekFrom::Current(data_size as i64))?;
        self.register_message_definition(&fields)
    }

    /// Insert the topic described by a MSG_DEF record. The first
    /// definition of a topic wins; duplicates are tolerated.
    fn register_message_definition(&mut self, fields: &FieldMap) -> Result<()> {
        let topic = fields.get_str(field::TOPIC)?;
        let md5sum = fields.get_str(field::MD5)?;
        if md5sum.len() != 32 {
            return Err(BagError::bad_format(
                "register_message_definition",
                format!("md5 field is {} characters, expected 32", md5sum.len()),
            ));
        }
        let datatype = fields.get_str(field::TYPE)?;
        let msg_def = fields.get_str(field::DEF)?;

        if !self.topic_infos.contains_key(topic) {
            self.topic_infos.insert(
                topic.to_string(),
                TopicInfo {
                    topic: topic.to_string(),
                    datatype: datatype.to_string(),
                    md5sum: md5sum.to_string(),
                    msg_def: msg_def.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Consume consecutive MSG_DEF records at the current position,
    /// stopping in front of the first record of another kind. Version 1.02
    /// files may carry several duplicate definitions per topic.
    fn consume_message_definitions(&mut self, topic: &str) -> Result<()> {
        let mut consumed = 0u32;
        loop {
            let record_pos = io_mut(&mut self.io).file.tell();
            let (fields, data_size) = {
                let io = io_mut(&mut self.io);
                read_record_header(&mut io.file)?
            };
            if fields.op()? != OP_MSG_DEF {
                io_mut(&mut self.io).file.seek(SeekFrom::Start(record_pos))?;
                break;
            }
            io_mut(&mut self.io)
                .file
                .seek(SeekFrom::Current(data_size as i64))?;
            self.register_message_definition(&fields)?;
            consumed += 1;
        }
        if consumed == 0 {
            return Err(BagError::bad_format(
                "consume_message_definitions",
                format!("no message definition record found for topic '{topic}'"),
            ));
        }
        Ok(())
    }

    fn read_chunk_info_record(&mut self) -> Result<()> {
        let io = io_mut(&mut self.io);
        let (fields, data_size) = read_record_header(&mut io.file)?;
        fields.expect_op(OP_CHUNK_INFO, "read_chunk_info_record")?;

        let ver = fields.get_u32(field::VER)?;
        if ver != CHUNK_INFO_VERSION {
            return Err(BagError::bad_format(
                "read_chunk_info_record",
                format!("unsupported chunk info version {ver}"),
            ));
        }

        let pos = fields.get_u64(field::CHUNK_POS)?;
        let start_time = fields.get_time(field::START_TIME)?;
        let end_time = fields.get_time(field::END_TIME)?;
        let count = fields.get_u32(field::COUNT)?;

        let mut topic_counts = std::collections::BTreeMap::new();
        let mut remaining = data_size as u64;
        for _ in 0..count {
            let mut buf = [0u8; 4];
            io.file.read_exact(&mut buf)?;
            let name_len = u32::from_le_bytes(buf) as u64;
            if remaining < 8 + name_len {
                return Err(BagError::bad_format(
                    "read_chunk_info_record",
                    format!("topic entry needs {} bytes, record has {remaining} left", 8 + name_len),
                ));
            }
            remaining -= 8 + name_len;

            let mut name = vec![0u8; name_len as usize];
            io.file.read_exact(&mut name)?;
            io.file.read_exact(&mut buf)?;
            let topic_count = u32::from_le_bytes(buf);

            let topic = String::from_utf8(name).map_err(|_| {
                BagError::bad_format("read_chunk_info_record", "topic name is not valid UTF-8")
            })?;
            topic_counts.insert(topic, topic_count);
        }
        if remaining != 0 {
            return Err(BagError::bad_format(
                "read_chunk_info_record",
                format!("{remaining} unread bytes in chunk info data section"),
            ));
        }

        self.chunk_infos.push(ChunkInfo {
            pos,
            start_time,
            end_time,
            topic_counts,
        });
        Ok(())
    }

    /// Read one INDEX_DATA record into the per-topic index.
    ///
    /// `chunk_pos` is the position of the surrounding chunk; version 0
    /// records (v1.02 files) instead carry absolute message positions.
    fn read_index_data_record(&mut self, chunk_pos: Option<u64>) -> Result<()> {
        let io = io_mut(&mut self.io);
        let (fields, data_size) = read_record_header(&mut io.file)?;
        fields.expect_op(OP_INDEX_DATA, "read_index_data_record")?;

        let ver = fields.get_u32(field::VER)?;
        let topic = fields.get_str(field::TOPIC)?.to_string();
        let count = fields.get_u32(field::COUNT)?;

        let index = self.topic_indexes.entry(topic).or_default();
        match ver {
            0 => {
                // Historical records declare the writer's in-memory entry
                // size, 20 bytes; the wire tuple itself is 16 bytes and
                // the reader never repositions using data_size
                if count as u64 * 20 != data_size as u64 {
                    return Err(BagError::bad_format(
                        "read_index_data_record",
                        format!("version 0 index declares {data_size} data bytes for {count} entries"),
                    ));
                }
                for _ in 0..count {
                    let mut buf = [0u8; 16];
                    io.file.read_exact(&mut buf)?;
                    let sec = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                    let nsec = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
                    let pos = u64::from_le_bytes([
                        buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
                    ]);
                    index.push(IndexEntry {
                        time: BagTime::new(sec, nsec),
                        chunk_pos: pos,
                        offset: 0,
                    });
                }
            }
            1 => {
                if count as u64 * 12 != data_size as u64 {
                    return Err(BagError::bad_format(
                        "read_index_data_record",
                        format!("version 1 index declares {data_size} data bytes for {count} entries"),
                    ));
                }
                let chunk_pos = chunk_pos.ok_or_else(|| {
                    BagError::bad_format(
                        "read_index_data_record",
                        "version 1 index record outside a chunk directory",
                    )
                })?;
                for _ in 0..count {
                    let mut buf = [0u8; 12];
                    io.file.read_exact(&mut buf)?;
                    let sec = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                    let nsec = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
                    let offset = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
                    index.push(IndexEntry {
                        time: BagTime::new(sec, nsec),
                        chunk_pos,
                        offset,
                    });
                }
            }
            other => {
                return Err(BagError::bad_format(
                    "read_index_data_record",
                    format!("unsupported index version {other}"),
                ));
            }
        }
        Ok(())
    }

    /// Random-access read of the message an index entry points at.
    pub(crate) fn read_message_data(&self, entry: &IndexEntry, topic: &str) -> Result<Vec<u8>> {
        let mut io = self.lock_io();
        if self.version() == 102 {
            read_message_data_v102(&mut io, entry, topic)
        } else {
            read_message_data_v103(&mut io, entry, topic)
        }
    }
}

/// Parse `#ROS<word> V<major>.<minor>` into `major * 100 + minor`.
fn parse_version_line(line: &str) -> Result<u32> {
    let bad = || BagError::bad_version(format!("unrecognized version line '{line}'"));

    let rest = line.strip_prefix("#ROS").ok_or_else(bad)?;
    let mut parts = rest.split_whitespace();
    let _logtype = parts.next().ok_or_else(bad)?;
    let version = parts.next().and_then(|v| v.strip_prefix('V')).ok_or_else(bad)?;
    let (major, minor) = version.split_once('.').ok_or_else(bad)?;

    let mut major: u32 = major.parse().map_err(|_| bad())?;
    let minor: u32 = minor.parse().map_err(|_| bad())?;

    // Historical files wrote a bare 0 major with a '#' prefix
    if major == 0 && line.starts_with('#') {
        major = 1;
    }

    Ok(major * 100 + minor)
}

/// Read a chunk record header. The record's data length is the compressed
/// size of the chunk body that follows.
pub(crate) fn read_chunk_header(file: &mut ChunkedFile) -> Result<ChunkHeader> {
    let (fields, data_size) = read_record_header(file)?;
    fields.expect_op(OP_CHUNK, "read_chunk_header")?;
    let compression = Compression::from_str(fields.get_str(field::COMPRESSION)?)?;
    let uncompressed_size = fields.get_u32(field::SIZE)?;
    Ok(ChunkHeader {
        compression,
        compressed_size: data_size,
        uncompressed_size,
    })
}

fn read_message_data_v103(io: &mut BagIo, entry: &IndexEntry, topic: &str) -> Result<Vec<u8>> {
    if io.decompressed_chunk != Some(entry.chunk_pos) {
        io.file.seek(SeekFrom::Start(entry.chunk_pos))?;
        let header = read_chunk_header(&mut io.file)?;

        let mut body = vec![0u8; header.compressed_size as usize];
        io.file.read_exact(&mut body)?;

        io.decompress_buffer = match header.compression {
            Compression::None => body,
            mode => decompress(mode, &body, header.uncompressed_size as usize)?,
        };
        io.decompressed_chunk = Some(entry.chunk_pos);
    }

    let buffer = &io.decompress_buffer;
    let mut offset = entry.offset as usize;
    loop {
        let (fields, data_size, consumed) = read_record_header_at(buffer, offset)?;
        offset += consumed;

        let op = fields.op()?;
        if op == OP_MSG_DEF {
            offset += data_size as usize;
            continue;
        }
        if op != OP_MSG_DATA {
            return Err(BagError::bad_format(
                "read_message_data",
                format!("unexpected op 0x{op:02x} inside chunk"),
            ));
        }

        let msg_topic = fields.get_str(field::TOPIC)?;
        if msg_topic != topic {
            return Err(BagError::invariant_violation(format!(
                "index for topic '{topic}' points at a message on '{msg_topic}'"
            )));
        }

        let end = offset + data_size as usize;
        if end > buffer.len() {
            return Err(BagError::bad_format(
                "read_message_data",
                "message data extends past the end of the chunk",
            ));
        }
        return Ok(buffer[offset..end].to_vec());
    }
}

fn read_message_data_v102(io: &mut BagIo, entry: &IndexEntry, topic: &str) -> Result<Vec<u8>> {
    // Version 1.02 entries store the absolute message position
    io.file.seek(SeekFrom::Start(entry.chunk_pos))?;
    loop {
        let (fields, data_size) = read_record_header(&mut io.file)?;
        let op = fields.op()?;
        if op == OP_MSG_DEF {
            io.file.seek(SeekFrom::Current(data_size as i64))?;
            continue;
        }
        if op != OP_MSG_DATA {
            return Err(BagError::bad_format(
                "read_message_data",
                format!("unexpected op 0x{op:02x} at message position"),
            ));
        }

        let msg_topic = fields.get_str(field::TOPIC)?;
        if msg_topic != topic {
            return Err(BagError::invariant_violation(format!(
                "index for topic '{topic}' points at a message on '{msg_topic}'"
            )));
        }

        let mut data = vec![0u8; data_size as usize];
        io.file.read_exact(&mut data)?;
        return Ok(data);
    }
}
