// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Write path: chunk pipeline, index construction, and trailer emission.
//!
//! The file layout produced is: version line, file header record (padded
//! to a fixed 4096-byte envelope and back-patched on close), a sequence of
//! chunk records each followed by its index data records, then the trailer
//! (message definition records and chunk info records) pointed to by the
//! file header's `index_pos`.

use std::io::SeekFrom;

use crate::bag::{io_mut, Bag, MessageRecord, MessageSchema};
use crate::core::{BagError, BagTime, ChunkInfo, Compression, IndexEntry, Result, TopicInfo};
use crate::format::record::{write_record, write_record_header};
use crate::format::{
    field, FieldMap, CHUNK_INFO_VERSION, FILE_HEADER_LENGTH, INDEX_VERSION, OP_CHUNK,
    OP_CHUNK_INFO, OP_FILE_HEADER, OP_INDEX_DATA, OP_MSG_DATA, OP_MSG_DEF, VERSION,
};
use crate::io::ChunkedFile;

impl Bag {
    /// Write one message.
    ///
    /// Returns `Ok(false)` when the message was dropped because the disk
    /// guard has disabled writing; the bag stays usable.
    pub fn write(
        &mut self,
        topic: &str,
        time: BagTime,
        payload: &[u8],
        schema: MessageSchema<'_>,
    ) -> Result<bool> {
        self.write_with(topic, time, payload, schema, false, None)
    }

    /// Write one message carrying connection metadata.
    ///
    /// When `latching` is set, the message record also stores the
    /// latching flag and the caller id of the publishing node.
    pub fn write_with(
        &mut self,
        topic: &str,
        time: BagTime,
        payload: &[u8],
        schema: MessageSchema<'_>,
        latching: bool,
        callerid: Option<&str>,
    ) -> Result<bool> {
        if self.is_closed() || !self.mode().is_writable() {
            return Err(BagError::bad_format(
                "Bag::write",
                "bag is not open for writing",
            ));
        }

        self.disk_guard.scheduled_check();
        if self.disk_guard.require_space().is_err() {
            self.disk_guard.warn_dropped();
            return Ok(false);
        }

        // First write on a topic fixes its schema; later metadata is ignored
        let needs_def = !self.topic_infos.contains_key(topic);
        if needs_def {
            self.topic_infos.insert(
                topic.to_string(),
                TopicInfo {
                    topic: topic.to_string(),
                    datatype: schema.datatype.to_string(),
                    md5sum: schema.md5sum.to_string(),
                    msg_def: schema.definition.to_string(),
                },
            );
            self.topic_indexes.entry(topic.to_string()).or_default();
        }

        if !self.chunk_open {
            // The previous operation may have been a read; writes always
            // go to the end of the file
            io_mut(&mut self.io).file.seek(SeekFrom::End(0))?;
            self.start_writing_chunk(time)?;
        }

        // The index records the offset before an inline definition record;
        // the random-access reader skips definitions when materializing
        let entry = IndexEntry {
            time,
            chunk_pos: self.curr_chunk_info.pos,
            offset: self.chunk_offset(),
        };
        self.curr_chunk_topic_indexes
            .entry(topic.to_string())
            .or_default()
            .push(entry);
        *self
            .curr_chunk_info
            .topic_counts
            .entry(topic.to_string())
            .or_default() += 1;

        if needs_def {
            let io = io_mut(&mut self.io);
            let info = &self.topic_infos[topic];
            write_message_definition_record(&mut io.file, info)?;
        }

        {
            let io = io_mut(&mut self.io);
            write_message_data_record(&mut io.file, topic, time, latching, callerid, payload)?;
        }

        if time > self.curr_chunk_info.end_time {
            self.curr_chunk_info.end_time = time;
        }

        if self.chunk_offset() > self.chunk_threshold() {
            self.stop_writing_chunk()?;
        }

        Ok(true)
    }

    /// Write one message through the [`MessageRecord`] adapter.
    pub fn write_message(
        &mut self,
        topic: &str,
        time: BagTime,
        msg: &impl MessageRecord,
    ) -> Result<bool> {
        let schema = MessageSchema {
            datatype: msg.datatype(),
            md5sum: msg.md5sum(),
            definition: msg.definition(),
        };
        self.write(topic, time, msg.payload(), schema)
    }

    /// Write the version line and the placeholder file header.
    pub(crate) fn start_writing(&mut self) -> Result<()> {
        let file = &mut io_mut(&mut self.io).file;
        file.write(format!("#ROSBAG V{VERSION}\n").as_bytes())?;
        self.file_header_pos = file.tell();
        self.write_file_header_record()
    }

    /// Close any open chunk, write the trailer, and back-patch the file
    /// header.
    pub(crate) fn stop_writing(&mut self) -> Result<()> {
        if self.chunk_open {
            self.stop_writing_chunk()?;
        }

        self.index_data_pos = io_mut(&mut self.io).file.tell();

        {
            let io = io_mut(&mut self.io);
            for info in self.topic_infos.values() {
                write_message_definition_record(&mut io.file, info)?;
            }
            for chunk_info in &self.chunk_infos {
                write_chunk_info_record(&mut io.file, chunk_info)?;
            }
        }

        tracing::debug!(
            index_pos = self.index_data_pos,
            topics = self.topic_infos.len(),
            chunks = self.chunk_infos.len(),
            "wrote bag trailer"
        );

        io_mut(&mut self.io)
            .file
            .seek(SeekFrom::Start(self.file_header_pos))?;
        self.write_file_header_record()
    }

    /// Bytes of uncompressed chunk data written so far in the open chunk.
    /// This is also what index entries store as their offset.
    fn chunk_offset(&mut self) -> u32 {
        let io = io_mut(&mut self.io);
        if io.file.write_mode() == Compression::None {
            (io.file.tell() - self.curr_chunk_data_pos) as u32
        } else {
            io.file.compressed_bytes_in()
        }
    }

    fn start_writing_chunk(&mut self, time: BagTime) -> Result<()> {
        let compression = self.compression();
        let io = io_mut(&mut self.io);

        let pos = io.file.tell();
        write_chunk_header(&mut io.file, compression, 0, 0)?;
        io.file.set_write_mode(compression)?;
        let data_pos = io.file.tell();

        self.curr_chunk_info = ChunkInfo {
            pos,
            start_time: time,
            end_time: time,
            topic_counts: Default::default(),
        };
        self.curr_chunk_compression = compression;
        self.curr_chunk_data_pos = data_pos;
        self.chunk_open = true;
        Ok(())
    }

    fn stop_writing_chunk(&mut self) -> Result<()> {
        let uncompressed_size = self.chunk_offset();
        let compression = self.curr_chunk_compression;
        let chunk_pos = self.curr_chunk_info.pos;
        let data_pos = self.curr_chunk_data_pos;

        let io = io_mut(&mut self.io);
        io.file.set_write_mode(Compression::None)?;
        let compressed_size = (io.file.tell() - data_pos) as u32;

        // Rewrite the chunk header with the real sizes; the header has the
        // same byte length as the placeholder, so it fits in place
        let end_of_chunk = io.file.tell();
        io.file.seek(SeekFrom::Start(chunk_pos))?;
        write_chunk_header(&mut io.file, compression, compressed_size, uncompressed_size)?;
        io.file.seek(SeekFrom::Start(end_of_chunk))?;

        tracing::debug!(
            chunk_pos,
            compressed_size,
            uncompressed_size,
            "closed chunk"
        );

        let chunk_indexes = std::mem::take(&mut self.curr_chunk_topic_indexes);
        for (topic, entries) in &chunk_indexes {
            write_index_data_record(&mut io.file, topic, entries)?;
        }

        for (topic, entries) in chunk_indexes {
            self.topic_indexes.entry(topic).or_default().extend(entries);
        }
        self.chunk_infos
            .push(std::mem::take(&mut self.curr_chunk_info));
        self.chunk_open = false;
        Ok(())
    }

    /// Write the fixed-envelope file header record at the current offset.
    pub(crate) fn write_file_header_record(&mut self) -> Result<()> {
        self.topic_count = self.topic_infos.len() as u32;
        self.chunk_count = self.chunk_infos.len() as u32;

        let mut fields = FieldMap::new();
        fields.put_u8(field::OP, OP_FILE_HEADER);
        fields.put_u64(field::INDEX_POS, self.index_data_pos);
        fields.put_u32(field::TOPIC_COUNT, self.topic_count);
        fields.put_u32(field::CHUNK_COUNT, self.chunk_count);

        let header = fields.encode();
        let used = header.len() as u32 + 8;
        if used > FILE_HEADER_LENGTH {
            return Err(BagError::invariant_violation(
                "file header record exceeds its fixed envelope",
            ));
        }
        let data_len = FILE_HEADER_LENGTH - used;

        let file = &mut io_mut(&mut self.io).file;
        file.write(&(header.len() as u32).to_le_bytes())?;
        file.write(&header)?;
        file.write(&data_len.to_le_bytes())?;
        file.write(&vec![b' '; data_len as usize])?;
        Ok(())
    }
}

/// Write a chunk record header and the compressed-size prefix. The chunk
/// body (the compressed stream) follows.
pub(crate) fn write_chunk_header(
    file: &mut ChunkedFile,
    compression: Compression,
    compressed_size: u32,
    uncompressed_size: u32,
) -> Result<()> {
    let mut fields = FieldMap::new();
    fields.put_u8(field::OP, OP_CHUNK);
    fields.put_str(field::COMPRESSION, compression.as_str());
    fields.put_u32(field::SIZE, uncompressed_size);
    write_record_header(file, &fields, compressed_size)
}

fn write_message_definition_record(file: &mut ChunkedFile, info: &TopicInfo) -> Result<()> {
    let mut fields = FieldMap::new();
    fields.put_u8(field::OP, OP_MSG_DEF);
    fields.put_str(field::TOPIC, &info.topic);
    fields.put_str(field::MD5, &info.md5sum);
    fields.put_str(field::TYPE, &info.datatype);
    fields.put_str(field::DEF, &info.msg_def);
    write_record_header(file, &fields, 0)
}

fn write_message_data_record(
    file: &mut ChunkedFile,
    topic: &str,
    time: BagTime,
    latching: bool,
    callerid: Option<&str>,
    payload: &[u8],
) -> Result<()> {
    let mut fields = FieldMap::new();
    fields.put_u8(field::OP, OP_MSG_DATA);
    fields.put_str(field::TOPIC, topic);
    fields.put_time(field::TIME, time);
    if latching {
        fields.put_str(field::LATCHING, "1");
        fields.put_str(field::CALLERID, callerid.unwrap_or(""));
    }
    write_record(file, &fields, payload)
}

fn write_index_data_record(
    file: &mut ChunkedFile,
    topic: &str,
    entries: &[IndexEntry],
) -> Result<()> {
    let mut fields = FieldMap::new();
    fields.put_u8(field::OP, OP_INDEX_DATA);
    fields.put_str(field::TOPIC, topic);
    fields.put_u32(field::VER, INDEX_VERSION);
    fields.put_u32(field::COUNT, entries.len() as u32);

    write_record_header(file, &fields, (entries.len() * 12) as u32)?;
    for entry in entries {
        file.write(&entry.time.sec.to_le_bytes())?;
        file.write(&entry.time.nsec.to_le_bytes())?;
        file.write(&entry.offset.to_le_bytes())?;
    }
    Ok(())
}

fn write_chunk_info_record(file: &mut ChunkedFile, chunk_info: &ChunkInfo) -> Result<()> {
    let mut fields = FieldMap::new();
    fields.put_u8(field::OP, OP_CHUNK_INFO);
    fields.put_u32(field::VER, CHUNK_INFO_VERSION);
    fields.put_u64(field::CHUNK_POS, chunk_info.pos);
    fields.put_time(field::START_TIME, chunk_info.start_time);
    fields.put_time(field::END_TIME, chunk_info.end_time);
    fields.put_u32(field::COUNT, chunk_info.topic_counts.len() as u32);

    let data_len: usize = chunk_info
        .topic_counts
        .keys()
        .map(|topic| 4 + topic.len() + 4)
        .sum();
    write_record_header(file, &fields, data_len as u32)?;

    for (topic, count) in &chunk_info.topic_counts {
        file.write(&(topic.len() as u32).to_le_bytes())?;
        file.write(topic.as_bytes())?;
        file.write(&count.to_le_bytes())?;
    }
    Ok(())
}
