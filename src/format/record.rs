// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Record framing: the self-describing header map and its length-prefixed
//! encoding.

use std::collections::BTreeMap;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::core::{BagError, Result};
use crate::io::chunked_file::ChunkedFile;

/// An ordered map of record header fields.
///
/// Field names are ASCII without `=`; values are raw bytes. Encoding order
/// is the map order, so a header encodes to the same bytes every time it is
/// written — the chunk header relies on this when it is rewritten in place.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    fields: BTreeMap<String, Vec<u8>>,
}

impl FieldMap {
    /// Create an empty field map.
    pub fn new() -> Self {
        FieldMap::default()
    }

    /// Insert a field. An existing field with the same name is replaced.
    pub fn insert(&mut self, name: &str, value: Vec<u8>) {
        self.fields.insert(name.to_string(), value);
    }

    /// Look up a field's raw value.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(|v| v.as_slice())
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the map has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode to the on-disk header layout:
    /// `<field_len: u32><name>=<value>` per field.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            let field_len = name.len() + 1 + value.len();
            out.extend_from_slice(&(field_len as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(b'=');
            out.extend_from_slice(value);
        }
        out
    }

    /// Parse header bytes into a field map.
    ///
    /// Fails with `BadFormat` if a field length exceeds the remaining
    /// input or a field has no `=` separator. A repeated field name is
    /// tolerated; the last occurrence wins.
    pub fn parse(header: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(header);
        let mut fields = BTreeMap::new();

        while (cursor.position() as usize) < header.len() {
            let field_len = cursor.read_u32::<LittleEndian>().map_err(|_| {
                BagError::bad_format("FieldMap::parse", "truncated field length")
            })? as usize;

            let start = cursor.position() as usize;
            if field_len > header.len() - start {
                return Err(BagError::bad_format(
                    "FieldMap::parse",
                    format!(
                        "field length {field_len} exceeds remaining {} header bytes",
                        header.len() - start
                    ),
                ));
            }

            let field = &header[start..start + field_len];
            cursor.set_position((start + field_len) as u64);

            let eq = field.iter().position(|&b| b == b'=').ok_or_else(|| {
                BagError::bad_format("FieldMap::parse", "field without '=' separator")
            })?;

            let name = std::str::from_utf8(&field[..eq]).map_err(|_| {
                BagError::bad_format("FieldMap::parse", "field name is not valid UTF-8")
            })?;

            fields.insert(name.to_string(), field[eq + 1..].to_vec());
        }

        Ok(FieldMap { fields })
    }
}

/// Write a record header and the data-length prefix.
///
/// The caller writes the `data_len` data bytes afterwards; for chunk
/// records the "data" is the compressed stream that follows.
pub fn write_record_header(file: &mut ChunkedFile, fields: &FieldMap, data_len: u32) -> Result<()> {
    let header = fields.encode();
    file.write(&(header.len() as u32).to_le_bytes())?;
    file.write(&header)?;
    file.write(&data_len.to_le_bytes())?;
    Ok(())
}

/// Write a complete record: header, data-length prefix, and data.
pub fn write_record(file: &mut ChunkedFile, fields: &FieldMap, data: &[u8]) -> Result<()> {
    write_record_header(file, fields, data.len() as u32)?;
    file.write(data)?;
    Ok(())
}

/// Read a record header from the file, returning the parsed fields and the
/// size of the data section that follows.
pub fn read_record_header(file: &mut ChunkedFile) -> Result<(FieldMap, u32)> {
    let remaining = file.len()?.saturating_sub(file.tell());

    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf)?;
    let header_len = u32::from_le_bytes(len_buf);

    if header_len as u64 + 4 > remaining {
        return Err(BagError::bad_format(
            "read_record_header",
            format!("header length {header_len} exceeds remaining file bytes"),
        ));
    }

    let mut header = vec![0u8; header_len as usize];
    file.read_exact(&mut header)?;
    let fields = FieldMap::parse(&header)?;

    file.read_exact(&mut len_buf)?;
    let data_size = u32::from_le_bytes(len_buf);

    Ok((fields, data_size))
}

/// Parse a record header from an in-memory buffer at `offset`.
///
/// Returns the parsed fields, the data size, and the number of bytes
/// consumed (both length prefixes plus the header). The data section
/// starts at `offset + consumed`.
pub fn read_record_header_at(buf: &[u8], offset: usize) -> Result<(FieldMap, u32, usize)> {
    let slice = buf.get(offset..).ok_or_else(|| {
        BagError::bad_format("read_record_header_at", "offset past end of buffer")
    })?;

    let mut cursor = Cursor::new(slice);
    let header_len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| BagError::bad_format("read_record_header_at", "truncated header length"))?
        as usize;

    if header_len > slice.len().saturating_sub(8) {
        return Err(BagError::bad_format(
            "read_record_header_at",
            format!("header length {header_len} exceeds remaining buffer"),
        ));
    }

    let fields = FieldMap::parse(&slice[4..4 + header_len])?;

    cursor.set_position(4 + header_len as u64);
    let data_size = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| BagError::bad_format("read_record_header_at", "truncated data length"))?;

    Ok((fields, data_size, 8 + header_len))
}
