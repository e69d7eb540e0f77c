// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Typed accessors for well-known header fields.
//!
//! Numeric fields are fixed-width little-endian; timestamps use the packed
//! u64 layout from [`BagTime`]. Reads are strict: a missing field or a
//! value of the wrong width is a format error.

use crate::core::{BagError, BagTime, Result};
use crate::format::field;
use crate::format::record::FieldMap;

impl FieldMap {
    /// Store a single-byte field.
    pub fn put_u8(&mut self, name: &str, value: u8) {
        self.insert(name, vec![value]);
    }

    /// Store a little-endian u32 field.
    pub fn put_u32(&mut self, name: &str, value: u32) {
        self.insert(name, value.to_le_bytes().to_vec());
    }

    /// Store a little-endian u64 field.
    pub fn put_u64(&mut self, name: &str, value: u64) {
        self.insert(name, value.to_le_bytes().to_vec());
    }

    /// Store a packed timestamp field.
    pub fn put_time(&mut self, name: &str, value: BagTime) {
        self.put_u64(name, value.to_packed());
    }

    /// Store a string field.
    pub fn put_str(&mut self, name: &str, value: &str) {
        self.insert(name, value.as_bytes().to_vec());
    }

    fn require(&self, name: &str) -> Result<&[u8]> {
        self.get(name)
            .ok_or_else(|| BagError::bad_format("FieldMap", format!("required '{name}' field missing")))
    }

    fn require_width(&self, name: &str, width: usize) -> Result<&[u8]> {
        let value = self.require(name)?;
        if value.len() != width {
            return Err(BagError::bad_format(
                "FieldMap",
                format!(
                    "field '{name}' is wrong size ({} bytes, expected {width})",
                    value.len()
                ),
            ));
        }
        Ok(value)
    }

    /// Read a single-byte field.
    pub fn get_u8(&self, name: &str) -> Result<u8> {
        Ok(self.require_width(name, 1)?[0])
    }

    /// Read a little-endian u32 field.
    pub fn get_u32(&self, name: &str) -> Result<u32> {
        let v = self.require_width(name, 4)?;
        Ok(u32::from_le_bytes([v[0], v[1], v[2], v[3]]))
    }

    /// Read a little-endian u64 field.
    pub fn get_u64(&self, name: &str) -> Result<u64> {
        let v = self.require_width(name, 8)?;
        Ok(u64::from_le_bytes([
            v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7],
        ]))
    }

    /// Read a packed timestamp field.
    pub fn get_time(&self, name: &str) -> Result<BagTime> {
        Ok(BagTime::from_packed(self.get_u64(name)?))
    }

    /// Read a UTF-8 string field.
    pub fn get_str(&self, name: &str) -> Result<&str> {
        std::str::from_utf8(self.require(name)?).map_err(|_| {
            BagError::bad_format("FieldMap", format!("field '{name}' is not valid UTF-8"))
        })
    }

    /// Read the record opcode.
    pub fn op(&self) -> Result<u8> {
        self.get_u8(field::OP)
    }

    /// Check that the record carries the expected opcode.
    pub fn expect_op(&self, expected: u8, context: &str) -> Result<()> {
        let op = self.op()?;
        if op != expected {
            return Err(BagError::bad_format(
                context,
                format!("expected op 0x{expected:02x}, found 0x{op:02x}"),
            ));
        }
        Ok(())
    }
}
