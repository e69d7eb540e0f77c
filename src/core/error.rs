// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Error types for bag file operations.
//!
//! One error enum covers the whole engine:
//! - I/O failures on the underlying file
//! - Version and record-format violations
//! - Trailer / compression problems
//! - Disk-space exhaustion and runtime invariant violations

use std::fmt;

/// Errors that can occur while writing or reading a bag file.
#[derive(Debug, Clone)]
pub enum BagError {
    /// Underlying read/write/seek/truncate failed
    Io {
        /// Operation that failed
        context: String,
        /// Error message from the OS
        message: String,
    },

    /// Version line missing or unsupported
    BadVersion {
        /// The version that was found (or a description of what was)
        version: String,
    },

    /// Malformed record, field size out of range, or wrong opcode
    BadFormat {
        /// What was being parsed
        context: String,
        /// Error message
        message: String,
    },

    /// Index position is the zero sentinel or points past end of file
    TruncatedTrailer {
        /// Error message
        message: String,
    },

    /// Unrecognized compression string in a chunk header
    UnknownCompression {
        /// The compression string that was found
        compression: String,
    },

    /// Free space on the target filesystem is below the hard threshold
    DiskFull {
        /// Path whose filesystem is full
        path: String,
    },

    /// Runtime assertion failure (e.g. topic mismatch on random access)
    InvariantViolation {
        /// Description of the invariant that was violated
        invariant: String,
    },
}

impl BagError {
    /// Create an I/O error with operation context.
    pub fn io(context: impl Into<String>, err: impl fmt::Display) -> Self {
        BagError::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Create a bad-version error.
    pub fn bad_version(version: impl Into<String>) -> Self {
        BagError::BadVersion {
            version: version.into(),
        }
    }

    /// Create a format error.
    pub fn bad_format(context: impl Into<String>, message: impl Into<String>) -> Self {
        BagError::BadFormat {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a truncated-trailer error.
    pub fn truncated_trailer(message: impl Into<String>) -> Self {
        BagError::TruncatedTrailer {
            message: message.into(),
        }
    }

    /// Create an unknown-compression error.
    pub fn unknown_compression(compression: impl Into<String>) -> Self {
        BagError::UnknownCompression {
            compression: compression.into(),
        }
    }

    /// Create a disk-full error.
    pub fn disk_full(path: impl Into<String>) -> Self {
        BagError::DiskFull { path: path.into() }
    }

    /// Create an invariant-violation error.
    pub fn invariant_violation(invariant: impl Into<String>) -> Self {
        BagError::InvariantViolation {
            invariant: invariant.into(),
        }
    }
}

impl fmt::Display for BagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BagError::Io { context, message } => {
                write!(f, "I/O error in {context}: {message}")
            }
            BagError::BadVersion { version } => {
                write!(f, "Unsupported bag version: {version}")
            }
            BagError::BadFormat { context, message } => {
                write!(f, "Format error in {context}: {message}")
            }
            BagError::TruncatedTrailer { message } => {
                write!(f, "Truncated trailer: {message}")
            }
            BagError::UnknownCompression { compression } => {
                write!(f, "Unknown compression: '{compression}'")
            }
            BagError::DiskFull { path } => {
                write!(f, "Disk full on filesystem with {path}")
            }
            BagError::InvariantViolation { invariant } => {
                write!(f, "Invariant violation: {invariant}")
            }
        }
    }
}

impl std::error::Error for BagError {}

/// Result type for bag operations.
pub type Result<T> = std::result::Result<T, BagError>;
