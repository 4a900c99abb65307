// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for FlashKV operations.
//!
//! Provides structured error handling plus the numeric status contract used
//! by the CLI as its process exit code.

use std::fmt;

/// Standard Result type for all FlashKV operations.
pub type KvsResult<T> = Result<T, KvsError>;

/// Error types for FlashKV operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvsError {
    /// Invalid caller-supplied parameter (wrong key length, empty value, ...).
    InvalidParam { reason: String },

    /// Key not present, or present but not valid.
    KeyNotFound,

    /// Key already stored; replacement goes through `update`.
    KeyAlreadyExists,

    /// Caller buffer too small; `required` is the exact value size.
    BufferTooSmall { required: usize },

    /// No free run of words / no free metadata slot, even after GC.
    NoSpace,

    /// Key index reached `max_key_count` entries.
    IndexFull,

    /// Requested geometry leaves fewer metadata slots than the minimum.
    MetadataAreaTooSmall { max_keys: u32, min: u32 },

    /// Page number outside the device.
    InvalidPage { page: u32 },

    /// Word offset outside the page.
    InvalidWordOffset { word: u32 },

    /// Region offset or size not a multiple of the word size.
    Unaligned { offset: u32, size: u32 },

    /// I/O error in the simulator or the filesystem around it.
    Io { operation: String, reason: String },

    /// The write-failure countdown fired; the device behaves as if power
    /// was cut before the write touched the medium.
    PowerLoss,

    /// Both superblock copies failed their CRC check.
    CorruptSuperblock,
}

impl fmt::Display for KvsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvsError::InvalidParam { reason } => {
                write!(f, "Invalid parameter: {}", reason)
            }
            KvsError::KeyNotFound => write!(f, "Key not found"),
            KvsError::KeyAlreadyExists => write!(f, "Key already exists"),
            KvsError::BufferTooSmall { required } => {
                write!(f, "Buffer too small: value is {} bytes", required)
            }
            KvsError::NoSpace => write!(f, "No space left in store"),
            KvsError::IndexFull => write!(f, "Key index is full"),
            KvsError::MetadataAreaTooSmall { max_keys, min } => {
                write!(
                    f,
                    "Metadata area too small: {} slots, minimum is {}",
                    max_keys, min
                )
            }
            KvsError::InvalidPage { page } => write!(f, "Invalid page number: {}", page),
            KvsError::InvalidWordOffset { word } => {
                write!(f, "Invalid word offset: {}", word)
            }
            KvsError::Unaligned { offset, size } => {
                write!(
                    f,
                    "Region not word-aligned: offset {} size {}",
                    offset, size
                )
            }
            KvsError::Io { operation, reason } => {
                write!(f, "I/O error during {}: {}", operation, reason)
            }
            KvsError::PowerLoss => write!(f, "Simulated power loss"),
            KvsError::CorruptSuperblock => {
                write!(f, "Both superblock copies are corrupt")
            }
        }
    }
}

impl std::error::Error for KvsError {}

impl KvsError {
    /// Shorthand for an I/O error wrapping a `std::io::Error`.
    pub fn io(operation: &str, err: std::io::Error) -> Self {
        KvsError::Io {
            operation: operation.to_string(),
            reason: err.to_string(),
        }
    }

    /// Maps the error onto the numeric status contract.
    ///
    /// Expected conditions keep their domain code; everything unexpected
    /// (I/O, torn writes, integrity failures) collapses to
    /// `Status::StorageFailure`.
    pub fn status(&self) -> Status {
        match self {
            KvsError::InvalidParam { .. } => Status::InvalidParam,
            KvsError::KeyNotFound => Status::KeyNotFound,
            KvsError::KeyAlreadyExists => Status::KeyAlreadyExists,
            KvsError::BufferTooSmall { .. } => Status::BufferTooSmall,
            KvsError::NoSpace | KvsError::IndexFull => Status::NoSpace,
            KvsError::MetadataAreaTooSmall { .. }
            | KvsError::InvalidPage { .. }
            | KvsError::InvalidWordOffset { .. }
            | KvsError::Unaligned { .. }
            | KvsError::Io { .. }
            | KvsError::PowerLoss
            | KvsError::CorruptSuperblock => Status::StorageFailure,
        }
    }
}

/// Numeric status codes of the public API.
///
/// The library itself reports `KvsError`; these codes are the wire/exit-code
/// form used by the CLI. `NotInitialized` and `AlreadyInitialized` cannot be
/// produced by the library (the store is a value, not a global), but remain
/// part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    NotInitialized = -1,
    AlreadyInitialized = -2,
    InvalidParam = -3,
    KeyNotFound = -4,
    KeyAlreadyExists = -5,
    BufferTooSmall = -6,
    NoSpace = -7,
    StorageFailure = -8,
    Unknown = -9,
}

impl Status {
    /// Numeric code, as returned to the operating system by the CLI.
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_contract() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::NotInitialized.code(), -1);
        assert_eq!(Status::AlreadyInitialized.code(), -2);
        assert_eq!(Status::InvalidParam.code(), -3);
        assert_eq!(Status::KeyNotFound.code(), -4);
        assert_eq!(Status::KeyAlreadyExists.code(), -5);
        assert_eq!(Status::BufferTooSmall.code(), -6);
        assert_eq!(Status::NoSpace.code(), -7);
        assert_eq!(Status::StorageFailure.code(), -8);
        assert_eq!(Status::Unknown.code(), -9);
    }

    #[test]
    fn test_domain_errors_keep_their_code() {
        assert_eq!(KvsError::KeyNotFound.status(), Status::KeyNotFound);
        assert_eq!(
            KvsError::KeyAlreadyExists.status(),
            Status::KeyAlreadyExists
        );
        assert_eq!(
            KvsError::BufferTooSmall { required: 1000 }.status(),
            Status::BufferTooSmall
        );
        assert_eq!(KvsError::NoSpace.status(), Status::NoSpace);
        assert_eq!(KvsError::IndexFull.status(), Status::NoSpace);
    }

    #[test]
    fn test_unexpected_errors_collapse_to_storage_failure() {
        assert_eq!(KvsError::PowerLoss.status(), Status::StorageFailure);
        assert_eq!(
            KvsError::CorruptSuperblock.status(),
            Status::StorageFailure
        );
        assert_eq!(
            KvsError::io("write_word", std::io::Error::other("boom")).status(),
            Status::StorageFailure
        );
    }
}
