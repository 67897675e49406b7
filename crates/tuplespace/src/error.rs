// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of CoordSpace.
//
// CoordSpace is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// CoordSpace is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with CoordSpace. If not, see <https://www.gnu.org/licenses/>.

//! Error types for tuple operations

use std::fmt;

/// Result alias for tuple operations.
pub type TupleResult<T> = Result<T, TupleError>;

/// Numeric failure codes reported by tuple operations.
///
/// The numeric values are stable and [`ErrorCode::from_code`] maps them
/// back, so a code logged or stored elsewhere reads the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Unclassified failure
    Generic = 1,
    /// Key could not be parsed
    BadKeyName = 2,
    /// Payload does not fit the destination
    BufferOverflow = 3,
    /// A concrete tuple was required
    AbstractTuple = 4,
    /// Allocation failure
    OutOfMemory = 5,
    /// Index structure inconsistency
    IndexError = 6,
    /// Handle does not name a live subscription or callback
    BadHandle = 7,
    /// Cursor is out of range
    BadIndex = 8,
    /// Argument outside the accepted domain
    BadArgument = 9,
    /// Tuple is not a well-formed meta tuple
    InvalidMeta = 10,
}

impl ErrorCode {
    /// Look up a code by its numeric value.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => ErrorCode::Generic,
            2 => ErrorCode::BadKeyName,
            3 => ErrorCode::BufferOverflow,
            4 => ErrorCode::AbstractTuple,
            5 => ErrorCode::OutOfMemory,
            6 => ErrorCode::IndexError,
            7 => ErrorCode::BadHandle,
            8 => ErrorCode::BadIndex,
            9 => ErrorCode::BadArgument,
            10 => ErrorCode::InvalidMeta,
            _ => return None,
        })
    }

    /// Numeric value of this code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Human readable description.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Generic => "Generic tuple error",
            ErrorCode::BadKeyName => "Invalid key name",
            ErrorCode::BufferOverflow => "Buffer overflow",
            ErrorCode::AbstractTuple => "Tuple is abstract",
            ErrorCode::OutOfMemory => "Out of memory",
            ErrorCode::IndexError => "Hashtable error",
            ErrorCode::BadHandle => "Invalid handle",
            ErrorCode::BadIndex => "Invalid index",
            ErrorCode::BadArgument => "Bad argument",
            ErrorCode::InvalidMeta => "Invalid meta tuple",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuple operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleError {
    /// A wildcarded tuple was passed where a concrete one is required
    #[error("Invalid use of abstract tuple: {0}")]
    InvalidAbstractTupleUse(String),

    /// Key is empty, too long, too deep or has empty segments
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Meta tuple payload could not be parsed
    #[error("Invalid meta tuple: {0}")]
    InvalidMeta(String),

    /// Handle does not name a live subscription
    #[error("Unknown handle: {0}")]
    UnknownHandle(u64),

    /// Operation failed with a kernel error code
    #[error("Tuple operation failed: {0}")]
    OperationFailed(ErrorCode),
}

impl TupleError {
    /// The numeric code matching this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            TupleError::InvalidAbstractTupleUse(_) => ErrorCode::AbstractTuple,
            TupleError::InvalidKey(_) => ErrorCode::BadKeyName,
            TupleError::InvalidMeta(_) => ErrorCode::InvalidMeta,
            TupleError::UnknownHandle(_) => ErrorCode::BadHandle,
            TupleError::OperationFailed(code) => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        for code in 1..=10 {
            let parsed = ErrorCode::from_code(code).unwrap();
            assert_eq!(parsed.code(), code);
        }
        assert_eq!(ErrorCode::from_code(0), None);
        assert_eq!(ErrorCode::from_code(11), None);
        assert_eq!(ErrorCode::InvalidMeta.to_string(), "Invalid meta tuple");
    }

    #[test]
    fn test_error_maps_to_code() {
        let err = TupleError::InvalidAbstractTupleUse("*:temp".to_string());
        assert_eq!(err.code(), ErrorCode::AbstractTuple);
        let err = TupleError::OperationFailed(ErrorCode::BadArgument);
        assert_eq!(err.to_string(), "Tuple operation failed: Bad argument");
    }
}
