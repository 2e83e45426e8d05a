//! Native status codes.
//!
//! All filesystem operation callbacks report their result in the NT status
//! code space. This module defines the `NtStatus` value type, the translation
//! from Win32 error codes, and the closed set of mount result codes.

use std::{error, fmt};

/// An NT status code as returned by every filesystem operation callback.
///
/// Values with the high bit set are errors, `0x8...` values are warnings and
/// zero is success. Applications usually return one of the named constants
/// below, or translate a Win32 error with `NtStatus::from_win32`.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct NtStatus(pub i32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0);
    pub const BUFFER_OVERFLOW: NtStatus = NtStatus(0x8000_0005u32 as i32);
    pub const UNSUCCESSFUL: NtStatus = NtStatus(0xC000_0001u32 as i32);
    pub const NOT_IMPLEMENTED: NtStatus = NtStatus(0xC000_0002u32 as i32);
    pub const INVALID_HANDLE: NtStatus = NtStatus(0xC000_0008u32 as i32);
    pub const INVALID_PARAMETER: NtStatus = NtStatus(0xC000_000Du32 as i32);
    pub const INVALID_DEVICE_REQUEST: NtStatus = NtStatus(0xC000_0010u32 as i32);
    pub const END_OF_FILE: NtStatus = NtStatus(0xC000_0011u32 as i32);
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022u32 as i32);
    pub const BUFFER_TOO_SMALL: NtStatus = NtStatus(0xC000_0023u32 as i32);
    pub const OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus(0xC000_0034u32 as i32);
    pub const OBJECT_NAME_COLLISION: NtStatus = NtStatus(0xC000_0035u32 as i32);
    pub const OBJECT_PATH_NOT_FOUND: NtStatus = NtStatus(0xC000_003Au32 as i32);
    pub const SHARING_VIOLATION: NtStatus = NtStatus(0xC000_0043u32 as i32);
    pub const DELETE_PENDING: NtStatus = NtStatus(0xC000_0056u32 as i32);
    pub const DISK_FULL: NtStatus = NtStatus(0xC000_007Fu32 as i32);
    pub const FILE_IS_A_DIRECTORY: NtStatus = NtStatus(0xC000_00BAu32 as i32);
    pub const NOT_SUPPORTED: NtStatus = NtStatus(0xC000_00BBu32 as i32);
    pub const DIRECTORY_NOT_EMPTY: NtStatus = NtStatus(0xC000_0101u32 as i32);
    pub const NOT_A_DIRECTORY: NtStatus = NtStatus(0xC000_0103u32 as i32);
    pub const CANNOT_DELETE: NtStatus = NtStatus(0xC000_0121u32 as i32);

    /// Returns true if the status signals success (zero or an informational
    /// value below the warning range).
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// Returns true if the status signals an error.
    pub fn is_error(self) -> bool {
        self.0 < 0
    }

    /// Translate a Win32 error code into the corresponding NT status.
    ///
    /// The mapping is a pure lookup. Codes without a known mapping translate
    /// to `UNSUCCESSFUL` so that an unmapped error can never be mistaken for
    /// success.
    pub fn from_win32(error: u32) -> NtStatus {
        match error {
            ERROR_SUCCESS => NtStatus::SUCCESS,
            ERROR_INVALID_FUNCTION => NtStatus::NOT_IMPLEMENTED,
            ERROR_FILE_NOT_FOUND => NtStatus::OBJECT_NAME_NOT_FOUND,
            ERROR_PATH_NOT_FOUND => NtStatus::OBJECT_PATH_NOT_FOUND,
            ERROR_ACCESS_DENIED => NtStatus::ACCESS_DENIED,
            ERROR_INVALID_HANDLE => NtStatus::INVALID_HANDLE,
            ERROR_NOT_SUPPORTED => NtStatus::NOT_SUPPORTED,
            ERROR_SHARING_VIOLATION => NtStatus::SHARING_VIOLATION,
            ERROR_HANDLE_EOF => NtStatus::END_OF_FILE,
            ERROR_FILE_EXISTS => NtStatus::OBJECT_NAME_COLLISION,
            ERROR_INVALID_PARAMETER => NtStatus::INVALID_PARAMETER,
            ERROR_DISK_FULL => NtStatus::DISK_FULL,
            ERROR_INSUFFICIENT_BUFFER => NtStatus::BUFFER_TOO_SMALL,
            ERROR_DIR_NOT_EMPTY => NtStatus::DIRECTORY_NOT_EMPTY,
            ERROR_ALREADY_EXISTS => NtStatus::OBJECT_NAME_COLLISION,
            ERROR_MORE_DATA => NtStatus::BUFFER_OVERFLOW,
            ERROR_DIRECTORY => NtStatus::NOT_A_DIRECTORY,
            ERROR_DELETE_PENDING => NtStatus::DELETE_PENDING,
            _ => NtStatus::UNSUCCESSFUL,
        }
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            NtStatus::SUCCESS => "STATUS_SUCCESS",
            NtStatus::BUFFER_OVERFLOW => "STATUS_BUFFER_OVERFLOW",
            NtStatus::UNSUCCESSFUL => "STATUS_UNSUCCESSFUL",
            NtStatus::NOT_IMPLEMENTED => "STATUS_NOT_IMPLEMENTED",
            NtStatus::INVALID_HANDLE => "STATUS_INVALID_HANDLE",
            NtStatus::INVALID_PARAMETER => "STATUS_INVALID_PARAMETER",
            NtStatus::INVALID_DEVICE_REQUEST => "STATUS_INVALID_DEVICE_REQUEST",
            NtStatus::END_OF_FILE => "STATUS_END_OF_FILE",
            NtStatus::ACCESS_DENIED => "STATUS_ACCESS_DENIED",
            NtStatus::BUFFER_TOO_SMALL => "STATUS_BUFFER_TOO_SMALL",
            NtStatus::OBJECT_NAME_NOT_FOUND => "STATUS_OBJECT_NAME_NOT_FOUND",
            NtStatus::OBJECT_NAME_COLLISION => "STATUS_OBJECT_NAME_COLLISION",
            NtStatus::OBJECT_PATH_NOT_FOUND => "STATUS_OBJECT_PATH_NOT_FOUND",
            NtStatus::SHARING_VIOLATION => "STATUS_SHARING_VIOLATION",
            NtStatus::DELETE_PENDING => "STATUS_DELETE_PENDING",
            NtStatus::DISK_FULL => "STATUS_DISK_FULL",
            NtStatus::FILE_IS_A_DIRECTORY => "STATUS_FILE_IS_A_DIRECTORY",
            NtStatus::NOT_SUPPORTED => "STATUS_NOT_SUPPORTED",
            NtStatus::DIRECTORY_NOT_EMPTY => "STATUS_DIRECTORY_NOT_EMPTY",
            NtStatus::CANNOT_DELETE => "STATUS_CANNOT_DELETE",
            NtStatus::NOT_A_DIRECTORY => "STATUS_NOT_A_DIRECTORY",
            _ => return None,
        })
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "NtStatus({:#010x})", self.0 as u32),
        }
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_INVALID_FUNCTION: u32 = 1;
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_PATH_NOT_FOUND: u32 = 3;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_INVALID_HANDLE: u32 = 6;
pub const ERROR_NOT_SUPPORTED: u32 = 50;
pub const ERROR_SHARING_VIOLATION: u32 = 32;
pub const ERROR_HANDLE_EOF: u32 = 38;
pub const ERROR_FILE_EXISTS: u32 = 80;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_DISK_FULL: u32 = 112;
pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
pub const ERROR_DIR_NOT_EMPTY: u32 = 145;
pub const ERROR_ALREADY_EXISTS: u32 = 183;
pub const ERROR_MORE_DATA: u32 = 234;
pub const ERROR_DIRECTORY: u32 = 267;
pub const ERROR_DELETE_PENDING: u32 = 303;

/// Error returned when a mount attempt fails.
///
/// This is the closed set of results a mount can end with; a successful mount
/// simply returns `Ok`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MountError {
    /// A generic mount failure.
    Error,
    /// The requested drive letter is not valid.
    BadDriveLetter,
    /// The kernel driver could not be reached or installed.
    DriverInstall,
    /// The driver reported an error while starting the volume.
    Start,
    /// The mount target could not be assigned, it is probably in use by
    /// another volume.
    Mount,
    /// The mount point is invalid.
    MountPoint,
    /// The requested library version is not compatible.
    Version,
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MountError::Error => "mount failed",
            MountError::BadDriveLetter => "bad drive letter",
            MountError::DriverInstall => "driver unavailable",
            MountError::Start => "driver reported a start failure",
            MountError::Mount => "mount target is busy",
            MountError::MountPoint => "invalid mount point",
            MountError::Version => "incompatible version requested",
        };
        f.write_str(msg)
    }
}

impl error::Error for MountError {}
