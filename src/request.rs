//! Decoded filesystem operation requests and replies.
//!
//! A request represents one filesystem operation the kernel driver wants the
//! mounted filesystem to perform. The transport decodes its own wire framing
//! into these values; the dispatcher only ever sees the decoded form and
//! posts a `Reply` for every request it takes.

use std::time::SystemTime;

use crate::operations::{DiskSpaceInfo, FileInfo, FindData, FindStreamData, VolumeInfo};
use crate::status::NtStatus;

/// I/O flags carried by an individual request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RequestFlags {
    /// The read or write is paging I/O.
    pub paging_io: bool,
    /// The read or write is synchronous I/O.
    pub synchronous_io: bool,
    /// Read or write directly from the data source without caching.
    pub no_cache: bool,
    /// Write to the current end of file instead of the offset parameter.
    pub write_to_end_of_file: bool,
}

/// The operation a request asks for, with its operation-specific parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationKind {
    Create {
        desired_access: u32,
        file_attributes: u32,
        share_access: u32,
        create_disposition: u32,
        create_options: u32,
    },
    Cleanup,
    Close,
    Read {
        offset: i64,
        length: u32,
    },
    Write {
        offset: i64,
        data: Vec<u8>,
    },
    Flush,
    GetFileInformation,
    FindFiles {
        /// Search expression the caller enumerates with; `None` asks for a
        /// plain unfiltered listing.
        pattern: Option<String>,
    },
    SetFileAttributes {
        file_attributes: u32,
    },
    SetFileTime {
        creation_time: Option<SystemTime>,
        last_access_time: Option<SystemTime>,
        last_write_time: Option<SystemTime>,
    },
    DeleteFile,
    DeleteDirectory,
    MoveFile {
        new_path: String,
        replace_if_existing: bool,
    },
    SetEndOfFile {
        offset: i64,
    },
    SetAllocationSize {
        length: i64,
    },
    LockFile {
        offset: i64,
        length: i64,
    },
    UnlockFile {
        offset: i64,
        length: i64,
    },
    GetDiskFreeSpace,
    GetVolumeInformation,
    GetFileSecurity {
        security_information: u32,
        buffer_length: u32,
    },
    SetFileSecurity {
        security_information: u32,
        descriptor: Vec<u8>,
    },
    FindStreams,
}

impl OperationKind {
    /// Operation name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Create { .. } => "Create",
            OperationKind::Cleanup => "Cleanup",
            OperationKind::Close => "Close",
            OperationKind::Read { .. } => "Read",
            OperationKind::Write { .. } => "Write",
            OperationKind::Flush => "Flush",
            OperationKind::GetFileInformation => "GetFileInformation",
            OperationKind::FindFiles { .. } => "FindFiles",
            OperationKind::SetFileAttributes { .. } => "SetFileAttributes",
            OperationKind::SetFileTime { .. } => "SetFileTime",
            OperationKind::DeleteFile => "DeleteFile",
            OperationKind::DeleteDirectory => "DeleteDirectory",
            OperationKind::MoveFile { .. } => "MoveFile",
            OperationKind::SetEndOfFile { .. } => "SetEndOfFile",
            OperationKind::SetAllocationSize { .. } => "SetAllocationSize",
            OperationKind::LockFile { .. } => "LockFile",
            OperationKind::UnlockFile { .. } => "UnlockFile",
            OperationKind::GetDiskFreeSpace => "GetDiskFreeSpace",
            OperationKind::GetVolumeInformation => "GetVolumeInformation",
            OperationKind::GetFileSecurity { .. } => "GetFileSecurity",
            OperationKind::SetFileSecurity { .. } => "SetFileSecurity",
            OperationKind::FindStreams => "FindStreams",
        }
    }

    /// True for the operations that run without an open file handle.
    pub fn is_handleless(&self) -> bool {
        matches!(self, OperationKind::GetDiskFreeSpace | OperationKind::GetVolumeInformation)
    }
}

/// One decoded operation request as produced by the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Identifier correlating this request with its reply.
    pub unique: u64,
    /// File path the request targets; empty for volume-level operations.
    pub path: String,
    /// Kernel-assigned key of the file handle the request operates on; zero
    /// for handle-less operations.
    pub handle: u64,
    /// Id of the process that issued the I/O.
    pub process_id: u32,
    /// Per-request I/O flags.
    pub flags: RequestFlags,
    /// The requested operation.
    pub kind: OperationKind,
}

impl Request {
    /// Create a request with default flags and no originating process.
    pub fn new<P: Into<String>>(unique: u64, path: P, handle: u64, kind: OperationKind) -> Request {
        Request {
            unique,
            path: path.into(),
            handle,
            process_id: 0,
            flags: RequestFlags::default(),
            kind,
        }
    }
}

/// Result payload carried back to the transport with a reply.
#[derive(Clone, Debug)]
pub enum ReplyPayload {
    None,
    /// Data read from a file.
    Data(Vec<u8>),
    /// Number of bytes written.
    Written(u32),
    FileInfo(FileInfo),
    /// Directory entries, already filtered if the dispatcher applied the
    /// search expression itself.
    Directory(Vec<FindData>),
    DiskSpace(DiskSpaceInfo),
    VolumeInfo(VolumeInfo),
    Security {
        descriptor: Vec<u8>,
        /// Size a caller-supplied buffer must have to hold the whole
        /// descriptor. Meaningful together with `BUFFER_OVERFLOW`.
        length_needed: u32,
    },
    Streams(Vec<FindStreamData>),
}

/// The result of one dispatched request.
#[derive(Clone, Debug)]
pub struct Reply {
    pub unique: u64,
    pub status: NtStatus,
    pub payload: ReplyPayload,
}

impl Reply {
    /// A reply carrying only a status.
    pub fn status(unique: u64, status: NtStatus) -> Reply {
        Reply { unique, status, payload: ReplyPayload::None }
    }

    pub fn new(unique: u64, status: NtStatus, payload: ReplyPayload) -> Reply {
        Reply { unique, status, payload }
    }
}
