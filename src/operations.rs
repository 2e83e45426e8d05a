//! Filesystem operation interface.
//!
//! Interface for implementing the filesystem behind a mounted volume. Every
//! operation is optional: the default method bodies return
//! `NtStatus::NOT_IMPLEMENTED`, which the dispatcher forwards to the driver
//! as "operation unsupported" without treating it as a fault. Be aware that
//! leaving essential operations like `create_file` or `read_file`
//! unimplemented makes the volume unusable, even though it mounts fine.

use std::time::{Duration, SystemTime};

use crate::context::OpenFileState;
use crate::dispatch::InFlightRequest;
use crate::options::MountOptions;
use crate::status::NtStatus;

/// Result type of filesystem operation methods.
///
/// On failure, a method returns the `NtStatus` that is reported to the
/// kernel driver verbatim.
pub type OperationResult<T> = std::result::Result<T, NtStatus>;

/// Lazy, finite, non-restartable sequence of directory entries produced by a
/// listing operation. The dispatcher drains it exactly once.
pub type FindFilesIter = Box<dyn Iterator<Item = FindData> + Send>;

pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0000_0002;
pub const FILE_ATTRIBUTE_SYSTEM: u32 = 0x0000_0004;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0000_0020;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;
pub const FILE_ATTRIBUTE_TEMPORARY: u32 = 0x0000_0100;

/// Volume flag advertising a read-only volume. Added to the volume
/// information automatically when the mount is write-protected.
pub const FILE_READ_ONLY_VOLUME: u32 = 0x0008_0000;
pub const FILE_CASE_SENSITIVE_SEARCH: u32 = 0x0000_0001;
pub const FILE_CASE_PRESERVED_NAMES: u32 = 0x0000_0002;
pub const FILE_UNICODE_ON_DISK: u32 = 0x0000_0004;
pub const FILE_NAMED_STREAMS: u32 = 0x0004_0000;

// Create dispositions as the kernel hands them down.
pub const FILE_SUPERSEDE: u32 = 0;
pub const FILE_OPEN: u32 = 1;
pub const FILE_CREATE: u32 = 2;
pub const FILE_OPEN_IF: u32 = 3;
pub const FILE_OVERWRITE: u32 = 4;
pub const FILE_OVERWRITE_IF: u32 = 5;

// Create options relevant to dispatch.
pub const FILE_DIRECTORY_FILE: u32 = 0x0000_0001;
pub const FILE_NON_DIRECTORY_FILE: u32 = 0x0000_0040;
pub const FILE_DELETE_ON_CLOSE: u32 = 0x0000_1000;

// User-mode creation dispositions, for `map_kernel_to_user_create_file_flags`.
pub const CREATE_NEW: u32 = 1;
pub const CREATE_ALWAYS: u32 = 2;
pub const OPEN_EXISTING: u32 = 3;
pub const OPEN_ALWAYS: u32 = 4;
pub const TRUNCATE_EXISTING: u32 = 5;

/// Convert kernel create parameters to the user-mode equivalents.
///
/// Filesystems that forward `create_file` to a real file API can use this to
/// turn the kernel-level create disposition and options into the familiar
/// user-mode creation disposition and attribute flags.
pub fn map_kernel_to_user_create_file_flags(
    file_attributes: u32,
    create_options: u32,
    create_disposition: u32,
) -> (u32, u32) {
    const FILE_FLAG_BACKUP_SEMANTICS: u32 = 0x0200_0000;
    const FILE_FLAG_DELETE_ON_CLOSE: u32 = 0x0400_0000;
    const FILE_FLAG_NO_BUFFERING: u32 = 0x2000_0000;
    const FILE_FLAG_WRITE_THROUGH: u32 = 0x8000_0000;
    const FILE_NO_INTERMEDIATE_BUFFERING: u32 = 0x0000_0008;
    const FILE_WRITE_THROUGH: u32 = 0x0000_0002;
    const FILE_OPEN_FOR_BACKUP_INTENT: u32 = 0x0000_4000;

    let mut attributes_and_flags = file_attributes;
    if create_options & FILE_DELETE_ON_CLOSE != 0 {
        attributes_and_flags |= FILE_FLAG_DELETE_ON_CLOSE;
    }
    if create_options & FILE_NO_INTERMEDIATE_BUFFERING != 0 {
        attributes_and_flags |= FILE_FLAG_NO_BUFFERING;
    }
    if create_options & FILE_WRITE_THROUGH != 0 {
        attributes_and_flags |= FILE_FLAG_WRITE_THROUGH;
    }
    if create_options & FILE_OPEN_FOR_BACKUP_INTENT != 0 {
        attributes_and_flags |= FILE_FLAG_BACKUP_SEMANTICS;
    }

    let creation_disposition = match create_disposition {
        FILE_CREATE => CREATE_NEW,
        FILE_OPEN => OPEN_EXISTING,
        FILE_OPEN_IF => OPEN_ALWAYS,
        FILE_OVERWRITE => TRUNCATE_EXISTING,
        FILE_SUPERSEDE | FILE_OVERWRITE_IF => CREATE_ALWAYS,
        _ => OPEN_EXISTING,
    };
    (attributes_and_flags, creation_disposition)
}

/// One directory entry produced by a listing operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FindData {
    pub file_name: String,
    pub attributes: u32,
    pub creation_time: SystemTime,
    pub last_access_time: SystemTime,
    pub last_write_time: SystemTime,
    pub file_size: u64,
}

impl FindData {
    pub fn is_directory(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

/// One alternate data stream of a file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FindStreamData {
    /// Stream name, including the `:stream:$DATA` decoration.
    pub stream_name: String,
    pub stream_size: i64,
}

/// By-handle information about an open file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileInfo {
    pub attributes: u32,
    pub creation_time: SystemTime,
    pub last_access_time: SystemTime,
    pub last_write_time: SystemTime,
    pub file_size: u64,
    pub number_of_links: u32,
    pub file_index: u64,
}

/// Information about the volume itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeInfo {
    pub name: String,
    pub serial_number: u32,
    pub maximum_component_length: u32,
    pub filesystem_flags: u32,
    pub filesystem_name: String,
}

/// Free and total space of the volume.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DiskSpaceInfo {
    /// Total size of the volume in bytes.
    pub byte_count: u64,
    /// Free space in bytes.
    pub free_byte_count: u64,
    /// Free space available to the calling user in bytes.
    pub available_byte_count: u64,
}

/// Information about the operation currently being dispatched.
///
/// A borrow of the per-handle state and the mount configuration, valid for
/// the duration of a single operation callback. Callbacks use it to carry an
/// opaque context value across the open/use/close lifetime of a file, to
/// inspect the I/O flags of the request, and to extend the request deadline
/// from long-running work.
#[derive(Debug)]
pub struct OperationInfo<'a> {
    pub(crate) file: Option<&'a OpenFileState>,
    pub(crate) in_flight: Option<&'a InFlightRequest>,
    pub(crate) process_id: u32,
    pub(crate) options: &'a MountOptions,
}

impl<'a> OperationInfo<'a> {
    /// Info for volume-level notifications that run outside request dispatch.
    pub(crate) fn volume(options: &'a MountOptions) -> OperationInfo<'a> {
        OperationInfo { file: None, in_flight: None, process_id: std::process::id(), options }
    }

    /// The opaque per-handle context value, `0` if never set.
    pub fn context(&self) -> u64 {
        self.file.map_or(0, |f| f.context())
    }

    /// Store an opaque value that every later operation on the same handle
    /// can retrieve, until the handle is closed. The library never
    /// interprets it.
    pub fn set_context(&self, context: u64) {
        if let Some(file) = self.file {
            file.set_context(context);
        }
    }

    /// Whether the handle refers to a directory. `create_file` must set this
    /// when it opens a directory.
    pub fn is_directory(&self) -> bool {
        self.file.map_or(false, |f| f.is_directory())
    }

    pub fn set_is_directory(&self, is_directory: bool) {
        if let Some(file) = self.file {
            file.set_is_directory(is_directory);
        }
    }

    /// Whether the file is to be deleted when the cleanup notification for
    /// its handle arrives. `cleanup` implementations perform the actual
    /// removal when this is set.
    pub fn delete_on_close(&self) -> bool {
        self.file.map_or(false, |f| f.delete_on_close())
    }

    pub fn set_delete_on_close(&self, delete_on_close: bool) {
        if let Some(file) = self.file {
            file.set_delete_on_close(delete_on_close);
        }
    }

    pub fn paging_io(&self) -> bool {
        self.file.map_or(false, |f| f.paging_io())
    }

    pub fn synchronous_io(&self) -> bool {
        self.file.map_or(false, |f| f.synchronous_io())
    }

    pub fn no_cache(&self) -> bool {
        self.file.map_or(false, |f| f.no_cache())
    }

    pub fn write_to_end_of_file(&self) -> bool {
        self.file.map_or(false, |f| f.write_to_end_of_file())
    }

    /// Id of the process that requested the I/O.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// The options the volume was mounted with.
    pub fn mount_options(&self) -> &MountOptions {
        self.options
    }

    /// The mount-wide opaque context from the mount options.
    pub fn global_context(&self) -> u64 {
        self.options.global_context
    }

    /// Push the deadline of the current request forward by `extension`.
    ///
    /// Long-running operations call this periodically so the driver keeps
    /// waiting instead of timing the request out. Returns `false` when there
    /// is no live request to extend.
    pub fn reset_timeout(&self, extension: Duration) -> bool {
        match self.in_flight {
            Some(in_flight) => in_flight.extend(extension),
            None => false,
        }
    }
}

/// The operations of a mounted filesystem.
///
/// This trait must be implemented to provide a filesystem behind a mounted
/// volume. Every method has a default implementation returning
/// `NtStatus::NOT_IMPLEMENTED`, so implementations only provide the
/// operations they support. Operations on the same handle may be invoked
/// concurrently from different dispatcher threads; implementations are
/// responsible for their own data-level serialization.
pub trait FileSystemHandler: Send + Sync {
    /// Open or create a file or directory.
    ///
    /// Called for every handle the kernel opens on the volume, for
    /// directories as well as files. Implementations that open a directory
    /// must call `info.set_is_directory(true)`, and may store a context
    /// value with `info.set_context` that all later operations on the same
    /// handle can retrieve.
    #[allow(clippy::too_many_arguments)]
    fn create_file(
        &self,
        _path: &str,
        _desired_access: u32,
        _file_attributes: u32,
        _share_access: u32,
        _create_disposition: u32,
        _create_options: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Last-chance processing before the handle is closed.
    ///
    /// When `info.delete_on_close()` is set, the file must be removed here
    /// and not earlier; see `delete_file`.
    fn cleanup(&self, _path: &str, _info: &OperationInfo<'_>) {}

    /// The handle is gone; release whatever the context value refers to.
    fn close_file(&self, _path: &str, _info: &OperationInfo<'_>) {}

    /// Read up to `length` bytes starting at `offset`.
    fn read_file(
        &self,
        _path: &str,
        _offset: i64,
        _length: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<Vec<u8>> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Write `data` at `offset`, or at the end of the file when
    /// `info.write_to_end_of_file()` is set. Returns the number of bytes
    /// written.
    fn write_file(
        &self,
        _path: &str,
        _offset: i64,
        _data: &[u8],
        _info: &OperationInfo<'_>,
    ) -> OperationResult<u32> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Flush buffered data of the handle to its backing store.
    fn flush_file_buffers(&self, _path: &str, _info: &OperationInfo<'_>) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Get by-handle information about a file.
    fn get_file_information(
        &self,
        _path: &str,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<FileInfo> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// List a directory.
    ///
    /// Only called when `find_files_with_pattern` is left unimplemented (or
    /// explicitly reports `NOT_IMPLEMENTED`); the dispatcher then filters
    /// the produced entries against the search expression itself.
    fn find_files(
        &self,
        _path: &str,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<FindFilesIter> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// List the directory entries matching a search expression.
    ///
    /// Preferred over `find_files` when implemented; the entries are
    /// forwarded without further filtering.
    fn find_files_with_pattern(
        &self,
        _path: &str,
        _pattern: &str,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<FindFilesIter> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Set the attribute flags of a file.
    fn set_file_attributes(
        &self,
        _path: &str,
        _file_attributes: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Set the timestamps of a file. `None` leaves a timestamp unchanged.
    fn set_file_time(
        &self,
        _path: &str,
        _creation_time: Option<SystemTime>,
        _last_access_time: Option<SystemTime>,
        _last_write_time: Option<SystemTime>,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Check whether a file can be deleted, without deleting it.
    ///
    /// Success only records the delete intent; the actual removal happens in
    /// `cleanup` once the handle is closed with the intent still standing.
    fn delete_file(&self, _path: &str, _info: &OperationInfo<'_>) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Check whether a directory can be deleted, without deleting it. Report
    /// `NtStatus::DIRECTORY_NOT_EMPTY` for non-empty directories.
    fn delete_directory(&self, _path: &str, _info: &OperationInfo<'_>) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Move or rename a file or directory.
    fn move_file(
        &self,
        _path: &str,
        _new_path: &str,
        _replace_if_existing: bool,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Truncate or extend a file to `offset` bytes.
    fn set_end_of_file(
        &self,
        _path: &str,
        _offset: i64,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Reserve `length` bytes of allocation for a file.
    fn set_allocation_size(
        &self,
        _path: &str,
        _length: i64,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Lock a byte range. Only delivered when the volume is mounted with
    /// user-mode file locking; otherwise the driver handles locking itself.
    fn lock_file(
        &self,
        _path: &str,
        _offset: i64,
        _length: i64,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Unlock a byte range. See `lock_file`.
    fn unlock_file(
        &self,
        _path: &str,
        _offset: i64,
        _length: i64,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Report free and total space of the volume.
    ///
    /// May be called before any `create_file`; there is no per-handle
    /// context to consult.
    fn get_disk_free_space(&self, _info: &OperationInfo<'_>) -> OperationResult<DiskSpaceInfo> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Report name, serial number and capability flags of the volume.
    ///
    /// May be called before any `create_file`; there is no per-handle
    /// context to consult.
    fn get_volume_information(&self, _info: &OperationInfo<'_>) -> OperationResult<VolumeInfo> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// The volume was successfully mounted. Failures are logged and ignored.
    fn mounted(&self, _info: &OperationInfo<'_>) -> OperationResult<()> {
        Ok(())
    }

    /// The volume is being unmounted. Failures are logged and ignored.
    fn unmounted(&self, _info: &OperationInfo<'_>) -> OperationResult<()> {
        Ok(())
    }

    /// Return the security descriptor of a file as an opaque buffer. The
    /// library transports the buffer without interpreting it and handles
    /// callers whose buffer is too small.
    fn get_file_security(
        &self,
        _path: &str,
        _security_information: u32,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<Vec<u8>> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Apply an opaque security descriptor buffer to a file.
    fn set_file_security(
        &self,
        _path: &str,
        _security_information: u32,
        _descriptor: &[u8],
        _info: &OperationInfo<'_>,
    ) -> OperationResult<()> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }

    /// Enumerate the alternate data streams of a file. Only delivered when
    /// the volume is mounted with alternate streams enabled.
    fn find_streams(
        &self,
        _path: &str,
        _info: &OperationInfo<'_>,
    ) -> OperationResult<Vec<FindStreamData>> {
        Err(NtStatus::NOT_IMPLEMENTED)
    }
}
