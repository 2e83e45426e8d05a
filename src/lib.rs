//! Dokan user-mode filesystem library.
//!
//! This library lets a regular process provide a mounted volume. A
//! filesystem is an implementation of the [`FileSystemHandler`] trait;
//! mounting it starts a [`Session`] whose worker threads pull operation
//! requests from a kernel driver [`Transport`], invoke the matching handler
//! method and reply with the result. Mounted volumes register in a
//! process-global registry, so they can be enumerated and unmounted by mount
//! point from anywhere in the process.
//!
//! The crate ships a loopback transport that connects a session to an
//! in-process [`DriverStub`] instead of a real driver. It backs the tests
//! and the bundled demo filesystem.
//!
//! To mount a filesystem, fill in a [`MountOptions`], implement the handler
//! methods the filesystem supports and call [`mount()`]:
//!
//! ```no_run
//! use dokan::{mount, FileSystemHandler, MountOptions};
//!
//! struct NullFs;
//! impl FileSystemHandler for NullFs {}
//!
//! let (transport, _driver) = dokan::loopback();
//! let options = MountOptions { mount_point: "M:\\".to_owned(), ..Default::default() };
//! mount(options, NullFs, transport).unwrap();
//! ```

pub mod channel;
pub mod context;
pub mod dispatch;
pub mod matcher;
pub mod mount;
pub mod operations;
pub mod options;
pub mod request;
pub mod session;
pub mod status;

pub use channel::{loopback, DriverStub, LoopbackTransport, Transport, TransportError};
pub use context::{FileContextTable, OpenFileState};
pub use matcher::is_name_in_expression;
pub use mount::{MountHandle, MountPointInfo, MountRegistry, MountState};
pub use operations::{
    map_kernel_to_user_create_file_flags, DiskSpaceInfo, FileInfo, FileSystemHandler,
    FindData, FindFilesIter, FindStreamData, OperationInfo, OperationResult, VolumeInfo,
};
pub use options::{MountFlags, MountOptions, DRIVER_VERSION, VERSION};
pub use request::{OperationKind, Reply, ReplyPayload, Request, RequestFlags};
pub use session::{mount, Session};
pub use status::{MountError, NtStatus};

/// Version of this library.
pub fn lib_version() -> u32 {
    VERSION
}

/// Wire protocol version of the driver serving the current mounts, or zero
/// when nothing is mounted.
pub fn driver_version() -> u32 {
    MountRegistry::global().driver_version()
}

/// Unmount the volume mounted as `drive_letter`. Returns whether such a
/// volume was mounted by this process.
pub fn unmount(drive_letter: char) -> bool {
    MountRegistry::global().unmount_drive(drive_letter)
}

/// Unmount the volume at `mount_point`, announcing the removal first.
pub fn remove_mount_point(mount_point: &str) -> bool {
    remove_mount_point_ex(mount_point, true)
}

/// Unmount the volume at `mount_point`. With `safe` unset the removal is not
/// announced beforehand; applications holding open files lose them.
pub fn remove_mount_point_ex(mount_point: &str, safe: bool) -> bool {
    MountRegistry::global().unmount(mount_point, safe)
}

/// The volumes currently mounted by this process. With `unc_only` set, only
/// network mounts are reported.
pub fn get_mount_point_list(unc_only: bool) -> Vec<MountPointInfo> {
    MountRegistry::global().list(unc_only)
}
