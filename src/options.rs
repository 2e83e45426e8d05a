//! Mount options.
//!
//! Options describing the behaviour of a mounted volume. Options are
//! immutable once the mount starts and are validated exactly once, before any
//! worker thread is spawned.

use std::time::Duration;

use crate::status::MountError;

/// The current library version (ver 1.0.0), as requested in
/// `MountOptions::version`.
pub const VERSION: u32 = 100;
/// The minimum library version a mount may request.
pub const MINIMUM_COMPATIBLE_VERSION: u32 = 100;
/// The wire protocol version implemented by a compatible kernel driver.
pub const DRIVER_VERSION: u32 = 400;
/// Maximum number of volumes mounted by one process.
pub const MAX_MOUNT_INSTANCES: usize = 32;

/// Feature flags for a mount.
///
/// Each flag used to be a bit in an options bitmask; unknown bits are ignored
/// by `MountFlags::from_bits` so that masks produced for future versions
/// still mount.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MountFlags {
    /// Emit per-request debug output through the logging facade.
    pub debug: bool,
    /// Mirror debug output to stderr.
    pub stderr: bool,
    /// Enable alternate stream enumeration (`find_streams`).
    pub alt_stream: bool,
    /// Mount the volume write-protected.
    pub write_protect: bool,
    /// Mount as a network volume.
    pub network_drive: bool,
    /// Mount as a removable volume.
    pub removable_drive: bool,
    /// Register the volume with the system mount manager.
    pub mount_manager: bool,
    /// Make the volume visible to the current session only.
    pub current_session: bool,
    /// Deliver lock/unlock operations to the filesystem instead of letting
    /// the driver handle byte-range locking.
    pub user_mode_file_locking: bool,
}

pub const FLAG_DEBUG: u32 = 1;
pub const FLAG_STDERR: u32 = 2;
pub const FLAG_ALT_STREAM: u32 = 4;
pub const FLAG_WRITE_PROTECT: u32 = 8;
pub const FLAG_NETWORK: u32 = 16;
pub const FLAG_REMOVABLE: u32 = 32;
pub const FLAG_MOUNT_MANAGER: u32 = 64;
pub const FLAG_CURRENT_SESSION: u32 = 128;
pub const FLAG_FILELOCK_USER_MODE: u32 = 256;

impl MountFlags {
    /// Decode a legacy options bitmask. Unknown bits are ignored, never
    /// rejected.
    pub fn from_bits(bits: u32) -> MountFlags {
        MountFlags {
            debug: bits & FLAG_DEBUG != 0,
            stderr: bits & FLAG_STDERR != 0,
            alt_stream: bits & FLAG_ALT_STREAM != 0,
            write_protect: bits & FLAG_WRITE_PROTECT != 0,
            network_drive: bits & FLAG_NETWORK != 0,
            removable_drive: bits & FLAG_REMOVABLE != 0,
            mount_manager: bits & FLAG_MOUNT_MANAGER != 0,
            current_session: bits & FLAG_CURRENT_SESSION != 0,
            user_mode_file_locking: bits & FLAG_FILELOCK_USER_MODE != 0,
        }
    }
}

/// Options describing a mount.
#[derive(Clone, Debug)]
pub struct MountOptions {
    /// Version of the library features requested (version "123" requests
    /// version 1.2.3 behaviour).
    pub version: u32,
    /// Number of dispatcher threads serving the mount; a value of zero mounts
    /// with a single thread.
    pub thread_count: u16,
    /// Feature flags.
    pub flags: MountFlags,
    /// Opaque value the filesystem can reach from every operation.
    pub global_context: u64,
    /// Mount point: a drive letter (`"M:\"`) or a path on an existing volume
    /// (`"C:\mount\backup"`).
    pub mount_point: String,
    /// UNC name used when mounting a network volume.
    pub unc_name: Option<String>,
    /// Maximum time a request may run before the driver side is told to stop
    /// waiting for it.
    pub timeout: Duration,
    /// Allocation unit size of the volume.
    pub allocation_unit_size: u32,
    /// Sector size of the volume.
    pub sector_size: u32,
}

impl Default for MountOptions {
    fn default() -> MountOptions {
        MountOptions {
            version: VERSION,
            thread_count: 0,
            flags: MountFlags::default(),
            global_context: 0,
            mount_point: String::new(),
            unc_name: None,
            timeout: Duration::from_millis(15000),
            allocation_unit_size: 512,
            sector_size: 512,
        }
    }
}

impl MountOptions {
    /// Validate the options once at mount time.
    ///
    /// Checks the version compatibility window, the mount point and the
    /// mutually exclusive flag combinations.
    pub fn validate(&self) -> Result<(), MountError> {
        if self.version < MINIMUM_COMPATIBLE_VERSION || self.version > VERSION {
            return Err(MountError::Version);
        }
        if self.mount_point.is_empty() {
            return Err(MountError::MountPoint);
        }
        if let Some(letter) = self.drive_letter() {
            if !letter.is_ascii_alphabetic() {
                return Err(MountError::BadDriveLetter);
            }
        }
        if self.flags.mount_manager && self.drive_letter().is_none() {
            // The mount manager only assigns drive letters.
            return Err(MountError::MountPoint);
        }
        if self.flags.mount_manager && self.flags.current_session {
            // Mount manager volumes are global by definition.
            return Err(MountError::Error);
        }
        if self.flags.network_drive && self.unc_name.is_none() {
            return Err(MountError::MountPoint);
        }
        if self.unc_name.is_some() && !self.flags.network_drive {
            return Err(MountError::Error);
        }
        Ok(())
    }

    /// Returns the drive letter when the mount point is in drive letter form
    /// (`"M"`, `"M:"` or `"M:\"`).
    pub fn drive_letter(&self) -> Option<char> {
        let mut chars = self.mount_point.chars();
        let letter = chars.next()?;
        match chars.as_str() {
            "" | ":" | ":\\" => Some(letter),
            _ => None,
        }
    }
}
