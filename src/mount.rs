//! Mount lifecycle and the per-process mount registry.
//!
//! Every mounted volume is represented by a `MountHandle` that tracks its
//! lifecycle state and owns the connection to the driver. Handles are
//! registered in a process-global `MountRegistry` so that volumes can be
//! enumerated and unmounted by mount point from anywhere in the process.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use log::info;

use crate::channel::Transport;
use crate::options::{MountOptions, MAX_MOUNT_INSTANCES};
use crate::status::MountError;

/// Lifecycle state of a mounted volume.
///
/// States only ever advance; a handle that reached `Unmounted` stays there.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum MountState {
    /// The mount is being set up; no requests are served yet.
    Initializing,
    /// The volume is live and serving requests.
    Mounted,
    /// Teardown has begun; in-flight requests drain, new ones are refused by
    /// the closed transport.
    Unmounting,
    /// Teardown finished. Terminal.
    Unmounted,
}

/// A snapshot of one registered mount, as reported by mount point
/// enumeration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountPointInfo {
    pub mount_point: String,
    pub unc_name: Option<String>,
    pub device_name: String,
}

/// Handle of one mounted volume.
pub struct MountHandle {
    mount_point: String,
    unc_name: Option<String>,
    device_name: String,
    transport: Arc<dyn Transport>,
    state: Mutex<MountState>,
    state_changed: Condvar,
}

impl fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountHandle")
            .field("mount_point", &self.mount_point)
            .field("device_name", &self.device_name)
            .field("state", &self.state())
            .finish()
    }
}

static DEVICE_NUMBER: AtomicUsize = AtomicUsize::new(0);

impl MountHandle {
    pub(crate) fn new(options: &MountOptions, transport: Arc<dyn Transport>) -> MountHandle {
        let number = DEVICE_NUMBER.fetch_add(1, Ordering::Relaxed);
        MountHandle {
            mount_point: options.mount_point.clone(),
            unc_name: options.unc_name.clone(),
            device_name: format!("\\Device\\Dokan{}", number),
            transport,
            state: Mutex::new(MountState::Initializing),
            state_changed: Condvar::new(),
        }
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn unc_name(&self) -> Option<&str> {
        self.unc_name.as_deref()
    }

    /// Kernel device name backing the volume.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn state(&self) -> MountState {
        *self.state.lock().unwrap()
    }

    pub fn is_mounted(&self) -> bool {
        self.state() == MountState::Mounted
    }

    fn advance(&self, to: MountState) -> bool {
        let mut state = self.state.lock().unwrap();
        if to > *state {
            *state = to;
            self.state_changed.notify_all();
            true
        } else {
            false
        }
    }

    pub(crate) fn set_mounted(&self) {
        if self.advance(MountState::Mounted) {
            info!("mounted {} as {}", self.mount_point, self.device_name);
        }
    }

    /// Start tearing the volume down. With `safe` set, the rest of the
    /// system is told about the removal before the driver connection closes,
    /// so applications holding open files get a chance to let go.
    pub(crate) fn begin_unmount(&self, safe: bool) {
        if !self.advance(MountState::Unmounting) {
            return;
        }
        if safe {
            info!("announcing removal of volume {}", self.mount_point);
        } else {
            info!("force unmounting volume {}", self.mount_point);
        }
        self.transport.disconnect();
    }

    /// The driver stopped delivering requests on its own, without an
    /// unmount request from this process.
    pub(crate) fn device_gone(&self) {
        if self.advance(MountState::Unmounting) {
            info!("driver connection for {} closed", self.mount_point);
        }
    }

    pub(crate) fn finish_unmount(&self) {
        if self.advance(MountState::Unmounted) {
            info!("unmounted {}", self.mount_point);
        }
    }

    /// Block until the volume reaches `Unmounted`.
    pub fn wait_unmounted(&self) {
        let mut state = self.state.lock().unwrap();
        while *state != MountState::Unmounted {
            state = self.state_changed.wait(state).unwrap();
        }
    }

    pub(crate) fn driver_version(&self) -> u32 {
        self.transport.driver_version()
    }

    fn matches_mount_point(&self, normalized: &str) -> bool {
        normalize_mount_point(&self.mount_point) == normalized
    }
}

/// Mount points compare without a trailing backslash and without regard to
/// case.
fn normalize_mount_point(mount_point: &str) -> String {
    mount_point.trim_end_matches('\\').to_uppercase()
}

/// Registry of the volumes mounted by this process.
#[derive(Debug, Default)]
pub struct MountRegistry {
    mounts: Mutex<Vec<Arc<MountHandle>>>,
}

impl MountRegistry {
    pub fn new() -> MountRegistry {
        MountRegistry::default()
    }

    /// The process-global registry.
    pub fn global() -> &'static MountRegistry {
        static GLOBAL: OnceLock<MountRegistry> = OnceLock::new();
        GLOBAL.get_or_init(MountRegistry::new)
    }

    /// Register a new mount. Fails when the mount point is already serving a
    /// volume or the per-process instance limit is reached.
    pub(crate) fn register(&self, handle: Arc<MountHandle>) -> Result<(), MountError> {
        let mut mounts = self.mounts.lock().unwrap();
        let normalized = normalize_mount_point(handle.mount_point());
        if mounts.iter().any(|mount| mount.matches_mount_point(&normalized)) {
            return Err(MountError::Mount);
        }
        if mounts.len() >= MAX_MOUNT_INSTANCES {
            return Err(MountError::Start);
        }
        mounts.push(handle);
        Ok(())
    }

    pub(crate) fn unregister(&self, handle: &Arc<MountHandle>) {
        self.mounts.lock().unwrap().retain(|mount| !Arc::ptr_eq(mount, handle));
    }

    /// Snapshot of the registered mounts. With `unc_only` set, mounts
    /// without a UNC name are left out.
    pub fn list(&self, unc_only: bool) -> Vec<MountPointInfo> {
        self.mounts
            .lock()
            .unwrap()
            .iter()
            .filter(|mount| !unc_only || mount.unc_name.is_some())
            .map(|mount| MountPointInfo {
                mount_point: mount.mount_point.clone(),
                unc_name: mount.unc_name.clone(),
                device_name: mount.device_name.clone(),
            })
            .collect()
    }

    fn find(&self, mount_point: &str) -> Option<Arc<MountHandle>> {
        let normalized = normalize_mount_point(mount_point);
        self.mounts
            .lock()
            .unwrap()
            .iter()
            .find(|mount| mount.matches_mount_point(&normalized))
            .cloned()
    }

    /// Unmount the volume at `mount_point`. Returns whether a volume was
    /// found there.
    pub fn unmount(&self, mount_point: &str, safe: bool) -> bool {
        match self.find(mount_point) {
            Some(handle) => {
                handle.begin_unmount(safe);
                true
            }
            None => false,
        }
    }

    /// Unmount the volume mounted as the given drive letter.
    pub fn unmount_drive(&self, drive_letter: char) -> bool {
        self.unmount(&format!("{}:\\", drive_letter), true)
    }

    /// Wire protocol version of the driver serving the registered mounts, or
    /// zero when nothing is mounted.
    pub fn driver_version(&self) -> u32 {
        self.mounts.lock().unwrap().first().map_or(0, |mount| mount.driver_version())
    }
}
