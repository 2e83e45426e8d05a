//! Per-volume file context table.
//!
//! The table maps the kernel-assigned handle key of every live open file to
//! its `OpenFileState`. The dispatcher creates an entry when a create
//! operation is processed and removes it when the close notification for the
//! same handle has been delivered; in between, callbacks borrow the state for
//! the duration of a single invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::{error, fmt};

/// Number of lock shards. Operations on different handle keys are spread
/// across shards so they do not serialize on one lock.
const SHARD_COUNT: usize = 16;

/// Error returned when creating a state for a handle key that is already
/// live.
#[derive(Debug, Eq, PartialEq)]
pub struct DuplicateHandle(pub u64);

impl fmt::Display for DuplicateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file handle {:#x} is already open", self.0)
    }
}

impl error::Error for DuplicateHandle {}

/// State of one open file handle.
///
/// Exists from the moment a create operation is dispatched until the close
/// notification for the handle has been processed. All fields are updated
/// and read with acquire/release ordering since read and write callbacks on
/// the same handle may run on different dispatcher threads concurrently.
#[derive(Debug)]
pub struct OpenFileState {
    /// Opaque value owned by the filesystem implementation. The library
    /// stores it verbatim and hands it back on every subsequent operation on
    /// the same handle.
    context: AtomicU64,
    is_directory: AtomicBool,
    delete_on_close: AtomicBool,
    paging_io: AtomicBool,
    synchronous_io: AtomicBool,
    no_cache: AtomicBool,
    write_to_eof: AtomicBool,
    process_id: u32,
}

impl OpenFileState {
    fn new(is_directory: bool, process_id: u32) -> OpenFileState {
        OpenFileState {
            context: AtomicU64::new(0),
            is_directory: AtomicBool::new(is_directory),
            delete_on_close: AtomicBool::new(false),
            paging_io: AtomicBool::new(false),
            synchronous_io: AtomicBool::new(false),
            no_cache: AtomicBool::new(false),
            write_to_eof: AtomicBool::new(false),
            process_id,
        }
    }

    pub fn context(&self) -> u64 {
        self.context.load(Ordering::Acquire)
    }

    pub fn set_context(&self, context: u64) {
        self.context.store(context, Ordering::Release);
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory.load(Ordering::Acquire)
    }

    pub fn set_is_directory(&self, is_directory: bool) {
        self.is_directory.store(is_directory, Ordering::Release);
    }

    pub fn delete_on_close(&self) -> bool {
        self.delete_on_close.load(Ordering::Acquire)
    }

    pub fn set_delete_on_close(&self, delete_on_close: bool) {
        self.delete_on_close.store(delete_on_close, Ordering::Release);
    }

    pub fn paging_io(&self) -> bool {
        self.paging_io.load(Ordering::Acquire)
    }

    pub fn synchronous_io(&self) -> bool {
        self.synchronous_io.load(Ordering::Acquire)
    }

    pub fn no_cache(&self) -> bool {
        self.no_cache.load(Ordering::Acquire)
    }

    pub fn write_to_end_of_file(&self) -> bool {
        self.write_to_eof.load(Ordering::Acquire)
    }

    /// Record the I/O flags carried by the request currently operating on
    /// this handle.
    pub(crate) fn record_io_flags(&self, paging: bool, synchronous: bool, no_cache: bool, write_to_eof: bool) {
        self.paging_io.store(paging, Ordering::Release);
        self.synchronous_io.store(synchronous, Ordering::Release);
        self.no_cache.store(no_cache, Ordering::Release);
        self.write_to_eof.store(write_to_eof, Ordering::Release);
    }

    /// Id of the process that opened the handle.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }
}

/// Table of all live `OpenFileState`s of one mounted volume.
#[derive(Debug)]
pub struct FileContextTable {
    shards: Vec<Mutex<HashMap<u64, Arc<OpenFileState>>>>,
}

impl FileContextTable {
    pub fn new() -> FileContextTable {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect();
        FileContextTable { shards }
    }

    fn shard(&self, key: u64) -> &Mutex<HashMap<u64, Arc<OpenFileState>>> {
        &self.shards[(key as usize) % SHARD_COUNT]
    }

    /// Create the state for a newly opened handle.
    pub fn create(
        &self,
        key: u64,
        is_directory: bool,
        process_id: u32,
    ) -> Result<Arc<OpenFileState>, DuplicateHandle> {
        let mut shard = self.shard(key).lock().unwrap();
        if shard.contains_key(&key) {
            return Err(DuplicateHandle(key));
        }
        let state = Arc::new(OpenFileState::new(is_directory, process_id));
        shard.insert(key, state.clone());
        Ok(state)
    }

    /// Look up the state of a live handle. Never creates an entry.
    pub fn get(&self, key: u64) -> Option<Arc<OpenFileState>> {
        self.shard(key).lock().unwrap().get(&key).cloned()
    }

    /// Remove the state of a handle. Removing an absent key is a no-op so
    /// that duplicate close notifications from the transport stay harmless.
    pub fn remove(&self, key: u64) -> Option<Arc<OpenFileState>> {
        self.shard(key).lock().unwrap().remove(&key)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all remaining states, returning how many were still live. Used
    /// when a volume is torn down with handles the kernel never closed.
    pub(crate) fn clear(&self) -> usize {
        let mut flushed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            flushed += shard.len();
            shard.clear();
        }
        flushed
    }
}

impl Default for FileContextTable {
    fn default() -> FileContextTable {
        FileContextTable::new()
    }
}
