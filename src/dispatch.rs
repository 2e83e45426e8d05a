//! Request dispatch.
//!
//! The dispatcher is the heart of a mounted volume: worker threads pull
//! requests from the transport, resolve the per-handle state, invoke the
//! filesystem operation and send the reply back. A watchdog thread walks the
//! in-flight requests and tells the driver to stop waiting for the ones that
//! blew through their deadline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{debug, warn};

use crate::channel::Transport;
use crate::context::{FileContextTable, OpenFileState};
use crate::matcher::is_name_in_expression;
use crate::operations::{
    FileSystemHandler, FindData, OperationInfo, FILE_DELETE_ON_CLOSE, FILE_DIRECTORY_FILE,
    FILE_READ_ONLY_VOLUME,
};
use crate::options::MountOptions;
use crate::request::{OperationKind, Reply, ReplyPayload, Request};
use crate::status::NtStatus;

/// Granularity of the deadline watchdog.
const WATCHDOG_TICK: Duration = Duration::from_millis(50);

fn status_of(result: Result<(), NtStatus>) -> NtStatus {
    match result {
        Ok(()) => NtStatus::SUCCESS,
        Err(status) => status,
    }
}

/// Deadline bookkeeping for one request currently being processed.
#[derive(Debug)]
pub struct InFlightRequest {
    unique: u64,
    deadline: Mutex<Instant>,
    completed: AtomicBool,
    notified: AtomicBool,
}

impl InFlightRequest {
    fn new(unique: u64, timeout: Duration) -> InFlightRequest {
        InFlightRequest {
            unique,
            deadline: Mutex::new(Instant::now() + timeout),
            completed: AtomicBool::new(false),
            notified: AtomicBool::new(false),
        }
    }

    /// Push the deadline to `extension` from now. Returns `false` once the
    /// request has completed. Re-arms the timeout notification, so a request
    /// extended after the driver was already told to stop waiting is
    /// reported again when the new deadline passes.
    pub(crate) fn extend(&self, extension: Duration) -> bool {
        if self.completed.load(Ordering::Acquire) {
            return false;
        }
        *self.deadline.lock().unwrap() = Instant::now() + extension;
        self.notified.store(false, Ordering::Release);
        true
    }

    fn complete(&self) {
        self.completed.store(true, Ordering::Release);
    }

    /// Marks the request as reported if its deadline has passed. Reports a
    /// given deadline at most once.
    fn expires(&self, now: Instant) -> bool {
        if self.completed.load(Ordering::Acquire) || self.notified.load(Ordering::Acquire) {
            return false;
        }
        if now < *self.deadline.lock().unwrap() {
            return false;
        }
        self.notified.store(true, Ordering::Release);
        true
    }
}

/// All requests currently being processed by the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct InFlightTable {
    entries: Mutex<HashMap<u64, Arc<InFlightRequest>>>,
}

impl InFlightTable {
    fn begin(&self, unique: u64, timeout: Duration) -> Arc<InFlightRequest> {
        let entry = Arc::new(InFlightRequest::new(unique, timeout));
        self.entries.lock().unwrap().insert(unique, entry.clone());
        entry
    }

    fn finish(&self, entry: &InFlightRequest) {
        entry.complete();
        self.entries.lock().unwrap().remove(&entry.unique);
    }

    /// Correlation ids of the requests whose deadline passed since the last
    /// sweep.
    fn expired(&self, now: Instant) -> Vec<u64> {
        let entries = self.entries.lock().unwrap();
        entries.values().filter(|entry| entry.expires(now)).map(|entry| entry.unique).collect()
    }
}

/// Per-volume dispatcher shared by all worker threads of a mount.
pub(crate) struct Dispatcher<H: FileSystemHandler> {
    handler: Arc<H>,
    transport: Arc<dyn Transport>,
    options: Arc<MountOptions>,
    files: Arc<FileContextTable>,
    in_flight: InFlightTable,
}

impl<H: FileSystemHandler> Dispatcher<H> {
    pub(crate) fn new(
        handler: Arc<H>,
        transport: Arc<dyn Transport>,
        options: Arc<MountOptions>,
        files: Arc<FileContextTable>,
    ) -> Dispatcher<H> {
        Dispatcher { handler, transport, options, files, in_flight: InFlightTable::default() }
    }

    /// Worker loop. Runs until the transport reports shutdown.
    pub(crate) fn run_worker(&self) {
        loop {
            match self.transport.receive() {
                Ok(Some(request)) => self.dispatch(request),
                Ok(None) => break,
                Err(err) => {
                    warn!("transport receive failed: {}", err);
                    break;
                }
            }
        }
    }

    /// Watchdog loop. Sweeps the in-flight table every tick and notifies the
    /// driver of requests that outlived their deadline. Ends when `stop` is
    /// signalled or closed.
    pub(crate) fn run_watchdog(&self, stop: Receiver<()>) {
        loop {
            match stop.recv_timeout(WATCHDOG_TICK) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => (),
            }
            for unique in self.in_flight.expired(Instant::now()) {
                warn!("request {} exceeded its deadline, notifying the driver", unique);
                if self.transport.notify_timeout(unique).is_err() {
                    return;
                }
            }
        }
    }

    fn dispatch(&self, request: Request) {
        debug!("{}({}): path {:?}, handle {:#x}", request.kind.name(), request.unique, request.path, request.handle);
        let in_flight = self.in_flight.begin(request.unique, self.options.timeout);
        let reply = self.execute(&request, &in_flight);
        self.in_flight.finish(&in_flight);
        debug!("{}({}): reply {}", request.kind.name(), request.unique, reply.status);
        if let Err(err) = self.transport.send(reply) {
            warn!("dropping reply for request {}: {}", request.unique, err);
        }
    }

    fn execute(&self, request: &Request, in_flight: &InFlightRequest) -> Reply {
        // Create allocates the handle state; everything else looks it up.
        let file: Option<Arc<OpenFileState>> = match &request.kind {
            OperationKind::Create { create_options, .. } => {
                let is_directory = create_options & FILE_DIRECTORY_FILE != 0;
                match self.files.create(request.handle, is_directory, request.process_id) {
                    Ok(state) => {
                        state.set_delete_on_close(create_options & FILE_DELETE_ON_CLOSE != 0);
                        Some(state)
                    }
                    Err(err) => {
                        warn!("Create({}): {}", request.unique, err);
                        return Reply::status(request.unique, NtStatus::INVALID_HANDLE);
                    }
                }
            }
            kind if kind.is_handleless() => None,
            _ => {
                let state = self.files.get(request.handle);
                if state.is_none() {
                    // Teardown notifications for a handle that never
                    // completed create are acknowledged without calling into
                    // the filesystem; everything else is refused.
                    if matches!(request.kind, OperationKind::Cleanup | OperationKind::Close) {
                        return Reply::status(request.unique, NtStatus::SUCCESS);
                    }
                    warn!(
                        "{}({}): no open file with handle {:#x}",
                        request.kind.name(),
                        request.unique,
                        request.handle
                    );
                    return Reply::status(request.unique, NtStatus::INVALID_HANDLE);
                }
                state
            }
        };
        if let Some(state) = &file {
            state.record_io_flags(
                request.flags.paging_io,
                request.flags.synchronous_io,
                request.flags.no_cache,
                request.flags.write_to_end_of_file,
            );
        }
        let info = OperationInfo {
            file: file.as_deref(),
            in_flight: Some(in_flight),
            process_id: request.process_id,
            options: &self.options,
        };

        let unique = request.unique;
        let path = request.path.as_str();
        match &request.kind {
            OperationKind::Create {
                desired_access,
                file_attributes,
                share_access,
                create_disposition,
                create_options,
            } => {
                let result = self.handler.create_file(
                    path,
                    *desired_access,
                    *file_attributes,
                    *share_access,
                    *create_disposition,
                    *create_options,
                    &info,
                );
                if result.is_err() {
                    self.files.remove(request.handle);
                }
                Reply::status(unique, status_of(result))
            }
            OperationKind::Cleanup => {
                self.handler.cleanup(path, &info);
                Reply::status(unique, NtStatus::SUCCESS)
            }
            OperationKind::Close => {
                self.handler.close_file(path, &info);
                self.files.remove(request.handle);
                Reply::status(unique, NtStatus::SUCCESS)
            }
            OperationKind::Read { offset, length } => {
                match self.handler.read_file(path, *offset, *length, &info) {
                    Ok(mut data) => {
                        if data.len() > *length as usize {
                            warn!(
                                "Read({}): got {} bytes for a {} byte request, truncating",
                                unique,
                                data.len(),
                                length
                            );
                            data.truncate(*length as usize);
                        }
                        Reply::new(unique, NtStatus::SUCCESS, ReplyPayload::Data(data))
                    }
                    Err(status) => Reply::status(unique, status),
                }
            }
            OperationKind::Write { offset, data } => {
                match self.handler.write_file(path, *offset, data, &info) {
                    Ok(written) => {
                        Reply::new(unique, NtStatus::SUCCESS, ReplyPayload::Written(written))
                    }
                    Err(status) => Reply::status(unique, status),
                }
            }
            OperationKind::Flush => {
                Reply::status(unique, status_of(self.handler.flush_file_buffers(path, &info)))
            }
            OperationKind::GetFileInformation => {
                match self.handler.get_file_information(path, &info) {
                    Ok(file_info) => {
                        Reply::new(unique, NtStatus::SUCCESS, ReplyPayload::FileInfo(file_info))
                    }
                    Err(status) => Reply::status(unique, status),
                }
            }
            OperationKind::FindFiles { pattern } => match self.find(path, pattern.as_deref(), &info)
            {
                Ok(entries) => {
                    Reply::new(unique, NtStatus::SUCCESS, ReplyPayload::Directory(entries))
                }
                Err(status) => Reply::status(unique, status),
            },
            OperationKind::SetFileAttributes { file_attributes } => Reply::status(
                unique,
                status_of(self.handler.set_file_attributes(path, *file_attributes, &info)),
            ),
            OperationKind::SetFileTime { creation_time, last_access_time, last_write_time } => {
                Reply::status(
                    unique,
                    status_of(self.handler.set_file_time(
                        path,
                        *creation_time,
                        *last_access_time,
                        *last_write_time,
                        &info,
                    )),
                )
            }
            OperationKind::DeleteFile => {
                let result = self.handler.delete_file(path, &info);
                // Success records the intent; the removal itself happens in
                // cleanup, and a later failed check cancels the intent.
                info.set_delete_on_close(result.is_ok());
                Reply::status(unique, status_of(result))
            }
            OperationKind::DeleteDirectory => {
                let result = self.handler.delete_directory(path, &info);
                info.set_delete_on_close(result.is_ok());
                Reply::status(unique, status_of(result))
            }
            OperationKind::MoveFile { new_path, replace_if_existing } => {
                let result = self.handler.move_file(path, new_path, *replace_if_existing, &info);
                if result.is_ok() {
                    info.set_delete_on_close(false);
                }
                Reply::status(unique, status_of(result))
            }
            OperationKind::SetEndOfFile { offset } => {
                Reply::status(unique, status_of(self.handler.set_end_of_file(path, *offset, &info)))
            }
            OperationKind::SetAllocationSize { length } => Reply::status(
                unique,
                status_of(self.handler.set_allocation_size(path, *length, &info)),
            ),
            OperationKind::LockFile { offset, length } => {
                if !self.options.flags.user_mode_file_locking {
                    return Reply::status(unique, NtStatus::NOT_IMPLEMENTED);
                }
                Reply::status(
                    unique,
                    status_of(self.handler.lock_file(path, *offset, *length, &info)),
                )
            }
            OperationKind::UnlockFile { offset, length } => {
                if !self.options.flags.user_mode_file_locking {
                    return Reply::status(unique, NtStatus::NOT_IMPLEMENTED);
                }
                Reply::status(
                    unique,
                    status_of(self.handler.unlock_file(path, *offset, *length, &info)),
                )
            }
            OperationKind::GetDiskFreeSpace => match self.handler.get_disk_free_space(&info) {
                Ok(space) => Reply::new(unique, NtStatus::SUCCESS, ReplyPayload::DiskSpace(space)),
                Err(status) => Reply::status(unique, status),
            },
            OperationKind::GetVolumeInformation => {
                match self.handler.get_volume_information(&info) {
                    Ok(mut volume) => {
                        if self.options.flags.write_protect {
                            volume.filesystem_flags |= FILE_READ_ONLY_VOLUME;
                        }
                        Reply::new(unique, NtStatus::SUCCESS, ReplyPayload::VolumeInfo(volume))
                    }
                    Err(status) => Reply::status(unique, status),
                }
            }
            OperationKind::GetFileSecurity { security_information, buffer_length } => {
                match self.handler.get_file_security(path, *security_information, &info) {
                    Ok(descriptor) => {
                        let length_needed = descriptor.len() as u32;
                        if length_needed > *buffer_length {
                            Reply::new(
                                unique,
                                NtStatus::BUFFER_OVERFLOW,
                                ReplyPayload::Security { descriptor: Vec::new(), length_needed },
                            )
                        } else {
                            Reply::new(
                                unique,
                                NtStatus::SUCCESS,
                                ReplyPayload::Security { descriptor, length_needed },
                            )
                        }
                    }
                    Err(status) => Reply::status(unique, status),
                }
            }
            OperationKind::SetFileSecurity { security_information, descriptor } => Reply::status(
                unique,
                status_of(self.handler.set_file_security(
                    path,
                    *security_information,
                    descriptor,
                    &info,
                )),
            ),
            OperationKind::FindStreams => {
                if !self.options.flags.alt_stream {
                    return Reply::status(unique, NtStatus::NOT_IMPLEMENTED);
                }
                match self.handler.find_streams(path, &info) {
                    Ok(streams) => {
                        Reply::new(unique, NtStatus::SUCCESS, ReplyPayload::Streams(streams))
                    }
                    Err(status) => Reply::status(unique, status),
                }
            }
        }
    }

    /// Directory enumeration with the pattern fallback.
    ///
    /// A patterned enumeration goes to `find_files_with_pattern` first; only
    /// an explicit `NOT_IMPLEMENTED` falls back to the plain listing filtered
    /// here, so a filesystem reporting a genuine error never has the error
    /// masked by the fallback.
    fn find(
        &self,
        path: &str,
        pattern: Option<&str>,
        info: &OperationInfo<'_>,
    ) -> Result<Vec<FindData>, NtStatus> {
        match pattern {
            Some(pattern) => match self.handler.find_files_with_pattern(path, pattern, info) {
                Ok(entries) => Ok(entries.collect()),
                Err(NtStatus::NOT_IMPLEMENTED) => {
                    let entries = self.handler.find_files(path, info)?;
                    Ok(entries
                        .filter(|entry| is_name_in_expression(pattern, &entry.file_name, true))
                        .collect())
                }
                Err(status) => Err(status),
            },
            None => match self.handler.find_files(path, info) {
                Ok(entries) => Ok(entries.collect()),
                Err(NtStatus::NOT_IMPLEMENTED) => {
                    let entries = self.handler.find_files_with_pattern(path, "*", info)?;
                    Ok(entries.collect())
                }
                Err(status) => Err(status),
            },
        }
    }

    pub(crate) fn files(&self) -> &FileContextTable {
        &self.files
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        &*self.transport
    }

    pub(crate) fn options(&self) -> &MountOptions {
        &self.options
    }

    pub(crate) fn handler(&self) -> &H {
        &self.handler
    }
}
