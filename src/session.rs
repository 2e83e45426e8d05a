//! Mount session.
//!
//! A session drives one mounted volume: it validates the options, registers
//! the mount, spawns the dispatcher workers and the deadline watchdog, and
//! tears everything down in order once the driver connection ends. The
//! calling thread stays inside `run` for the lifetime of the mount.

use std::sync::Arc;

use crossbeam::channel;
use log::{info, warn};

use crate::channel::Transport;
use crate::context::FileContextTable;
use crate::dispatch::Dispatcher;
use crate::mount::{MountHandle, MountRegistry};
use crate::operations::{FileSystemHandler, OperationInfo};
use crate::options::MountOptions;
use crate::status::MountError;

/// One mounted volume, from mount to unmount.
pub struct Session<H: FileSystemHandler> {
    dispatcher: Dispatcher<H>,
    handle: Arc<MountHandle>,
    thread_count: usize,
}

impl<H: FileSystemHandler> Session<H> {
    /// Validate the options and register the volume. The volume starts
    /// serving requests once `run` is called.
    pub fn mount<T: Transport + 'static>(
        options: MountOptions,
        handler: H,
        transport: T,
    ) -> Result<Session<H>, MountError> {
        options.validate()?;
        info!("mounting volume at {}", options.mount_point);
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let handle = Arc::new(MountHandle::new(&options, transport.clone()));
        MountRegistry::global().register(handle.clone())?;
        let thread_count = options.thread_count.max(1) as usize;
        let dispatcher = Dispatcher::new(
            Arc::new(handler),
            transport,
            Arc::new(options),
            Arc::new(FileContextTable::new()),
        );
        Ok(Session { dispatcher, handle, thread_count })
    }

    /// Handle of the mounted volume, for inspection and unmounting from
    /// other threads.
    pub fn mount_handle(&self) -> Arc<MountHandle> {
        self.handle.clone()
    }

    /// Serve the volume until the driver connection ends, then tear it down.
    ///
    /// Returns once the volume is fully unmounted, whether the unmount was
    /// requested through the registry, by the filesystem or by the driver
    /// side going away.
    pub fn run(self) {
        let (stop_watchdog, watchdog_stopped) = channel::bounded::<()>(0);
        self.handle.set_mounted();
        let info = OperationInfo::volume(self.dispatcher.options());
        if let Err(status) = self.dispatcher.handler().mounted(&info) {
            warn!("mounted notification failed: {}", status);
        }
        crossbeam::thread::scope(|scope| {
            let workers: Vec<_> =
                (0..self.thread_count).map(|_| scope.spawn(|_| self.dispatcher.run_worker())).collect();
            let watchdog = scope.spawn(|_| self.dispatcher.run_watchdog(watchdog_stopped));
            for worker in workers {
                worker.join().unwrap();
            }
            drop(stop_watchdog);
            watchdog.join().unwrap();
        })
        .unwrap();

        self.handle.device_gone();
        let info = OperationInfo::volume(self.dispatcher.options());
        if let Err(status) = self.dispatcher.handler().unmounted(&info) {
            warn!("unmounted notification failed: {}", status);
        }
        let leaked = self.dispatcher.files().clear();
        if leaked > 0 {
            warn!("{} file handles were still open at unmount", leaked);
        }
    }
}

impl<H: FileSystemHandler> Drop for Session<H> {
    fn drop(&mut self) {
        // Safety net for sessions dropped without running and the normal end
        // of run(); every step is idempotent.
        self.dispatcher.transport().disconnect();
        self.handle.finish_unmount();
        MountRegistry::global().unregister(&self.handle);
    }
}

/// Mount a volume and serve it on the calling thread until it is unmounted.
pub fn mount<H, T>(options: MountOptions, handler: H, transport: T) -> Result<(), MountError>
where
    H: FileSystemHandler,
    T: Transport + 'static,
{
    Session::mount(options, handler, transport).map(Session::run)
}
