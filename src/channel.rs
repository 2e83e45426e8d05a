//! Transport between the kernel driver and the dispatcher.
//!
//! A `Transport` is the only component that talks to the driver side of a
//! mounted volume. It hands decoded requests to the dispatcher, carries
//! replies and timeout notifications back, and reports when the driver is
//! gone. The loopback transport connects a dispatcher to an in-process
//! `DriverStub` over channels; it backs the tests and demos and serves as
//! the reference for transports speaking to a real driver.

use std::sync::Mutex;
use std::{error, fmt};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use crossbeam::select;

use crate::options::DRIVER_VERSION;
use crate::request::{Reply, Request};

/// Error emitted by a transport whose driver side is gone.
#[derive(Debug, Eq, PartialEq)]
pub enum TransportError {
    /// The driver side hung up; nothing can be sent anymore.
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Disconnected => write!(f, "the driver connection is closed"),
        }
    }
}

impl error::Error for TransportError {}

/// Connection to the kernel driver of one mounted volume.
///
/// `receive` is called concurrently from every dispatcher thread; a transport
/// must hand each request to exactly one caller. All methods must stay usable
/// from multiple threads at once.
pub trait Transport: Send + Sync {
    /// Block until the next request arrives. Returns `Ok(None)` when the
    /// volume is shutting down and no further request will come; every
    /// dispatcher thread observes the shutdown this way.
    fn receive(&self) -> Result<Option<Request>, TransportError>;

    /// Send the reply for a previously received request.
    fn send(&self, reply: Reply) -> Result<(), TransportError>;

    /// Tell the driver to stop waiting for the request with the given
    /// correlation id.
    fn notify_timeout(&self, unique: u64) -> Result<(), TransportError>;

    /// Close the connection. Pending and future `receive` calls return
    /// `Ok(None)`. Must be idempotent.
    fn disconnect(&self);

    /// Wire protocol version of the connected driver.
    fn driver_version(&self) -> u32;
}

/// In-process transport connected to a [`DriverStub`].
pub struct LoopbackTransport {
    requests: Receiver<Request>,
    replies: Sender<Reply>,
    timeouts: Sender<u64>,
    shutdown: Receiver<()>,
    // Dropping the sender wakes every receive() at once.
    shutdown_handle: Mutex<Option<Sender<()>>>,
}

/// The driver side of a loopback pair. Tests and demos submit requests
/// through it and observe the replies and timeout notifications the
/// dispatcher produces.
pub struct DriverStub {
    requests: Mutex<Option<Sender<Request>>>,
    replies: Receiver<Reply>,
    timeouts: Receiver<u64>,
}

/// Create a connected transport/driver pair.
pub fn loopback() -> (LoopbackTransport, DriverStub) {
    let (request_tx, request_rx) = channel::unbounded();
    let (reply_tx, reply_rx) = channel::unbounded();
    let (timeout_tx, timeout_rx) = channel::unbounded();
    let (shutdown_tx, shutdown_rx) = channel::bounded(0);
    let transport = LoopbackTransport {
        requests: request_rx,
        replies: reply_tx,
        timeouts: timeout_tx,
        shutdown: shutdown_rx,
        shutdown_handle: Mutex::new(Some(shutdown_tx)),
    };
    let stub = DriverStub {
        requests: Mutex::new(Some(request_tx)),
        replies: reply_rx,
        timeouts: timeout_rx,
    };
    (transport, stub)
}

impl Transport for LoopbackTransport {
    fn receive(&self) -> Result<Option<Request>, TransportError> {
        // Shutdown wins over queued requests; select alone would pick
        // uniformly among ready arms and keep delivering after disconnect.
        if let Err(TryRecvError::Disconnected) = self.shutdown.try_recv() {
            return Ok(None);
        }
        select! {
            recv(self.requests) -> request => Ok(request.ok()),
            recv(self.shutdown) -> _ => Ok(None),
        }
    }

    fn send(&self, reply: Reply) -> Result<(), TransportError> {
        self.replies.send(reply).map_err(|_| TransportError::Disconnected)
    }

    fn notify_timeout(&self, unique: u64) -> Result<(), TransportError> {
        self.timeouts.send(unique).map_err(|_| TransportError::Disconnected)
    }

    fn disconnect(&self) {
        self.shutdown_handle.lock().unwrap().take();
    }

    fn driver_version(&self) -> u32 {
        DRIVER_VERSION
    }
}

impl DriverStub {
    /// Submit a request to the dispatcher. Fails once the connection has
    /// been shut down from either side.
    pub fn submit(&self, request: Request) -> Result<(), TransportError> {
        let requests = self.requests.lock().unwrap();
        match requests.as_ref() {
            Some(sender) => sender.send(request).map_err(|_| TransportError::Disconnected),
            None => Err(TransportError::Disconnected),
        }
    }

    /// Wait for the next reply.
    pub fn recv_reply(&self, timeout: std::time::Duration) -> Option<Reply> {
        self.replies.recv_timeout(timeout).ok()
    }

    /// Wait for the next timeout notification, returning the correlation id
    /// of the request the driver should stop waiting for.
    pub fn recv_timeout_notification(&self, timeout: std::time::Duration) -> Option<u64> {
        self.timeouts.recv_timeout(timeout).ok()
    }

    /// Stop submitting requests. The dispatcher drains what was already
    /// submitted and then observes the shutdown.
    pub fn shutdown(&self) {
        self.requests.lock().unwrap().take();
    }
}
