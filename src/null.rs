//! Stub watch source
//!
//! Records are never delivered from this source.

use crate::source::{Interrupt, RawRecord, WatchHandle, WatchSource};
use crate::{Config, Error, EventMask, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Stub [`WatchSource`] implementation
///
/// Validates paths and hands out handles, but never reports a change. `read_batch` only returns
/// on timeout or interrupt.
#[derive(Debug)]
pub struct NullSource {
    next: i32,
    watches: HashMap<PathBuf, WatchHandle>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    closed: bool,
}

impl Interrupt for Sender<()> {
    fn interrupt(&self) -> io::Result<()> {
        match self.try_send(()) {
            // a wake-up is already pending
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Disconnected(())) => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }
}

impl NullSource {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::generic("watch source is closed"))
        } else {
            Ok(())
        }
    }
}

impl WatchSource for NullSource {
    fn open(_config: &Config) -> Result<Self> {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Ok(NullSource {
            next: 1,
            watches: HashMap::new(),
            wake_tx,
            wake_rx,
            closed: false,
        })
    }

    fn add_watch(&mut self, path: &Path, _mask: EventMask) -> Result<WatchHandle> {
        self.check_open()?;
        std::fs::symlink_metadata(path)
            .map_err(|e| Error::io_watch(e).add_path(path.to_path_buf()))?;

        if let Some(&handle) = self.watches.get(path) {
            return Ok(handle);
        }
        let handle = WatchHandle(self.next);
        self.next += 1;
        self.watches.insert(path.to_path_buf(), handle);
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()> {
        self.watches.retain(|_, h| *h != handle);
        Ok(())
    }

    fn read_batch(&mut self, timeout: Option<Duration>) -> Result<Vec<RawRecord>> {
        self.check_open()?;
        // the receiver lives in `self`, so the channel can not disconnect
        let _ = match timeout {
            Some(timeout) => self.wake_rx.recv_timeout(timeout).ok(),
            None => self.wake_rx.recv().ok(),
        };
        Ok(Vec::new())
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        Arc::new(self.wake_tx.clone())
    }

    fn close(&mut self) -> Result<()> {
        self.watches.clear();
        self.closed = true;
        Ok(())
    }
}
