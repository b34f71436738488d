#![allow(dead_code)] // not all helpers are used for all targets

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};

use crate::source::{Interrupt, RawRecord, WatchHandle, WatchSource};
use crate::{Config, Error, EventMask, Result};

pub struct TestDir {
    _dir: tempfile::TempDir,

    path: PathBuf,
}

impl TestDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        self.path()
    }
}

/// Creates a [`TestDir`]
pub fn testdir() -> TestDir {
    let dir = tempfile::tempdir().expect("Unable to create tempdir");
    let path = fs::canonicalize(dir.path()).unwrap_or_else(|e| {
        panic!(
            "unable to canonicalize tempdir path {:?}: {e:?}",
            dir.path()
        )
    });
    TestDir { _dir: dir, path }
}

#[derive(Debug, Default)]
struct ScriptState {
    batches: VecDeque<Vec<RawRecord>>,
    added: Vec<(PathBuf, EventMask)>,
    removed: Vec<WatchHandle>,
    /// by device and inode, like the kernel
    handles: HashMap<(u64, u64), WatchHandle>,
    refused: HashSet<PathBuf>,
    next: i32,
    reads: usize,
    closed: bool,
}

/// Shared view on a [`ScriptedSource`], kept by the test after the source moved into a tree or
/// a controller.
#[derive(Clone, Debug, Default)]
pub struct Script(Arc<Mutex<ScriptState>>);

impl Script {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.0.lock().expect("script lock poisoned")
    }

    /// Queues a batch, returned by the next `read_batch`.
    pub fn push(&self, batch: Vec<RawRecord>) {
        self.lock().batches.push_back(batch);
    }

    /// Every `add_watch` call so far.
    pub fn added(&self) -> Vec<(PathBuf, EventMask)> {
        self.lock().added.clone()
    }

    /// Every `remove_watch` call so far.
    pub fn removed(&self) -> Vec<WatchHandle> {
        self.lock().removed.clone()
    }

    /// Handle currently registered for `path`.
    pub fn handle(&self, path: &Path) -> WatchHandle {
        let inode = inode(path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
        self.lock()
            .handles
            .get(&inode)
            .copied()
            .unwrap_or_else(|| panic!("{} is not watched", path.display()))
    }

    /// Makes `add_watch` fail for `path` as if the watch limit was reached.
    pub fn refuse(&self, path: &Path) {
        self.lock().refused.insert(path.to_path_buf());
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

fn inode(path: &Path) -> std::io::Result<(u64, u64)> {
    let metadata = fs::metadata(path)?;
    Ok((metadata.dev(), metadata.ino()))
}

/// In-memory [`WatchSource`] replaying queued batches.
///
/// Handles are issued per inode, so a symlink and its target share one. Without a queued batch
/// `read_batch` waits for the timeout or an interrupt, like a real source would.
#[derive(Debug)]
pub struct ScriptedSource {
    script: Script,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            script: Script::default(),
            wake_tx,
            wake_rx,
        }
    }
}

impl ScriptedSource {
    pub fn script(&self) -> Script {
        self.script.clone()
    }
}

impl WatchSource for ScriptedSource {
    fn open(_config: &Config) -> Result<Self> {
        Ok(Self::default())
    }

    fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchHandle> {
        let inode = inode(path).map_err(|e| Error::io_watch(e).add_path(path.to_path_buf()))?;

        let mut state = self.script.lock();
        if state.refused.contains(path) {
            return Err(Error::max_files_watch().add_path(path.to_path_buf()));
        }
        state.added.push((path.to_path_buf(), mask));
        if let Some(&handle) = state.handles.get(&inode) {
            return Ok(handle);
        }
        state.next += 1;
        let handle = WatchHandle(state.next);
        state.handles.insert(inode, handle);
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()> {
        let mut state = self.script.lock();
        state.removed.push(handle);
        state.handles.retain(|_, h| *h != handle);
        Ok(())
    }

    fn read_batch(&mut self, timeout: Option<Duration>) -> Result<Vec<RawRecord>> {
        {
            let mut state = self.script.lock();
            state.reads += 1;
            if let Some(batch) = state.batches.pop_front() {
                return Ok(batch);
            }
        }

        match timeout {
            Some(timeout) => {
                let _ = self.wake_rx.recv_timeout(timeout);
            }
            None => {
                let _ = self.wake_rx.recv();
            }
        }
        Ok(Vec::new())
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        Arc::new(self.wake_tx.clone())
    }

    fn close(&mut self) -> Result<()> {
        self.script.lock().closed = true;
        Ok(())
    }
}
