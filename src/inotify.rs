//! Watch source for the inotify Linux API
//!
//! The inotify API reports changes to individual files, and to directories together with the
//! entries directly inside them. It never descends into subdirectories on its own, that
//! bookkeeping lives in [`WatchTree`](crate::tree::WatchTree).

use crate::source::{Interrupt, RawRecord, RecordFlags, WatchHandle, WatchSource};
use crate::{Config, Error, EventMask, Result};
use inotify as inotify_sys;
use inotify_sys::{Inotify, WatchDescriptor, WatchMask};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const INOTIFY: mio::Token = mio::Token(0);
const WAKE: mio::Token = mio::Token(1);

/// Watch source based on inotify
///
/// The inotify descriptor is non-blocking and registered with a `mio::Poll`. A `mio::Waker` on
/// the same poll serves as the [`Interrupt`].
pub struct InotifySource {
    inotify: Option<Inotify>,
    poll: mio::Poll,
    events: mio::Events,
    waker: Arc<mio::Waker>,
    descriptors: HashMap<WatchHandle, WatchDescriptor>,
    buffer: Vec<u8>,
}

impl std::fmt::Debug for InotifySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InotifySource")
            .field("open", &self.inotify.is_some())
            .field("watches", &self.descriptors.len())
            .field("buffer_size", &self.buffer.len())
            .finish()
    }
}

impl Interrupt for mio::Waker {
    fn interrupt(&self) -> io::Result<()> {
        self.wake()
    }
}

impl InotifySource {
    fn inotify(&mut self) -> Result<&mut Inotify> {
        self.inotify
            .as_mut()
            .ok_or_else(|| Error::generic("inotify session is closed"))
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let remaining =
                deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            match self.poll.poll(&mut self.events, remaining) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    // System call was interrupted, retry with what is left of the timeout
                    continue;
                }
                Err(e) => return Err(Error::io(e)),
                Ok(()) => {}
            }

            let mut readable = false;
            for event in &self.events {
                match event.token() {
                    INOTIFY => readable = true,
                    WAKE => log::trace!("inotify source woken up"),
                    _ => unreachable!(),
                }
            }
            return Ok(readable);
        }
    }

    fn drain(&mut self) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        let Self {
            inotify,
            descriptors,
            buffer,
            ..
        } = self;
        let Some(inotify) = inotify.as_mut() else {
            return Ok(records);
        };

        // mio is edge-triggered, read until the descriptor would block
        loop {
            match inotify.read_events(&mut buffer[..]) {
                Ok(events) => {
                    let mut num_events = 0;
                    for event in events {
                        log::trace!("inotify event: {event:?}");
                        num_events += 1;

                        if event.mask.contains(inotify_sys::EventMask::Q_OVERFLOW) {
                            records.push(RawRecord::overflow());
                            continue;
                        }

                        let handle = WatchHandle(event.wd.get_watch_descriptor_id());
                        if event.mask.contains(inotify_sys::EventMask::IGNORED) {
                            descriptors.remove(&handle);
                        }

                        let mut flags = RecordFlags::empty();
                        if event.mask.contains(inotify_sys::EventMask::ISDIR) {
                            flags.insert(RecordFlags::IS_DIR);
                        }

                        records.push(RawRecord {
                            handle: Some(handle),
                            mask: EventMask::from_bits_truncate(event.mask.bits()),
                            flags,
                            name: event.name.map(|name| name.to_os_string()),
                            cookie: event.cookie,
                        });
                    }

                    if num_events == 0 {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::io(e)),
            }
        }

        Ok(records)
    }
}

impl WatchSource for InotifySource {
    fn open(config: &Config) -> Result<Self> {
        let inotify = Inotify::init().map_err(Error::init)?;
        let poll = mio::Poll::new().map_err(Error::init)?;
        let waker = Arc::new(mio::Waker::new(poll.registry(), WAKE).map_err(Error::init)?);

        let inotify_fd = inotify.as_raw_fd();
        let mut evented_inotify = mio::unix::SourceFd(&inotify_fd);
        poll.registry()
            .register(&mut evented_inotify, INOTIFY, mio::Interest::READABLE)
            .map_err(Error::init)?;

        Ok(InotifySource {
            inotify: Some(inotify),
            poll,
            events: mio::Events::with_capacity(16),
            waker,
            descriptors: HashMap::new(),
            buffer: vec![0; config.buffer_size()],
        })
    }

    fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchHandle> {
        let watchmask = WatchMask::from_bits_truncate(mask.bits());
        if watchmask.is_empty() {
            return Err(Error::generic("no watchable event in mask").add_path(path.to_path_buf()));
        }

        log::trace!("adding inotify watch: {} ({mask})", path.display());
        match self.inotify()?.watches().add(path, watchmask) {
            Err(e) => Err(if e.raw_os_error() == Some(libc::ENOSPC) {
                // inotify reports its watch limit as "no space left on device"
                Error::max_files_watch()
            } else if e.kind() == io::ErrorKind::NotFound {
                Error::path_not_found()
            } else {
                Error::io(e)
            }
            .add_path(path.to_path_buf())),
            Ok(wd) => {
                let handle = WatchHandle(wd.get_watch_descriptor_id());
                self.descriptors.insert(handle, wd);
                Ok(handle)
            }
        }
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()> {
        let Some(wd) = self.descriptors.remove(&handle) else {
            return Ok(());
        };

        log::trace!("removing inotify watch: {handle}");
        match self.inotify()?.watches().remove(wd) {
            // the kernel already dropped it
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(()),
            Err(e) => Err(Error::io(e)),
            Ok(()) => Ok(()),
        }
    }

    fn read_batch(&mut self, timeout: Option<Duration>) -> Result<Vec<RawRecord>> {
        self.inotify()?;
        if !self.wait(timeout)? {
            return Ok(Vec::new());
        }
        self.drain()
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.waker.clone()
    }

    fn close(&mut self) -> Result<()> {
        self.descriptors.clear();
        match self.inotify.take() {
            Some(inotify) => inotify.close().map_err(Error::io),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::testdir;
    use crate::ErrorKind;
    use std::fs;
    use std::thread;

    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(1));

    fn source() -> InotifySource {
        InotifySource::open(&Config::default()).expect("open inotify source")
    }

    fn read_until(source: &mut InotifySource, mask: EventMask) -> Vec<RawRecord> {
        let mut all = Vec::new();
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(3) {
            let batch = source.read_batch(TIMEOUT).expect("read batch");
            let done = batch.iter().any(|r| r.mask.contains(mask));
            all.extend(batch);
            if done {
                break;
            }
        }
        all
    }

    #[test]
    fn reports_created_file() {
        let tmpdir = testdir();
        let mut source = source();
        let handle = source
            .add_watch(tmpdir.path(), EventMask::CREATE)
            .expect("add watch");

        fs::write(tmpdir.path().join("entry"), b"").expect("write");

        let records = read_until(&mut source, EventMask::CREATE);
        let record = records
            .iter()
            .find(|r| r.mask.contains(EventMask::CREATE))
            .expect("create record");
        assert_eq!(record.handle, Some(handle));
        assert_eq!(record.name.as_deref(), Some(std::ffi::OsStr::new("entry")));
        assert!(!record.is_dir());
    }

    #[test]
    fn directory_flag_is_set() {
        let tmpdir = testdir();
        let mut source = source();
        source
            .add_watch(tmpdir.path(), EventMask::CREATE)
            .expect("add watch");

        fs::create_dir(tmpdir.path().join("sub")).expect("create_dir");

        let records = read_until(&mut source, EventMask::CREATE);
        assert!(records.iter().any(|r| r.is_dir()));
    }

    #[test]
    fn missing_path_is_not_found() {
        let tmpdir = testdir();
        let mut source = source();
        let err = source
            .add_watch(&tmpdir.path().join("missing"), EventMask::ALL)
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::PathNotFound), "{err:?}");
        assert_eq!(err.paths, vec![tmpdir.path().join("missing")]);
    }

    #[test]
    fn mask_without_watchable_bits_is_rejected() {
        let tmpdir = testdir();
        let mut source = source();
        let err = source
            .add_watch(tmpdir.path(), EventMask::Q_OVERFLOW)
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Generic(_)), "{err:?}");
    }

    #[test]
    fn remove_is_idempotent() {
        let tmpdir = testdir();
        let mut source = source();
        let handle = source
            .add_watch(tmpdir.path(), EventMask::ALL)
            .expect("add watch");
        source.remove_watch(handle).expect("first remove");
        source.remove_watch(handle).expect("second remove");
    }

    #[test]
    fn deleted_target_reports_ignored() {
        let tmpdir = testdir();
        let file = tmpdir.path().join("file");
        fs::write(&file, b"").expect("write");

        let mut source = source();
        let handle = source
            .add_watch(&file, EventMask::DELETE_SELF)
            .expect("add watch");
        fs::remove_file(&file).expect("remove");

        let records = read_until(&mut source, EventMask::IGNORED);
        assert!(records
            .iter()
            .any(|r| r.handle == Some(handle) && r.mask.contains(EventMask::IGNORED)));
        assert!(!source.descriptors.contains_key(&handle));
    }

    #[test]
    fn times_out_with_empty_batch() {
        let mut source = source();
        let started = Instant::now();
        let batch = source
            .read_batch(Some(Duration::from_millis(50)))
            .expect("read batch");
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn interrupt_wakes_blocked_read() {
        let mut source = source();
        let interrupter = source.interrupter();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            interrupter.interrupt().expect("interrupt");
        });

        let batch = source.read_batch(None).expect("read batch");
        assert!(batch.is_empty());
        waker.join().expect("waker thread");
    }

    #[test]
    fn closed_source_refuses_work() {
        let tmpdir = testdir();
        let mut source = source();
        source.close().expect("close");
        source.close().expect("close twice");
        assert!(source.add_watch(tmpdir.path(), EventMask::ALL).is_err());
        assert!(source.read_batch(TIMEOUT).is_err());
    }
}
