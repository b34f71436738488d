//! The kernel-facing side: watch sources and the raw records they produce.

use std::{
    ffi::OsString,
    fmt, io,
    path::Path,
    sync::Arc,
    time::Duration,
};

use bitflags::bitflags;

use crate::{Config, EventMask, Result};

/// Identifies one kernel watch.
///
/// Unique among the active watches of a source. The kernel may hand the same value out again
/// once the watch has been removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchHandle(pub(crate) i32);

impl WatchHandle {
    /// Wraps a raw watch descriptor.
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw watch descriptor.
    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd {}", self.0)
    }
}

bitflags! {
    /// Record attributes that are not change kinds.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// The subject of the record is a directory.
        const IS_DIR = 0b0000_0001;
    }
}

/// One undecoded kernel record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    /// Watch the record was reported on. `None` for a queue overflow.
    pub handle: Option<WatchHandle>,

    /// Change bits. The kernel may coalesce several into one record.
    pub mask: EventMask,

    /// See [`RecordFlags`]
    pub flags: RecordFlags,

    /// File name relative to the watched directory.
    pub name: Option<OsString>,

    /// Correlates the halves of a rename, zero otherwise.
    pub cookie: u32,
}

impl RawRecord {
    /// Creates a record for a watch.
    pub fn new(handle: WatchHandle, mask: EventMask) -> Self {
        Self {
            handle: Some(handle),
            mask,
            flags: RecordFlags::empty(),
            name: None,
            cookie: 0,
        }
    }

    /// The synthetic record standing for lost events.
    pub fn overflow() -> Self {
        Self {
            handle: None,
            mask: EventMask::Q_OVERFLOW,
            flags: RecordFlags::empty(),
            name: None,
            cookie: 0,
        }
    }

    /// Sets the name fragment.
    pub fn with_name<N: Into<OsString>>(mut self, name: N) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the rename cookie.
    pub fn with_cookie(mut self, cookie: u32) -> Self {
        self.cookie = cookie;
        self
    }

    /// Marks the subject as a directory.
    pub fn dir(mut self) -> Self {
        self.flags |= RecordFlags::IS_DIR;
        self
    }

    /// Returns true if the subject is a directory.
    pub fn is_dir(&self) -> bool {
        self.flags.contains(RecordFlags::IS_DIR)
    }
}

/// Wakes a thread blocked in [`WatchSource::read_batch`].
pub trait Interrupt: Send + Sync {
    /// Makes the pending or next `read_batch` call return, possibly with an empty batch.
    fn interrupt(&self) -> io::Result<()>;
}

/// A kernel notification session.
///
/// Implementations only register and report; which directories to watch is decided by the
/// [`WatchTree`](crate::tree::WatchTree) driving them.
pub trait WatchSource: Send {
    /// Opens a session.
    ///
    /// Fails with [`ErrorKind::Init`](crate::ErrorKind::Init) when the kernel refuses one.
    fn open(config: &Config) -> Result<Self>
    where
        Self: Sized;

    /// Registers a watch for one path.
    ///
    /// Registering a path that is already watched returns the existing handle with the mask
    /// replaced by `mask`.
    fn add_watch(&mut self, path: &Path, mask: EventMask) -> Result<WatchHandle>;

    /// Removes a watch. Removing a watch that is already gone succeeds.
    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()>;

    /// Blocks until records are available, `timeout` elapses, or an [`Interrupt`] fires.
    ///
    /// The last two return an empty batch.
    fn read_batch(&mut self, timeout: Option<Duration>) -> Result<Vec<RawRecord>>;

    /// Returns a handle able to wake a blocked `read_batch` from another thread.
    fn interrupter(&self) -> Arc<dyn Interrupt>;

    /// Releases the session. Every watch becomes invalid.
    fn close(&mut self) -> Result<()>;
}

/// The source best suited for the current platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub type RecommendedSource = crate::inotify::InotifySource;

/// The source best suited for the current platform.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub type RecommendedSource = crate::null::NullSource;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_builders() {
        let record = RawRecord::new(WatchHandle(3), EventMask::CREATE)
            .with_name("sub")
            .dir();
        assert!(record.is_dir());
        assert_eq!(record.name.as_deref(), Some(std::ffi::OsStr::new("sub")));
        assert_eq!(record.cookie, 0);

        let overflow = RawRecord::overflow();
        assert_eq!(overflow.handle, None);
        assert_eq!(overflow.mask, EventMask::Q_OVERFLOW);
    }

    #[test]
    fn handle_display() {
        assert_eq!(WatchHandle::from_raw(12).to_string(), "wd 12");
        assert_eq!(WatchHandle::from_raw(12).as_raw(), 12);
    }
}
