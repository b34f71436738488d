//! Configuration types

use crate::EventMask;
use std::path::{Path, PathBuf};

/// Indicates whether only the provided directory or its sub-directories as well should be watched
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum RecursiveMode {
    /// Watch all sub-directories as well, including directories created after installing the watch
    Recursive,

    /// Watch only the provided path
    NonRecursive,
}

impl RecursiveMode {
    pub(crate) fn is_recursive(&self) -> bool {
        match *self {
            RecursiveMode::Recursive => true,
            RecursiveMode::NonRecursive => false,
        }
    }
}

/// Controller and watch source configuration
///
/// ```rust
/// # use notify_controller::{Config, EventMask};
/// let config = Config::default()
///     .with_default_mask(EventMask::CREATE | EventMask::DELETE)
///     .with_follow_symlinks(false);
/// ```
///
/// Everything here is fixed once the controller has been created.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct Config {
    /// See [Config::with_default_mask]
    default_mask: EventMask,

    /// See [Config::with_follow_symlinks]
    follow_symlinks: bool,

    /// See [Config::with_buffer_size]
    buffer_size: usize,

    /// See [Config::with_overflow_resync]
    overflow_resync: bool,
}

impl Config {
    /// Smallest accepted read buffer. A single inotify record with a maximal file name needs
    /// a little under 300 bytes.
    pub const MIN_BUFFER_SIZE: usize = 1024;

    /// Event mask used for [`WatchRequest`]s that do not carry their own.
    ///
    /// The default is [`EventMask::ALL`].
    pub fn with_default_mask(mut self, mask: EventMask) -> Self {
        self.default_mask = mask;
        self
    }

    /// Returns current setting
    pub fn default_mask(&self) -> EventMask {
        self.default_mask
    }

    /// Determine if symbolic links should be followed when recursively watching a directory.
    ///
    /// When disabled, a symbolic link to a directory is watched as a leaf and never descended
    /// into. Off by default.
    pub fn with_follow_symlinks(mut self, follow_symlinks: bool) -> Self {
        self.follow_symlinks = follow_symlinks;
        self
    }

    /// Returns current setting
    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// Size in bytes of the buffer raw records are read into.
    ///
    /// Values below [`Config::MIN_BUFFER_SIZE`] are raised to it. The default is 4096.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(Self::MIN_BUFFER_SIZE);
        self
    }

    /// Returns current setting
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Re-walk recursive watches after the kernel reports a queue overflow.
    ///
    /// Directories created while events were being dropped would otherwise stay unwatched.
    /// On by default.
    pub fn with_overflow_resync(mut self, overflow_resync: bool) -> Self {
        self.overflow_resync = overflow_resync;
        self
    }

    /// Returns current setting
    pub fn overflow_resync(&self) -> bool {
        self.overflow_resync
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_mask: EventMask::ALL,
            follow_symlinks: false,
            buffer_size: 4096,
            overflow_resync: true,
        }
    }
}

/// A path to watch, what to watch it for, and whether to descend into it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WatchRequest {
    path: PathBuf,
    mask: Option<EventMask>,
    recursive_mode: RecursiveMode,
}

impl WatchRequest {
    /// Creates a new request with the provided [`RecursiveMode`]
    pub fn new<P: Into<PathBuf>>(path: P, recursive_mode: RecursiveMode) -> Self {
        Self {
            path: path.into(),
            mask: None,
            recursive_mode,
        }
    }

    /// Watch a single file or directory
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(path, RecursiveMode::NonRecursive)
    }

    /// Watch a directory and every directory below it
    pub fn recursive<P: Into<PathBuf>>(path: P) -> Self {
        Self::new(path, RecursiveMode::Recursive)
    }

    /// Set the event mask; without one the [`Config::default_mask`] applies
    pub fn with_mask(mut self, mask: EventMask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Returns the path of this request.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the requested mask, if one was set.
    pub fn mask(&self) -> Option<EventMask> {
        self.mask
    }

    /// Returns current setting
    pub fn recursive_mode(&self) -> RecursiveMode {
        self.recursive_mode
    }

    pub(crate) fn resolve(self, config: &Config, path: PathBuf) -> Self {
        Self {
            path,
            mask: Some(self.mask.unwrap_or(config.default_mask)),
            recursive_mode: self.recursive_mode,
        }
    }
}

impl From<PathBuf> for WatchRequest {
    fn from(path: PathBuf) -> Self {
        Self::file(path)
    }
}

impl From<&Path> for WatchRequest {
    fn from(path: &Path) -> Self {
        Self::file(path)
    }
}

impl<P: Into<PathBuf>> From<(P, EventMask)> for WatchRequest {
    fn from((path, mask): (P, EventMask)) -> Self {
        Self::file(path).with_mask(mask)
    }
}
