//! The value handed to event handlers.

use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::EventMask;

/// A single, path-resolved filesystem change.
///
/// The `event` is exactly one [`EventMask`] bit, except for a rename whose two halves were both
/// observed: that one carries [`EventMask::MOVE`], the source in [`path`](Self::path) and the
/// destination in [`moved_to`](Self::moved_to).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Notification {
    event: EventMask,
    path: PathBuf,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    moved_to: Option<PathBuf>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    cookie: Option<u32>,
    is_dir: bool,
}

impl Notification {
    pub(crate) fn new(event: EventMask, path: PathBuf, is_dir: bool) -> Self {
        Self {
            event,
            path,
            moved_to: None,
            cookie: None,
            is_dir,
        }
    }

    pub(crate) fn renamed(from: PathBuf, to: PathBuf, cookie: u32, is_dir: bool) -> Self {
        Self {
            event: EventMask::MOVE,
            path: from,
            moved_to: Some(to),
            cookie: Some(cookie),
            is_dir,
        }
    }

    pub(crate) fn overflow() -> Self {
        Self::new(EventMask::Q_OVERFLOW, PathBuf::new(), false)
    }

    pub(crate) fn with_cookie(mut self, cookie: u32) -> Self {
        if cookie != 0 {
            self.cookie = Some(cookie);
        }
        self
    }

    /// The change that happened.
    pub fn event(&self) -> EventMask {
        self.event
    }

    /// Absolute path of the affected file or directory.
    ///
    /// Empty for a queue overflow.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Destination of a rename whose both halves were observed.
    pub fn moved_to(&self) -> Option<&Path> {
        self.moved_to.as_deref()
    }

    /// Cookie the kernel used to correlate the two halves of a rename.
    pub fn cookie(&self) -> Option<u32> {
        self.cookie
    }

    /// Whether the subject of the change is a directory.
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Returns true for a reassembled rename pair.
    pub fn is_rename(&self) -> bool {
        self.moved_to.is_some()
    }

    /// Returns true when the kernel dropped events.
    pub fn is_overflow(&self) -> bool {
        self.event == EventMask::Q_OVERFLOW
    }

    /// Every path this notification is about.
    pub(crate) fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.moved_to())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rename_carries_both_paths() {
        let n = Notification::renamed("/a/x".into(), "/b/x".into(), 7, false);
        assert!(n.is_rename());
        assert_eq!(n.event(), EventMask::MOVE);
        assert_eq!(n.moved_to(), Some(Path::new("/b/x")));
        assert_eq!(n.cookie(), Some(7));
        assert_eq!(
            n.paths().collect::<Vec<_>>(),
            vec![Path::new("/a/x"), Path::new("/b/x")]
        );
    }

    #[test]
    fn zero_cookie_is_absent() {
        let n = Notification::new(EventMask::MOVED_TO, "/a/x".into(), false).with_cookie(0);
        assert_eq!(n.cookie(), None);
        assert!(!n.is_rename());
    }

    #[test]
    fn overflow_has_empty_path() {
        let n = Notification::overflow();
        assert!(n.is_overflow());
        assert_eq!(n.path(), Path::new(""));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes() {
        let n = Notification::new(EventMask::CREATE, "/tmp/file".into(), true);
        let json = serde_json::to_string(&n).unwrap();
        assert!(!json.contains("moved_to"));
        let back: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }
}
