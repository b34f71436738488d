//! The `EventMask` bit set and its string names.

use std::{error::Error as StdError, fmt, str::FromStr};

use bitflags::{bitflags, Flags};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

bitflags! {
    /// A set of filesystem change kinds.
    ///
    /// Used both to express interest (when watching a path or registering a handler) and to
    /// describe what happened (on a [`Notification`](crate::Notification)). The bit values mirror
    /// the Linux inotify ABI, see [inotify(7)].
    ///
    /// [inotify(7)]: http://man7.org/linux/man-pages/man7/inotify.7.html
    ///
    /// # Examples
    ///
    /// ```
    /// use notify_controller::EventMask;
    ///
    /// let interest = EventMask::OPEN | EventMask::CLOSE_WRITE;
    /// assert!(interest.intersects(EventMask::CLOSE_WRITE));
    /// assert!(!interest.intersects(EventMask::MOVED_FROM));
    /// assert!(EventMask::ALL.contains(EventMask::MOVED_FROM));
    /// assert_eq!(EventMask::ACCESS.to_string(), "access");
    /// ```
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct EventMask: u32 {
        /// File was accessed (read).
        const ACCESS = 0x0000_0001;

        /// File was modified.
        ///
        /// When monitoring a directory, the event occurs *only* for the files within.
        const MODIFY = 0x0000_0002;

        /// Metadata changed: permissions, timestamps, extended attributes, link count, owner.
        const ATTRIB = 0x0000_0004;

        /// File opened for writing was closed.
        const CLOSE_WRITE = 0x0000_0008;

        /// File not opened for writing was closed.
        const CLOSE_NOWRITE = 0x0000_0010;

        /// File or directory was opened.
        const OPEN = 0x0000_0020;

        /// File or directory was moved away from a watched directory.
        const MOVED_FROM = 0x0000_0040;

        /// File or directory was moved into a watched directory.
        const MOVED_TO = 0x0000_0080;

        /// File or directory was created in a watched directory.
        const CREATE = 0x0000_0100;

        /// File or directory was deleted from a watched directory.
        const DELETE = 0x0000_0200;

        /// Watched file or directory was itself deleted.
        const DELETE_SELF = 0x0000_0400;

        /// Watched file or directory was itself moved.
        const MOVE_SELF = 0x0000_0800;

        /// Filesystem containing the watched path was unmounted.
        const UNMOUNT = 0x0000_2000;

        /// The kernel event queue overflowed and events were lost.
        const Q_OVERFLOW = 0x0000_4000;

        /// The watch was removed, explicitly or because its target went away.
        const IGNORED = 0x0000_8000;

        /// Either half of a rename.
        const MOVE = Self::MOVED_FROM.bits() | Self::MOVED_TO.bits();

        /// Either kind of close.
        const CLOSE = Self::CLOSE_WRITE.bits() | Self::CLOSE_NOWRITE.bits();
    }
}

impl Default for EventMask {
    fn default() -> Self {
        EventMask::ALL
    }
}

impl EventMask {
    /// Every defined change kind.
    pub const ALL: EventMask = EventMask::all();

    /// Bits the kernel reports about a watch rather than about a change.
    pub const META: EventMask = EventMask::UNMOUNT
        .union(EventMask::Q_OVERFLOW)
        .union(EventMask::IGNORED);

    /// Returns the name of this mask if it is exactly one named value (a single flag, `close`,
    /// `move` or `all`).
    pub fn name(self) -> Option<String> {
        if self == EventMask::ALL {
            return Some("all".to_string());
        }

        <EventMask as Flags>::FLAGS
            .iter()
            .find(|flag| flag.value().bits() == self.bits())
            .map(|flag| flag.name().to_ascii_lowercase())
    }

    /// Iterates each set single bit, lowest first.
    pub fn split(self) -> impl Iterator<Item = EventMask> {
        let bits = self.bits();
        (0..u32::BITS)
            .map(|shift| 1u32 << shift)
            .filter(move |bit| bits & bit != 0)
            .map(EventMask::from_bits_retain)
    }

    /// Indicates whether this mask only carries watch meta bits.
    pub fn is_meta(self) -> bool {
        !self.is_empty() && EventMask::META.contains(self)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name() {
            return f.write_str(&name);
        }

        let mut first = true;
        for bit in self.split() {
            if !first {
                f.write_str(" | ")?;
            }
            first = false;
            match bit.name() {
                Some(name) => f.write_str(&name)?,
                None => write!(f, "{:#x}", bit.bits())?,
            }
        }
        Ok(())
    }
}

/// Error returned when a string does not name an [`EventMask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventMaskError(String);

impl fmt::Display for ParseEventMaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event name {:?}", self.0)
    }
}

impl StdError for ParseEventMaskError {}

impl FromStr for EventMask {
    type Err = ParseEventMaskError;

    /// Parses a name such as `"close_write"`, or several joined with `|`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = EventMask::empty();
        for part in s.split('|') {
            let part = part.trim();
            if part.eq_ignore_ascii_case("all") {
                mask |= EventMask::ALL;
                continue;
            }
            let flag = EventMask::from_name(&part.to_ascii_uppercase())
                .ok_or_else(|| ParseEventMaskError(part.to_string()))?;
            mask |= flag;
        }
        Ok(mask)
    }
}
