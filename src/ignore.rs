//! Paths excluded from dispatch.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::Notification;

/// Persistent and one-shot ignore rules.
///
/// A persistent rule suppresses its path and everything below it until it is removed. A one-shot
/// rule suppresses exactly one notification for its exact path, registering it twice suppresses
/// two.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    persistent: HashSet<PathBuf>,
    once: HashMap<PathBuf, usize>,
}

impl IgnoreSet {
    /// Suppresses `path` and its descendants.
    pub fn ignore(&mut self, path: PathBuf) {
        self.persistent.insert(path);
    }

    /// Suppresses the next notification for exactly `path`.
    pub fn ignore_once(&mut self, path: PathBuf) {
        *self.once.entry(path).or_default() += 1;
    }

    /// Removes every rule for exactly `path`. Returns whether there was one.
    pub fn unignore(&mut self, path: &Path) -> bool {
        let persistent = self.persistent.remove(path);
        let once = self.once.remove(path).is_some();
        persistent || once
    }

    /// Whether a persistent rule covers `path`.
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.persistent.iter().any(|ignored| path.starts_with(ignored))
    }

    /// Returns true if the notification must not be dispatched, consuming a one-shot rule when
    /// that is what matched.
    ///
    /// A rename is suppressed when either of its paths is.
    pub fn suppress(&mut self, notification: &Notification) -> bool {
        if notification.paths().any(|path| self.is_ignored(path)) {
            return true;
        }

        for path in notification.paths() {
            if let Some(count) = self.once.get_mut(path) {
                *count -= 1;
                if *count == 0 {
                    self.once.remove(path);
                }
                return true;
            }
        }
        false
    }

    /// Returns true when there are no rules.
    pub fn is_empty(&self) -> bool {
        self.persistent.is_empty() && self.once.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventMask;

    fn modify(path: &str) -> Notification {
        Notification::new(EventMask::MODIFY, path.into(), false)
    }

    #[test]
    fn persistent_rule_covers_descendants() {
        let mut ignored = IgnoreSet::default();
        ignored.ignore("/a/b".into());

        assert!(ignored.suppress(&modify("/a/b")));
        assert!(ignored.suppress(&modify("/a/b/c")));
        assert!(ignored.suppress(&modify("/a/b")));
        assert!(!ignored.suppress(&modify("/a/bc")));
        assert!(!ignored.suppress(&modify("/a")));
    }

    #[test]
    fn one_shot_rule_fires_once_per_registration() {
        let mut ignored = IgnoreSet::default();
        ignored.ignore_once("/a/x".into());
        ignored.ignore_once("/a/x".into());

        assert!(!ignored.suppress(&modify("/a/x/y")));
        assert!(ignored.suppress(&modify("/a/x")));
        assert!(ignored.suppress(&modify("/a/x")));
        assert!(!ignored.suppress(&modify("/a/x")));
        assert!(ignored.is_empty());
    }

    #[test]
    fn rename_is_suppressed_by_either_path() {
        let mut ignored = IgnoreSet::default();
        ignored.ignore("/dst".into());
        let rename = Notification::renamed("/src/f".into(), "/dst/f".into(), 3, false);
        assert!(ignored.suppress(&rename));
    }

    #[test]
    fn unignore_restores_delivery() {
        let mut ignored = IgnoreSet::default();
        ignored.ignore("/a".into());
        ignored.ignore_once("/a".into());
        assert!(ignored.unignore(Path::new("/a")));
        assert!(!ignored.unignore(Path::new("/a")));
        assert!(!ignored.suppress(&modify("/a")));
    }
}
