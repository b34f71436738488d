//! Keeps the set of kernel watches in step with the directory trees being observed.
//!
//! inotify only reports on a directory and its direct entries. A recursive watch is therefore one
//! kernel watch per directory, and the set has to grow when directories are created or moved in,
//! and shrink when they are moved out or deleted. [`WatchTree::apply`] does that after every
//! notification, before it is dispatched.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::source::{WatchHandle, WatchSource};
use crate::translate::Translated;
use crate::{Config, Error, ErrorKind, EventMask, IgnoreSet, Result, WatchRequest};

/// Bits every directory of a recursive watch is registered with, whether the client asked for
/// them or not.
pub const TREE_MASK: EventMask = EventMask::CREATE
    .union(EventMask::MOVED_FROM)
    .union(EventMask::MOVED_TO)
    .union(EventMask::DELETE_SELF);

/// One active kernel watch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEntry {
    path: PathBuf,
    mask: EventMask,
    kernel_mask: EventMask,
    recursive: bool,
}

impl WatchEntry {
    pub(crate) fn new(
        path: PathBuf,
        mask: EventMask,
        kernel_mask: EventMask,
        recursive: bool,
    ) -> Self {
        Self {
            path,
            mask,
            kernel_mask,
            recursive,
        }
    }

    /// Absolute path the watch was registered for.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What the client asked for.
    pub fn mask(&self) -> EventMask {
        self.mask
    }

    /// What the kernel was asked for.
    pub fn kernel_mask(&self) -> EventMask {
        self.kernel_mask
    }

    /// Whether the directory is part of a recursive watch.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }
}

/// Handle to path mapping of all active watches, with a reverse index.
#[derive(Clone, Debug, Default)]
pub struct WatchTable {
    entries: HashMap<WatchHandle, WatchEntry>,
    handles: HashMap<PathBuf, WatchHandle>,
}

impl WatchTable {
    /// Looks up a watch.
    pub fn get(&self, handle: WatchHandle) -> Option<&WatchEntry> {
        self.entries.get(&handle)
    }

    /// Handle of the watch registered for exactly `path`.
    pub fn handle(&self, path: &Path) -> Option<WatchHandle> {
        self.handles.get(path).copied()
    }

    /// Entry of the watch registered for exactly `path`.
    pub fn entry(&self, path: &Path) -> Option<&WatchEntry> {
        self.handle(path).and_then(|handle| self.get(handle))
    }

    /// Returns true if `path` is watched.
    pub fn contains(&self, path: &Path) -> bool {
        self.handles.contains_key(path)
    }

    /// Number of active watches.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All watches, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (WatchHandle, &WatchEntry)> {
        self.entries.iter().map(|(handle, entry)| (*handle, entry))
    }

    /// Inserts an entry.
    ///
    /// A handle already present under another path (two paths naming one inode) loses its old
    /// path mapping. A path already mapped to another handle (the inode was replaced) loses the
    /// old entry.
    pub(crate) fn insert(&mut self, handle: WatchHandle, entry: WatchEntry) -> Option<WatchEntry> {
        if let Some(old) = self.entries.get(&handle) {
            if old.path != entry.path {
                self.handles.remove(&old.path);
            }
        }
        if let Some(old_handle) = self.handles.insert(entry.path.clone(), handle) {
            if old_handle != handle {
                self.entries.remove(&old_handle);
            }
        }
        self.entries.insert(handle, entry)
    }

    pub(crate) fn remove(&mut self, handle: WatchHandle) -> Option<WatchEntry> {
        let entry = self.entries.remove(&handle)?;
        if self.handles.get(&entry.path) == Some(&handle) {
            self.handles.remove(&entry.path);
        }
        Some(entry)
    }

    /// Watches strictly below `path`.
    fn descendants(&self, path: &Path) -> Vec<(WatchHandle, PathBuf)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.path != path && entry.path.starts_with(path))
            .map(|(handle, entry)| (*handle, entry.path.clone()))
            .collect()
    }
}

/// Owns a [`WatchSource`] and the [`WatchTable`] of everything registered with it.
#[derive(Debug)]
pub struct WatchTree<S> {
    source: S,
    table: WatchTable,
    /// explicit requests, by absolute path
    roots: HashMap<PathBuf, WatchRequest>,
    config: Config,
}

impl<S: WatchSource> WatchTree<S> {
    /// Creates an empty tree on top of `source`.
    pub fn new(source: S, config: Config) -> Self {
        Self {
            source,
            table: WatchTable::default(),
            roots: HashMap::new(),
            config,
        }
    }

    /// The active watches.
    pub fn table(&self) -> &WatchTable {
        &self.table
    }

    /// The explicit watch requests, with absolute paths and masks filled in.
    pub fn roots(&self) -> impl Iterator<Item = &WatchRequest> {
        self.roots.values()
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The underlying source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Registers a request.
    ///
    /// The path must exist. A recursive request for a directory registers every directory below
    /// it, except those under a persistent rule of `ignored`.
    pub fn watch(&mut self, request: WatchRequest, ignored: &IgnoreSet) -> Result<()> {
        let path = absolute(request.path())?;
        let metadata = fs::metadata(&path).map_err(|e| Error::io_watch(e).add_path(path.clone()))?;

        let mut request = request.resolve(&self.config, path.clone());
        if let Some(previous) = self.roots.get(&path) {
            let mask = previous.mask().unwrap_or_default() | request.mask().unwrap_or_default();
            let recursive = previous.recursive_mode().is_recursive()
                || request.recursive_mode().is_recursive();
            request = if recursive {
                WatchRequest::recursive(path.clone())
            } else {
                WatchRequest::file(path.clone())
            }
            .with_mask(mask);
        }

        let mask = request.mask().unwrap_or(self.config.default_mask());
        let recursive = request.recursive_mode().is_recursive() && metadata.is_dir();

        let before = self.table.clone();
        let added = if recursive {
            self.add_subtree(&path, mask, ignored)
        } else {
            self.add_single(&path, mask, false).map(|_| ())
        };
        if let Err(err) = added {
            self.roll_back(before);
            return Err(err);
        }

        self.roots.insert(path, request);
        Ok(())
    }

    /// Removes the watch for exactly `path`.
    ///
    /// If it was recursive, every directory below it that is not an explicit request of its own
    /// is unwatched too. A path still covered by another recursive request stays watched with that
    /// request's mask.
    pub fn unwatch(&mut self, path: &Path, ignored: &IgnoreSet) -> Result<()> {
        let path = absolute(path)?;
        let Some(handle) = self.table.handle(&path) else {
            // the watched path itself is gone
            if self.roots.remove(&path).is_some() {
                return Ok(());
            }
            return Err(Error::watch_not_found().add_path(path));
        };

        self.roots.remove(&path);
        let entry = self.table.remove(handle);
        self.source.remove_watch(handle)?;

        if entry.is_some_and(|entry| entry.recursive) {
            for (handle, descendant) in self.table.descendants(&path) {
                if self.roots.contains_key(&descendant) {
                    continue;
                }
                self.table.remove(handle);
                self.source.remove_watch(handle)?;
            }
        }

        if let Some(mask) = self.covering_mask(&path) {
            self.add_subtree(&path, mask, ignored)?;
        }
        Ok(())
    }

    /// Adjusts the watch set to what `translated` reports happened.
    pub fn apply(&mut self, translated: &Translated, ignored: &IgnoreSet) -> Result<()> {
        let notification = &translated.notification;
        let event = notification.event();
        let is_dir = notification.is_dir();

        if event == EventMask::Q_OVERFLOW {
            if self.config.overflow_resync() {
                return self.resync(ignored);
            }
        } else if event == EventMask::MOVE {
            if is_dir {
                match notification.moved_to() {
                    Some(to) => self.relocate(notification.path(), to, ignored)?,
                    None => self.contract(notification.path())?,
                }
            }
        } else if is_dir && (event == EventMask::CREATE || event == EventMask::MOVED_TO) {
            self.extend(notification.path(), ignored)?;
        } else if is_dir && event == EventMask::MOVED_FROM {
            self.contract(notification.path())?;
        } else if is_dir && event == EventMask::DELETE {
            if let Some(handle) = self.table.handle(notification.path()) {
                log::trace!(
                    "forgetting deleted directory {}",
                    notification.path().display()
                );
                self.table.remove(handle);
            }
        } else if event == EventMask::DELETE_SELF || event == EventMask::IGNORED {
            if let Some(handle) = translated.handle {
                self.table.remove(handle);
            }
        }
        Ok(())
    }

    /// Drops watches whose path is gone and re-walks every recursive request.
    ///
    /// A request that cannot be re-walked does not keep the others from being. The first error
    /// is returned.
    pub fn resync(&mut self, ignored: &IgnoreSet) -> Result<()> {
        log::debug!("resynchronising {} watches", self.table.len());
        let mut result = Ok(());

        let gone: Vec<WatchHandle> = self
            .table
            .iter()
            .filter(|(_, entry)| fs::symlink_metadata(&entry.path).is_err())
            .map(|(handle, _)| handle)
            .collect();
        for handle in gone {
            self.table.remove(handle);
            if let Err(err) = self.source.remove_watch(handle) {
                log::warn!("unable to remove {handle}: {err}");
                result = result.and(Err(err));
            }
        }

        let recursive: Vec<(PathBuf, EventMask)> = self
            .roots
            .values()
            .filter(|request| request.recursive_mode().is_recursive())
            .map(|request| {
                let mask = request.mask().unwrap_or(self.config.default_mask());
                (request.path().to_path_buf(), mask)
            })
            .collect();
        for (root, mask) in recursive {
            if !root.is_dir() {
                continue;
            }
            if let Err(err) = self.add_subtree(&root, mask, ignored) {
                log::warn!("unable to resynchronise {}: {err}", root.display());
                result = result.and(Err(err));
            }
        }
        result
    }

    /// Closes the source.
    pub fn close(&mut self) -> Result<()> {
        self.table = WatchTable::default();
        self.source.close()
    }

    /// Union of the masks of every recursive request `path` lies in.
    fn covering_mask(&self, path: &Path) -> Option<EventMask> {
        self.roots
            .values()
            .filter(|request| {
                request.recursive_mode().is_recursive() && path.starts_with(request.path())
            })
            .filter_map(|request| request.mask())
            .reduce(|a, b| a | b)
    }

    /// Whether a directory at `path` belongs to a recursive watch.
    fn is_covered(&self, path: &Path, ignored: &IgnoreSet) -> bool {
        let parent_is_recursive = path
            .parent()
            .and_then(|parent| self.table.entry(parent))
            .is_some_and(|entry| entry.recursive);
        parent_is_recursive && !ignored.is_ignored(path)
    }

    /// Returns to the watches of `before`, undoing a partially applied request.
    fn roll_back(&mut self, before: WatchTable) {
        let current: Vec<(WatchHandle, EventMask)> = self
            .table
            .iter()
            .map(|(handle, entry)| (handle, entry.kernel_mask))
            .collect();
        for (handle, kernel_mask) in current {
            let undone = match before.get(handle) {
                None => self.source.remove_watch(handle),
                Some(old) if old.kernel_mask != kernel_mask => {
                    self.source.add_watch(&old.path, old.kernel_mask).map(|_| ())
                }
                Some(_) => Ok(()),
            };
            if let Err(err) = undone {
                log::debug!("unable to undo {handle} of a failed watch: {err}");
            }
        }
        self.table = before;
    }

    /// Watches a directory that appeared inside a recursive watch, with everything already in it.
    fn extend(&mut self, path: &Path, ignored: &IgnoreSet) -> Result<()> {
        if !self.is_covered(path, ignored) {
            return Ok(());
        }

        match self.covering_mask(path) {
            Some(mask) => self.add_subtree(path, mask, ignored),
            None => Ok(()),
        }
    }

    /// Unwatches a directory that left its tree, with everything below it.
    ///
    /// The kernel keeps a watch alive across a rename, so it has to be removed explicitly.
    fn contract(&mut self, path: &Path) -> Result<()> {
        let Some(handle) = self.table.handle(path) else {
            return Ok(());
        };

        let mut handles: Vec<WatchHandle> = self
            .table
            .descendants(path)
            .into_iter()
            .map(|(handle, _)| handle)
            .collect();
        handles.push(handle);

        for handle in handles {
            self.table.remove(handle);
            self.source.remove_watch(handle)?;
        }
        Ok(())
    }

    /// Moves the watches of a renamed directory to its new path.
    ///
    /// Kernel watches stay with the inode, only their paths change. A directory moved to where no
    /// recursive watch covers it is unwatched instead.
    fn relocate(&mut self, from: &Path, to: &Path, ignored: &IgnoreSet) -> Result<()> {
        let Some(handle) = self.table.handle(from) else {
            return self.extend(to, ignored);
        };
        if !self.is_covered(to, ignored) {
            return self.contract(from);
        }

        let mut moved = self.table.descendants(from);
        moved.push((handle, from.to_path_buf()));
        let entries: Vec<(WatchHandle, WatchEntry)> = moved
            .into_iter()
            .filter_map(|(handle, _)| Some((handle, self.table.remove(handle)?)))
            .collect();
        for (handle, mut entry) in entries {
            if let Ok(rest) = entry.path.strip_prefix(from) {
                entry.path = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
            }
            log::trace!("{handle} moved to {}", entry.path.display());
            self.table.insert(handle, entry);
        }

        // anything created below it before the move was seen
        self.extend(to, ignored)
    }

    fn add_subtree(&mut self, root: &Path, mask: EventMask, ignored: &IgnoreSet) -> Result<()> {
        let mut walker = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks())
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!("skipping entry while watching {}: {err}", root.display());
                    continue;
                }
            };

            if !entry.file_type().is_dir() {
                if entry.path_is_symlink() && entry.path().is_dir() {
                    self.add_leaf(entry.path(), mask)?;
                }
                continue;
            }

            if entry.depth() > 0 && ignored.is_ignored(entry.path()) {
                walker.skip_current_dir();
                continue;
            }

            match self.add_single(entry.path(), mask, true) {
                Ok(_) => {}
                Err(err) if matches!(err.kind, ErrorKind::PathNotFound) => {
                    log::debug!(
                        "directory vanished while watching: {}",
                        entry.path().display()
                    );
                    walker.skip_current_dir();
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn add_leaf(&mut self, path: &Path, mask: EventMask) -> Result<()> {
        // the kernel watches the target, which may already be watched
        if let Ok(target) = fs::canonicalize(path) {
            let watched = self
                .table
                .entry(&target)
                .is_some_and(|entry| entry.kernel_mask.contains(mask));
            if watched {
                log::trace!("{} is watched as {}", path.display(), target.display());
                return Ok(());
            }
        }

        match self.add_single(path, mask, false) {
            Err(err) if matches!(err.kind, ErrorKind::PathNotFound) => {
                log::debug!("symlink vanished while watching: {}", path.display());
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    /// Registers one path.
    ///
    /// Two paths naming one inode (a symlink and its target) share one kernel watch and one
    /// entry. A recursive entry keeps its path, otherwise the last path registered wins.
    fn add_single(&mut self, path: &Path, mask: EventMask, recursive: bool) -> Result<WatchHandle> {
        let mut mask = mask;
        let mut kernel_mask = if recursive { mask | TREE_MASK } else { mask };
        let mut recursive = recursive;
        if let Some(existing) = self.table.entry(path) {
            mask |= existing.mask;
            kernel_mask |= existing.kernel_mask;
            recursive |= existing.recursive;
        }

        let mut handle = self.source.add_watch(path, kernel_mask)?;

        let alias = self
            .table
            .get(handle)
            .filter(|alias| alias.path != path)
            .cloned();
        if let Some(alias) = &alias {
            mask |= alias.mask;
            if !kernel_mask.contains(alias.kernel_mask) {
                kernel_mask |= alias.kernel_mask;
                handle = self.source.add_watch(path, kernel_mask)?;
            }
        }

        if let Some(old) = self.table.handle(path) {
            if old != handle {
                self.table.remove(old);
                self.source.remove_watch(old)?;
            }
        }

        let path = match alias {
            Some(alias) if alias.recursive => {
                recursive = true;
                alias.path
            }
            _ => path.to_path_buf(),
        };
        log::trace!("watching {} as {handle} ({mask})", path.display());
        self.table
            .insert(handle, WatchEntry::new(path, mask, kernel_mask, recursive));
        Ok(handle)
    }
}

/// Makes `path` absolute, without `.` components or trailing separators.
fn absolute(path: &Path) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = env::current_dir().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::path_not_found().add_path(path.to_path_buf()),
            _ => Error::io(e),
        })?;
        cwd.join(path)
    };
    Ok(path.components().collect())
}
