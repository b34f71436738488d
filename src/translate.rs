//! Turns raw records into path-resolved [`Notification`]s.
//!
//! Each record is resolved against the [`WatchTable`] and split into one notification per change
//! bit. The two halves of a rename observed in the same batch are folded into one notification
//! carrying [`EventMask::MOVE`].

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;

use crate::source::{RawRecord, WatchHandle};
use crate::tree::{WatchEntry, WatchTable};
use crate::{EventMask, Notification};

/// A record named a watch the table does not know (anymore).
///
/// Happens for records already queued when their watch was removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleHandle {
    /// The unknown handle.
    pub handle: WatchHandle,

    /// Bits of the dropped record.
    pub mask: EventMask,
}

impl fmt::Display for StaleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record for unknown {} ({})", self.handle, self.mask)
    }
}

/// A notification together with what the watch it came from asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Translated {
    /// The resolved notification.
    pub notification: Notification,

    /// Watch the record was reported on, `None` for a queue overflow.
    pub handle: Option<WatchHandle>,

    /// Requested mask of the originating watch (both watches for a rename pair).
    pub interest: EventMask,
}

impl Translated {
    /// Whether the client asked for this notification.
    ///
    /// Recursive watches are registered with extra structural bits; notifications for those are
    /// only meant for the [`WatchTree`](crate::tree::WatchTree). Queue overflows and unmounts are
    /// always wanted. `ignored` is wanted only where it was asked for, since the tree removes
    /// watches on its own.
    pub fn is_wanted(&self) -> bool {
        let event = self.notification.event();
        self.interest.intersects(event)
            || event.intersects(EventMask::Q_OVERFLOW | EventMask::UNMOUNT)
    }
}

/// Translates a batch of records, lazily and in order, against a fixed table.
pub fn translate<'a>(records: &'a [RawRecord], table: &'a WatchTable) -> Translate<'a> {
    Translate {
        batch: Batch::new(records),
        table,
    }
}

/// Iterator returned by [`translate`]
#[derive(Debug)]
pub struct Translate<'a> {
    batch: Batch<'a>,
    table: &'a WatchTable,
}

impl Iterator for Translate<'_> {
    type Item = Result<Translated, StaleHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        self.batch.next_in(self.table)
    }
}

/// A batch of records translated one step at a time.
///
/// Every step resolves against the table passed to it, so the table can be updated in between.
/// Records following a directory rename then resolve to the new path.
#[derive(Debug)]
pub struct Batch<'a> {
    records: &'a [RawRecord],
    next: usize,
    pending: VecDeque<Result<Translated, StaleHandle>>,
    /// moved_to records already folded into a rename pair
    paired: HashSet<usize>,
}

impl<'a> Batch<'a> {
    /// Starts translating `records`.
    pub fn new(records: &'a [RawRecord]) -> Self {
        Self {
            records,
            next: 0,
            pending: VecDeque::new(),
            paired: HashSet::new(),
        }
    }

    /// The next translated item, resolved against `table`.
    pub fn next_in(&mut self, table: &WatchTable) -> Option<Result<Translated, StaleHandle>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }

            if self.next >= self.records.len() {
                return None;
            }
            let index = self.next;
            self.next += 1;

            if !self.paired.contains(&index) {
                self.expand(index, table);
            }
        }
    }

    fn expand(&mut self, index: usize, table: &WatchTable) {
        let records = self.records;
        let record = &records[index];

        let Some(handle) = record.handle else {
            if record.mask.contains(EventMask::Q_OVERFLOW) {
                self.pending.push_back(Ok(Translated {
                    notification: Notification::overflow(),
                    handle: None,
                    interest: EventMask::Q_OVERFLOW,
                }));
            }
            return;
        };

        let Some(entry) = table.get(handle) else {
            self.pending.push_back(Err(StaleHandle {
                handle,
                mask: record.mask,
            }));
            return;
        };

        let path = resolve(entry, record);
        for bit in record.mask.split() {
            if bit == EventMask::MOVED_FROM {
                if let Some(pair) = self.pair(index, path.clone(), entry, table) {
                    self.pending.push_back(Ok(pair));
                    continue;
                }
            }

            self.pending.push_back(Ok(Translated {
                notification: Notification::new(bit, path.clone(), record.is_dir())
                    .with_cookie(record.cookie),
                handle: Some(handle),
                interest: entry.mask(),
            }));
        }
    }

    /// Looks ahead for the moved_to half of the rename starting at `index`.
    fn pair(
        &mut self,
        index: usize,
        from: PathBuf,
        from_entry: &WatchEntry,
        table: &WatchTable,
    ) -> Option<Translated> {
        let records = self.records;
        let record = &records[index];
        if record.cookie == 0 {
            return None;
        }

        let paired = &self.paired;
        let (to_index, to_record, to_entry) = records
            .iter()
            .enumerate()
            .skip(index + 1)
            .filter(|(i, r)| {
                !paired.contains(i) && r.mask == EventMask::MOVED_TO && r.cookie == record.cookie
            })
            .find_map(|(i, r)| {
                let entry = table.get(r.handle?)?;
                Some((i, r, entry))
            })?;

        self.paired.insert(to_index);
        Some(Translated {
            notification: Notification::renamed(
                from,
                resolve(to_entry, to_record),
                record.cookie,
                record.is_dir(),
            ),
            handle: record.handle,
            interest: from_entry.mask() | to_entry.mask(),
        })
    }
}

fn resolve(entry: &WatchEntry, record: &RawRecord) -> PathBuf {
    match record.name {
        Some(ref name) => entry.path().join(name),
        None => entry.path().to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn table() -> WatchTable {
        let mut table = WatchTable::default();
        table.insert(
            WatchHandle(1),
            WatchEntry::new("/a".into(), EventMask::ALL, EventMask::ALL, false),
        );
        table.insert(
            WatchHandle(2),
            WatchEntry::new("/b".into(), EventMask::MOVED_TO, EventMask::MOVED_TO, false),
        );
        table.insert(
            WatchHandle(3),
            WatchEntry::new("/c".into(), EventMask::OPEN, EventMask::ALL, true),
        );
        table
    }

    fn events(records: &[RawRecord], table: &WatchTable) -> Vec<(EventMask, PathBuf)> {
        translate(records, table)
            .filter_map(|item| item.ok())
            .map(|t| (t.notification.event(), t.notification.path().to_path_buf()))
            .collect()
    }

    #[test]
    fn resolves_name_against_watch_path() {
        let table = table();
        let records = [
            RawRecord::new(WatchHandle(1), EventMask::CREATE).with_name("x"),
            RawRecord::new(WatchHandle(1), EventMask::DELETE_SELF),
        ];
        assert_eq!(
            events(&records, &table),
            vec![
                (EventMask::CREATE, PathBuf::from("/a/x")),
                (EventMask::DELETE_SELF, PathBuf::from("/a")),
            ]
        );
    }

    #[test]
    fn unknown_handle_is_stale() {
        let table = table();
        let records = [
            RawRecord::new(WatchHandle(9), EventMask::MODIFY),
            RawRecord::new(WatchHandle(1), EventMask::MODIFY).with_name("x"),
        ];
        let items: Vec<_> = translate(&records, &table).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            Err(StaleHandle {
                handle: WatchHandle(9),
                mask: EventMask::MODIFY
            })
        );
        assert!(items[1].is_ok());
    }

    #[test]
    fn coalesced_bits_are_expanded() {
        let table = table();
        let records = [RawRecord::new(
            WatchHandle(1),
            EventMask::DELETE_SELF | EventMask::IGNORED,
        )];
        assert_eq!(
            events(&records, &table),
            vec![
                (EventMask::DELETE_SELF, PathBuf::from("/a")),
                (EventMask::IGNORED, PathBuf::from("/a")),
            ]
        );
    }

    #[test]
    fn rename_pair_is_folded() {
        let table = table();
        let records = [
            RawRecord::new(WatchHandle(1), EventMask::MOVED_FROM)
                .with_name("x")
                .with_cookie(42),
            RawRecord::new(WatchHandle(1), EventMask::MODIFY).with_name("y"),
            RawRecord::new(WatchHandle(2), EventMask::MOVED_TO)
                .with_name("z")
                .with_cookie(42),
        ];
        let items: Vec<_> = translate(&records, &table)
            .collect::<Result<_, _>>()
            .expect("no stale handle");
        assert_eq!(items.len(), 2);

        let pair = &items[0].notification;
        assert_eq!(pair.event(), EventMask::MOVE);
        assert_eq!(pair.path(), Path::new("/a/x"));
        assert_eq!(pair.moved_to(), Some(Path::new("/b/z")));
        assert_eq!(pair.cookie(), Some(42));
        assert_eq!(items[0].interest, EventMask::ALL);
        assert_eq!(items[1].notification.event(), EventMask::MODIFY);
    }

    #[test]
    fn lone_halves_are_kept() {
        let table = table();
        let records = [
            RawRecord::new(WatchHandle(1), EventMask::MOVED_FROM)
                .with_name("x")
                .with_cookie(1),
            RawRecord::new(WatchHandle(2), EventMask::MOVED_TO)
                .with_name("y")
                .with_cookie(2),
        ];
        assert_eq!(
            events(&records, &table),
            vec![
                (EventMask::MOVED_FROM, PathBuf::from("/a/x")),
                (EventMask::MOVED_TO, PathBuf::from("/b/y")),
            ]
        );
    }

    #[test]
    fn overflow_has_no_handle() {
        let table = table();
        let items: Vec<_> = translate(&[RawRecord::overflow()], &table).collect();
        let overflow = items[0].as_ref().expect("overflow");
        assert!(overflow.notification.is_overflow());
        assert_eq!(overflow.handle, None);
        assert!(overflow.is_wanted());
    }

    #[test]
    fn structural_bits_are_not_wanted() {
        let table = table();
        let records = [
            RawRecord::new(WatchHandle(3), EventMask::CREATE).with_name("d").dir(),
            RawRecord::new(WatchHandle(3), EventMask::OPEN).with_name("f"),
            RawRecord::new(WatchHandle(3), EventMask::IGNORED),
        ];
        let wanted: Vec<bool> = translate(&records, &table)
            .map(|item| item.expect("known handle").is_wanted())
            .collect();
        assert_eq!(wanted, vec![false, true, false]);
    }

    #[test]
    fn ignored_is_wanted_where_asked_for() {
        let table = table();
        let records = [
            RawRecord::new(WatchHandle(1), EventMask::IGNORED),
            RawRecord::new(WatchHandle(3), EventMask::UNMOUNT),
        ];
        let wanted: Vec<bool> = translate(&records, &table)
            .map(|item| item.expect("known handle").is_wanted())
            .collect();
        assert_eq!(wanted, vec![true, true]);
    }

    #[test]
    fn batch_resolves_against_the_current_table() {
        let mut table = table();
        let records = [
            RawRecord::new(WatchHandle(1), EventMask::CREATE).with_name("x"),
            RawRecord::new(WatchHandle(1), EventMask::CREATE).with_name("y"),
        ];
        let mut batch = Batch::new(&records);

        let first = batch.next_in(&table).expect("first").expect("known handle");
        assert_eq!(first.notification.path(), Path::new("/a/x"));

        table.remove(WatchHandle(1));
        table.insert(
            WatchHandle(1),
            WatchEntry::new("/renamed".into(), EventMask::ALL, EventMask::ALL, false),
        );
        let second = batch.next_in(&table).expect("second").expect("known handle");
        assert_eq!(second.notification.path(), Path::new("/renamed/y"));
        assert!(batch.next_in(&table).is_none());
    }
}
