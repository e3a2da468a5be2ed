//! Version/section bookkeeping for multi-section tables.

use std::collections::HashMap;

/// `(table_id, group)`: group is the program number for PMT and the PID
/// for ECM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub table_id: u8,
    pub group:    u16,
}

impl TableKey {
    pub fn new(table_id: u8, group: u16) -> Self {
        Self { table_id, group }
    }
}

/// How one incoming section relates to what was seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionUpdate {
    /// The version (or section count) differs from the last one seen.
    pub new_version: bool,
    /// This section number had not been received for the current version.
    pub new_section: bool,
    /// Every section of the current version has been received.
    pub complete: bool,
}

struct SubTable {
    version:  u8,
    received: Vec<bool>,
    count:    usize,
}

#[derive(Default)]
pub struct VersionTracker {
    tables: HashMap<TableKey, SubTable>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, key: TableKey, version: u8, section_number: u8, last_section: u8) -> SectionUpdate {
        let slots = last_section as usize + 1;
        let mut update = SectionUpdate::default();

        let sub = self.tables.entry(key).or_insert_with(|| {
            update.new_version = true;
            SubTable { version, received: vec![false; slots], count: 0 }
        });
        if sub.version != version || sub.received.len() != slots {
            update.new_version = true;
            *sub = SubTable { version, received: vec![false; slots], count: 0 };
        }

        if let Some(seen) = sub.received.get_mut(section_number as usize) {
            if !*seen {
                *seen = true;
                sub.count += 1;
                update.new_section = true;
            }
        }
        update.complete = sub.count == sub.received.len();
        update
    }

    pub fn forget(&mut self, key: TableKey) {
        self.tables.remove(&key);
    }

    /// Drops every entry of `table_id` whose group fails `keep`.
    pub fn retain(&mut self, table_id: u8, mut keep: impl FnMut(u16) -> bool) {
        self.tables.retain(|k, _| k.table_id != table_id || keep(k.group));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PMT: TableKey = TableKey { table_id: 0x02, group: 0x0400 };

    #[test]
    fn test_repeat_is_not_new() {
        let mut t = VersionTracker::new();
        let first = t.observe(PMT, 1, 0, 0);
        assert!(first.new_version && first.new_section && first.complete);

        let again = t.observe(PMT, 1, 0, 0);
        assert!(!again.new_version && !again.new_section && again.complete);
    }

    #[test]
    fn test_version_bump_resets() {
        let mut t = VersionTracker::new();
        t.observe(PMT, 1, 0, 0);
        let bumped = t.observe(PMT, 2, 0, 0);
        assert!(bumped.new_version && bumped.new_section && bumped.complete);
    }

    #[test]
    fn test_multi_section_completes_once_all_seen() {
        let mut t = VersionTracker::new();
        let a = t.observe(PMT, 4, 1, 2);
        assert!(a.new_version && !a.complete);
        let b = t.observe(PMT, 4, 0, 2);
        assert!(!b.new_version && b.new_section && !b.complete);
        assert!(!t.observe(PMT, 4, 0, 2).new_section);
        let c = t.observe(PMT, 4, 2, 2);
        assert!(c.new_section && c.complete);
    }

    #[test]
    fn test_out_of_range_section_is_ignored() {
        let mut t = VersionTracker::new();
        let u = t.observe(PMT, 0, 3, 1);
        assert!(!u.new_section && !u.complete);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut t = VersionTracker::new();
        t.observe(PMT, 1, 0, 0);
        assert!(t.observe(TableKey::new(0x82, 0x0130), 1, 0, 0).new_section);
        t.retain(0x02, |_| false);
        assert!(t.observe(PMT, 1, 0, 0).new_version);
    }
}
