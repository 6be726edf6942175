use std::collections::HashSet;
use tracing::debug;
use ws_api_types::WaveRecord;

/// Ordered, deduplicated wave log.
///
/// Insertion order is arrival order. No two stored records are equal by value;
/// `append` is the only way a record gets in, including during `replace_all`.
#[derive(Debug, Default, Clone)]
pub struct WaveStore {
    records: Vec<WaveRecord>,
    seen: HashSet<WaveRecord>,
}

impl WaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record` unless a value-equal record is already stored.
    /// Returns whether the store changed.
    pub fn append(&mut self, record: WaveRecord) -> bool {
        if self.seen.contains(&record) {
            debug!(address = %record.address, timestamp = record.timestamp, "duplicate wave ignored");
            return false;
        }
        self.seen.insert(record.clone());
        self.records.push(record);
        true
    }

    /// Replaces the contents with `records`, keeping their order and dropping repeats.
    pub fn replace_all<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = WaveRecord>,
    {
        self.records.clear();
        self.seen.clear();
        for record in records {
            self.append(record);
        }
    }

    pub fn contains(&self, record: &WaveRecord) -> bool {
        self.seen.contains(record)
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn all(&self) -> &[WaveRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(address: &str, timestamp: u64, message: &str) -> WaveRecord {
        WaveRecord::new(address, timestamp, message)
    }

    #[test]
    fn appending_twice_matches_appending_once() {
        let record = wave("0xa", 1, "gm");

        let mut once = WaveStore::new();
        assert!(once.append(record.clone()));

        let mut twice = WaveStore::new();
        assert!(twice.append(record.clone()));
        assert!(!twice.append(record));

        assert_eq!(once.all(), twice.all());
        assert_eq!(twice.size(), 1);
    }

    #[test]
    fn replace_all_preserves_history_order() {
        let (a, b, c) = (wave("0xa", 1, "a"), wave("0xb", 2, "b"), wave("0xc", 3, "c"));
        let mut store = WaveStore::new();
        store.append(wave("0xz", 9, "stale"));

        store.replace_all(vec![a.clone(), b.clone(), c.clone()]);

        assert_eq!(store.all(), &[a, b, c]);
    }

    #[test]
    fn replace_all_drops_repeated_rows() {
        let a = wave("0xa", 1, "a");
        let b = wave("0xb", 2, "b");
        let mut store = WaveStore::new();

        store.replace_all(vec![a.clone(), b.clone(), a.clone()]);

        assert_eq!(store.all(), &[a, b]);
    }

    #[test]
    fn records_differing_in_one_field_are_distinct() {
        let mut store = WaveStore::new();
        store.append(wave("0xa", 1, "hello"));
        store.append(wave("0xa", 2, "hello"));
        store.append(wave("0xa", 1, "hello!"));
        store.append(wave("0xb", 1, "hello"));
        assert_eq!(store.size(), 4);
    }
}
