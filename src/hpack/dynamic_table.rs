//! HPACK dynamic table (RFC 7541 §2.3.2), grounded directly on the
//! donor's `HPACKDynamicTable`: a fixed 128-entry circular buffer with
//! each entry's name+value packed into a 256-byte inline buffer (no heap
//! allocation per insert), evicted oldest-first by the RFC's
//! `name_len + value_len + 32` byte-cost formula.

pub const DEFAULT_MAX_SIZE: usize = 4096;
pub const MAX_ENTRIES: usize = 128;
const ENTRY_INLINE_CAP: usize = 256;

#[derive(Clone, Copy)]
struct Entry {
    name_len: u16,
    value_len: u16,
    data: [u8; ENTRY_INLINE_CAP],
}

impl Entry {
    const EMPTY: Entry = Entry {
        name_len: 0,
        value_len: 0,
        data: [0; ENTRY_INLINE_CAP],
    };

    fn name(&self) -> &str {
        std::str::from_utf8(&self.data[..self.name_len as usize]).unwrap_or("")
    }

    fn value(&self) -> &str {
        let start = self.name_len as usize;
        std::str::from_utf8(&self.data[start..start + self.value_len as usize]).unwrap_or("")
    }

    /// RFC 7541 §4.1: an entry's size is its name and value octet
    /// lengths plus 32 bytes of accounting overhead.
    fn cost(&self) -> usize {
        self.name_len as usize + self.value_len as usize + 32
    }
}

pub struct DynamicTable {
    entries: Box<[Entry; MAX_ENTRIES]>,
    /// Index of the most recently inserted entry's slot; entries are
    /// logically ordered newest-first starting here, wrapping modulo
    /// `MAX_ENTRIES`.
    head: usize,
    count: usize,
    current_size: usize,
    max_size: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DynamicTableError {
    /// A single name+value pair doesn't fit the 256-byte inline budget;
    /// per the resolved design decision this fails the whole header
    /// block rather than silently truncating the entry.
    EntryTooLarge,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Box::new([Entry::EMPTY; MAX_ENTRIES]),
            head: 0,
            count: 0,
            current_size: 0,
            max_size,
        }
    }

    pub fn size(&self) -> usize {
        self.current_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// A new-name-update insert always prepends logically at dynamic
    /// index 62 (index 1 relative to this table); callers map
    /// `62 + i` to `get(i)`.
    pub fn add(&mut self, name: &str, value: &str) -> Result<(), DynamicTableError> {
        if name.len() + value.len() + 32 > ENTRY_INLINE_CAP + 32 || name.len() + value.len() > ENTRY_INLINE_CAP {
            return Err(DynamicTableError::EntryTooLarge);
        }

        let new_cost = name.len() + value.len() + 32;
        self.evict_to_fit(new_cost);

        // If even after evicting everything it still doesn't fit under
        // max_size, the table simply holds nothing (RFC 7541 §4.4).
        if new_cost > self.max_size {
            return Ok(());
        }

        self.head = if self.count == 0 { 0 } else { (self.head + MAX_ENTRIES - 1) % MAX_ENTRIES };
        let mut entry = Entry::EMPTY;
        entry.data[..name.len()].copy_from_slice(name.as_bytes());
        entry.data[name.len()..name.len() + value.len()].copy_from_slice(value.as_bytes());
        entry.name_len = name.len() as u16;
        entry.value_len = value.len() as u16;

        self.entries[self.head] = entry;
        self.count = (self.count + 1).min(MAX_ENTRIES);
        self.current_size += new_cost;
        Ok(())
    }

    /// `index` is 0-based, 0 = most recently inserted.
    pub fn get(&self, index: usize) -> Option<(&str, &str)> {
        if index >= self.count {
            return None;
        }
        let slot = (self.head + index) % MAX_ENTRIES;
        let entry = &self.entries[slot];
        Some((entry.name(), entry.value()))
    }

    pub fn find(&self, name: &str, value: Option<&str>) -> Option<usize> {
        for i in 0..self.count {
            let (n, v) = self.get(i).unwrap();
            if n == name && value.map(|val| val == v).unwrap_or(true) {
                return Some(i);
            }
        }
        None
    }

    pub fn set_max_size(&mut self, new_max: usize) {
        self.max_size = new_max;
        self.evict_to_fit(0);
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.current_size = 0;
        self.head = 0;
    }

    fn evict_to_fit(&mut self, incoming_cost: usize) {
        while self.count > 0 && self.current_size + incoming_cost > self.max_size {
            let oldest_slot = (self.head + self.count - 1) % MAX_ENTRIES;
            self.current_size -= self.entries[oldest_slot].cost();
            self.count -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_most_recent_first() {
        let mut table = DynamicTable::new(DEFAULT_MAX_SIZE);
        table.add("custom-header", "value1").unwrap();
        table.add("custom-header", "value2").unwrap();

        assert_eq!(table.get(0), Some(("custom-header", "value2")));
        assert_eq!(table.get(1), Some(("custom-header", "value1")));
    }

    #[test]
    fn eviction_drops_oldest_when_budget_exceeded() {
        let mut table = DynamicTable::new(64);
        table.add("a", "1111111111111111111111").unwrap(); // cost 23+32=... fits
        table.add("b", "2222222222222222222222").unwrap(); // forces eviction of "a"

        assert!(table.find("a", None).is_none());
        assert!(table.find("b", None).is_some());
    }

    #[test]
    fn oversized_entry_is_rejected_not_truncated() {
        let mut table = DynamicTable::new(DEFAULT_MAX_SIZE);
        let huge_value = "x".repeat(300);
        assert_eq!(table.add("name", &huge_value), Err(DynamicTableError::EntryTooLarge));
    }

    #[test]
    fn size_update_evicts_to_new_budget() {
        let mut table = DynamicTable::new(DEFAULT_MAX_SIZE);
        table.add("k1", "v1").unwrap();
        table.add("k2", "v2").unwrap();
        table.set_max_size(32);
        assert!(table.size() <= 32);
    }
}
