/// What a reserved register number resolves to instead of a hardware read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// A fixed value, identical on every call
    Fixed(u64),
    /// The current monotonic tick count
    Timestamp,
}

/// Diagnostic register numbers that never reach the hardware
///
/// They prove the request path is wired end to end: two fixed patterns and
/// a time-varying value.
pub const DIAGNOSTIC_SENTINELS: &[(u32, Sentinel)] = &[
    (1, Sentinel::Fixed(0x1111_1111_1111_1111)),
    (2, Sentinel::Fixed(0x2222_2222_2222_2222)),
    (3, Sentinel::Timestamp),
];

/// Map from register number to sentinel behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelTable {
    entries: Vec<(u32, Sentinel)>,
}

impl SentinelTable {
    /// A table with no reserved numbers; every register goes to hardware
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Reserve `register`, replacing an existing entry for it
    pub fn with_entry(mut self, register: u32, sentinel: Sentinel) -> Self {
        self.entries.retain(|(reg, _)| *reg != register);
        self.entries.push((register, sentinel));
        self.entries.sort_unstable_by_key(|(reg, _)| *reg);
        self
    }

    pub fn lookup(&self, register: u32) -> Option<Sentinel> {
        self.entries
            .binary_search_by_key(&register, |(reg, _)| *reg)
            .ok()
            .map(|idx| self.entries[idx].1)
    }

    pub fn entries(&self) -> &[(u32, Sentinel)] {
        &self.entries
    }
}

impl Default for SentinelTable {
    fn default() -> Self {
        DIAGNOSTIC_SENTINELS
            .iter()
            .fold(Self::empty(), |table, &(reg, sentinel)| {
                table.with_entry(reg, sentinel)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = SentinelTable::default();
        assert_eq!(
            table.lookup(1),
            Some(Sentinel::Fixed(0x1111_1111_1111_1111))
        );
        assert_eq!(
            table.lookup(2),
            Some(Sentinel::Fixed(0x2222_2222_2222_2222))
        );
        assert_eq!(table.lookup(3), Some(Sentinel::Timestamp));
        assert_eq!(table.lookup(0), None);
        assert_eq!(table.lookup(4), None);
        assert_eq!(table.lookup(0x611), None);
        assert_eq!(table.entries().len(), 3);
    }

    #[test]
    fn test_with_entry_replaces_and_stays_sorted() {
        let table = SentinelTable::default()
            .with_entry(0x10, Sentinel::Fixed(7))
            .with_entry(2, Sentinel::Fixed(9));

        assert_eq!(table.lookup(2), Some(Sentinel::Fixed(9)));
        assert_eq!(table.lookup(0x10), Some(Sentinel::Fixed(7)));
        assert_eq!(table.entries().len(), 4);
        assert!(table.entries().windows(2).all(|w| w[0].0 < w[1].0));
    }
}
