//! Histogram of sensitive values inside one equivalence class.

/// Sparse frequency table, sorted by value code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Distribution {
    entries: Vec<(u32, u32)>,
}

impl Distribution {
    /// Empty histogram.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds a histogram from `(code, frequency)` pairs.
    #[must_use]
    pub fn from_entries(mut entries: Vec<(u32, u32)>) -> Self {
        entries.sort_unstable_by_key(|(code, _)| *code);
        entries.dedup_by(|b, a| {
            if a.0 == b.0 {
                a.1 = a.1.saturating_add(b.1);
                true
            } else {
                false
            }
        });
        Self { entries }
    }

    /// Adds one occurrence of `code`.
    pub fn add(&mut self, code: u32) {
        self.add_many(code, 1);
    }

    fn add_many(&mut self, code: u32, frequency: u32) {
        match self.entries.binary_search_by_key(&code, |(c, _)| *c) {
            Ok(pos) => self.entries[pos].1 = self.entries[pos].1.saturating_add(frequency),
            Err(pos) => self.entries.insert(pos, (code, frequency)),
        }
    }

    /// Adds every entry of `other`.
    pub fn merge(&mut self, other: &Self) {
        for (code, frequency) in &other.entries {
            self.add_many(*code, *frequency);
        }
    }

    /// Number of distinct values.
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.entries.len()
    }

    /// Sum of frequencies.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, f)| u64::from(*f)).sum()
    }

    /// `(code, frequency)` pairs in code order.
    #[must_use]
    pub fn entries(&self) -> &[(u32, u32)] {
        &self.entries
    }

    /// Frequencies sorted in descending order.
    #[must_use]
    pub fn frequencies_desc(&self) -> Vec<u32> {
        let mut f: Vec<u32> = self.entries.iter().map(|(_, f)| *f).collect();
        f.sort_unstable_by(|a, b| b.cmp(a));
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_merge_keep_order() {
        let mut a = Distribution::new();
        a.add(5);
        a.add(1);
        a.add(5);
        let b = Distribution::from_entries(vec![(3, 2), (1, 1)]);
        a.merge(&b);
        assert_eq!(a.entries(), &[(1, 2), (3, 2), (5, 2)]);
        assert_eq!(a.total(), 6);
        assert_eq!(a.distinct(), 3);
    }

    #[test]
    fn from_entries_collapses_duplicates() {
        let d = Distribution::from_entries(vec![(2, 1), (2, 4), (0, 1)]);
        assert_eq!(d.entries(), &[(0, 1), (2, 5)]);
        assert_eq!(d.frequencies_desc(), vec![5, 1]);
    }
}
