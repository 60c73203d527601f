use std::collections::HashMap;

use rand::{Rng, SeedableRng, distributions::Alphanumeric, rngs::SmallRng};

/// Default correlation-id length in characters.
pub const CORRELATION_ID_LEN: usize = 8;

/// Generate a random alphanumeric correlation token.
///
/// The token space is small by design; uniqueness against in-flight
/// requests is enforced at insertion time by [`PendingTable::insert`].
pub fn correlation_id(len: usize) -> String {
    let rng = SmallRng::from_entropy();
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Outcome of registering a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingInsertOutcome {
    /// Entry was created; caller should initiate the outbound send.
    Inserted,
    /// An in-flight entry already holds this id; caller must pick another.
    DuplicateId,
}

/// Table of in-flight requests awaiting a correlated response.
///
/// Owned exclusively by the session actor, so completion, rejection and
/// timeout race only through the actor mailbox: whichever message arrives
/// first removes the entry, and the losers see a miss.
#[derive(Debug, Default)]
pub struct PendingTable<W> {
    entries: HashMap<String, W>,
}

impl<W> PendingTable<W> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Register a waiter under `id`, refusing duplicates so the table never
    /// holds two entries with the same id.
    pub fn insert(&mut self, id: String, waiter: W) -> PendingInsertOutcome {
        if self.entries.contains_key(&id) {
            return PendingInsertOutcome::DuplicateId;
        }
        self.entries.insert(id, waiter);
        PendingInsertOutcome::Inserted
    }

    /// Remove and return the waiter for `id`.
    ///
    /// A miss means the entry was already completed or timed out; callers
    /// treat that as a silent no-op.
    pub fn complete(&mut self, id: &str) -> Option<W> {
        self.entries.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_alphanumeric_with_requested_length() {
        for len in [1usize, 8, 24] {
            let id = correlation_id(len);
            assert_eq!(id.len(), len);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn insert_rejects_duplicate_ids_without_clobbering() {
        let mut table = PendingTable::<u32>::new();
        assert_eq!(
            table.insert("a1".into(), 10),
            PendingInsertOutcome::Inserted
        );
        assert_eq!(
            table.insert("a1".into(), 11),
            PendingInsertOutcome::DuplicateId
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.complete("a1"), Some(10));
    }

    #[test]
    fn completion_removes_the_entry_and_later_lookups_miss() {
        let mut table = PendingTable::<u32>::new();
        table.insert("r1".into(), 1);
        table.insert("r2".into(), 2);

        assert_eq!(table.complete("r1"), Some(1));
        assert_eq!(table.complete("r1"), None);
        assert!(!table.contains("r1"));
        assert!(table.contains("r2"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_ids_miss_silently() {
        let mut table = PendingTable::<u32>::new();
        assert_eq!(table.complete("nope"), None);
        assert!(table.is_empty());
    }
}
