use dexter_core::{compute_uid, Entry};
use std::collections::HashSet;
use thiserror::Error;

/// Maximum number of `" (n)"` suffixes tried before giving up on a record.
pub const MAX_UID_RETRIES: usize = 10;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ImportError {
    #[error("Could not assign a unique id to '{description}' on {date} after {max} suffixes", max = MAX_UID_RETRIES)]
    UidExhausted {
        description: String,
        date: chrono::NaiveDate,
    },
}

/// Outcome of de-duplicating one batch against the stored uids.
#[derive(Debug, Default)]
pub struct AssignedBatch {
    pub entries: Vec<Entry>,
    pub duplicates: Vec<Entry>,
    pub errors: Vec<ImportError>,
}

/// Assigns uids to imported entries.
///
/// A record whose uid is already stored is a duplicate of that record. Records
/// that collide with an earlier record of the same batch get a `" (n)"`
/// description suffix, so re-importing a file with identical lines is
/// idempotent.
pub struct UidAssigner {
    stored: HashSet<String>,
    claimed: HashSet<String>,
}

impl UidAssigner {
    pub fn new(stored: HashSet<String>) -> Self {
        Self {
            stored,
            claimed: HashSet::new(),
        }
    }

    pub fn assign(&mut self, entries: Vec<Entry>) -> AssignedBatch {
        let mut batch = AssignedBatch::default();
        for entry in entries {
            match self.assign_one(entry) {
                Ok(Assigned::New(entry)) => batch.entries.push(entry),
                Ok(Assigned::Duplicate(entry)) => {
                    tracing::debug!(uid = %entry.uid, "skipping existing entry {entry}");
                    batch.duplicates.push(entry);
                }
                Err(err) => {
                    tracing::warn!("{err}");
                    batch.errors.push(err);
                }
            }
        }
        batch
    }

    fn assign_one(&mut self, mut entry: Entry) -> Result<Assigned, ImportError> {
        let base = entry.description.clone();
        for n in 0..=MAX_UID_RETRIES {
            let description = if n == 0 {
                base.clone()
            } else {
                format!("{base} ({n})")
            };
            let uid = compute_uid(&entry.account, entry.date, entry.amount, &description);
            if self.claimed.contains(&uid) {
                continue;
            }
            self.claimed.insert(uid.clone());
            entry.description = description;
            entry.uid = uid;
            return Ok(if self.stored.contains(&entry.uid) {
                Assigned::Duplicate(entry)
            } else {
                Assigned::New(entry)
            });
        }
        Err(ImportError::UidExhausted {
            description: base,
            date: entry.date,
        })
    }
}

enum Assigned {
    New(Entry),
    Duplicate(Entry),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use dexter_core::{Column, Money};

    fn coffee() -> Entry {
        Entry::new(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            "STARBUCKS",
            "liabilities:visa",
            Column::Credit,
            Money::from_cents(550),
        )
        .unwrap()
    }

    #[test]
    fn identical_lines_get_suffixes() {
        let mut assigner = UidAssigner::new(HashSet::new());
        let batch = assigner.assign(vec![coffee(), coffee(), coffee()]);
        assert_eq!(batch.entries.len(), 3);
        assert_eq!(batch.entries[0].description, "STARBUCKS");
        assert_eq!(batch.entries[1].description, "STARBUCKS (1)");
        assert_eq!(batch.entries[2].description, "STARBUCKS (2)");
        let uids: HashSet<_> = batch.entries.iter().map(|e| e.uid.clone()).collect();
        assert_eq!(uids.len(), 3);
    }

    #[test]
    fn stored_uid_is_flagged_duplicate() {
        let stored: HashSet<String> = [coffee().uid].into_iter().collect();
        let mut assigner = UidAssigner::new(stored);
        let batch = assigner.assign(vec![coffee()]);
        assert!(batch.entries.is_empty());
        assert_eq!(batch.duplicates.len(), 1);
    }

    #[test]
    fn reimport_of_suffixed_batch_is_idempotent() {
        let mut first = UidAssigner::new(HashSet::new());
        let stored: HashSet<String> = first
            .assign(vec![coffee(), coffee()])
            .entries
            .into_iter()
            .map(|e| e.uid)
            .collect();

        let mut second = UidAssigner::new(stored);
        let batch = second.assign(vec![coffee(), coffee(), coffee()]);
        assert_eq!(batch.duplicates.len(), 2);
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].description, "STARBUCKS (2)");
    }

    #[test]
    fn retries_are_bounded() {
        let mut assigner = UidAssigner::new(HashSet::new());
        let batch = assigner.assign(vec![coffee(); MAX_UID_RETRIES + 2]);
        assert_eq!(batch.entries.len(), MAX_UID_RETRIES + 1);
        assert_eq!(batch.errors.len(), 1);
        assert!(matches!(batch.errors[0], ImportError::UidExhausted { .. }));
        let message = batch.errors[0].to_string();
        assert!(message.contains(&format!("after {MAX_UID_RETRIES} suffixes")), "{message}");
    }
}
