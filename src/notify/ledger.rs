//! Ledger of fired notifications

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::{NotificationRecord, TransitionType};

/// Append-only record of fired notifications, one per game and transition
#[derive(Debug, Default)]
pub struct NotificationLedger {
    records: DashMap<(String, TransitionType), NotificationRecord>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless one already exists for its key.
    /// Returns whether the record was added.
    pub fn try_insert(&self, record: NotificationRecord) -> bool {
        match self
            .records
            .entry((record.entity_id.clone(), record.transition))
        {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn get(&self, entity_id: &str, transition: TransitionType) -> Option<NotificationRecord> {
        self.records
            .get(&(entity_id.to_string(), transition))
            .map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
