use std::collections::VecDeque;

use crate::domain::MessageRecord;

/// Bounded record history retained for the UI collaborator.
///
/// The limit applies to everything ingested, hidden records included; it
/// never affects the pipeline itself. The limit is passed per push because
/// settings can change while the monitor is running.
#[derive(Debug, Default)]
pub struct MessageHistory {
    records: VecDeque<MessageRecord>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record, evicting the oldest entries beyond `limit`.
    /// A limit of zero is treated as one so the latest record survives.
    pub fn push(&mut self, record: MessageRecord, limit: usize) {
        self.records.push_back(record);
        let limit = limit.max(1);
        while self.records.len() > limit {
            self.records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageRecord> {
        self.records.iter()
    }
}
