use crate::domain::{MessageRecord, RawMessageEvent};

pub const UNKNOWN_SENDER: &str = "Unknown";
pub const UNKNOWN_CHAT: &str = "Unknown Chat";

/// Maps a raw platform event to a canonical record.
///
/// Filtering happens downstream: the record starts unmatched and visible.
/// Text passes through untouched; truncation and escaping are display
/// concerns that belong to the UI collaborator.
pub fn normalize(raw: &RawMessageEvent) -> MessageRecord {
    MessageRecord {
        id: raw.id,
        text: raw.text.clone(),
        sender_label: label_or(raw.sender.as_deref(), UNKNOWN_SENDER),
        chat_label: label_or(raw.chat_title.as_deref(), UNKNOWN_CHAT),
        chat_id: raw.chat_id.clone(),
        timestamp: raw.timestamp,
        matched_keywords: Vec::new(),
        visible: true,
    }
}

fn label_or(value: Option<&str>, fallback: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.to_string(),
        _ => fallback.to_string(),
    }
}
