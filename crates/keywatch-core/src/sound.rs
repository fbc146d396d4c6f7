use crate::domain::{MessageRecord, SoundMapping};

/// Picks the notification sound for a record.
///
/// `None` means silence: hidden records and records without keyword matches
/// never make a sound. Otherwise mappings are scanned in configured order and
/// the first *enabled* one whose keyword set intersects the record's matched
/// keywords wins; a disabled mapping is transparent, as if absent. When no
/// mapping matches, the configured default sound is used.
pub fn resolve(
    record: &MessageRecord,
    mappings: &[SoundMapping],
    default_sound: &str,
) -> Option<String> {
    if !record.visible || record.matched_keywords.is_empty() {
        return None;
    }

    for mapping in mappings {
        if !mapping.enabled {
            continue;
        }
        if intersects(&mapping.keywords, &record.matched_keywords) {
            return Some(mapping.sound_file.clone());
        }
    }

    Some(default_sound.to_string())
}

fn intersects(mapping_keywords: &[String], matched: &[String]) -> bool {
    mapping_keywords
        .iter()
        .any(|mk| matched.iter().any(|m| m.to_lowercase() == mk.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatId;
    use chrono::Utc;

    fn record(matched: &[&str], visible: bool) -> MessageRecord {
        MessageRecord {
            id: 1,
            text: "text".to_string(),
            sender_label: "alice".to_string(),
            chat_label: "Alerts".to_string(),
            chat_id: ChatId::new("99"),
            timestamp: Utc::now(),
            matched_keywords: matched.iter().map(|s| s.to_string()).collect(),
            visible,
        }
    }

    fn mapping(keywords: &[&str], sound: &str, enabled: bool) -> SoundMapping {
        SoundMapping {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            sound_file: sound.to_string(),
            enabled,
        }
    }

    #[test]
    fn first_enabled_intersecting_mapping_wins() {
        let mappings = [mapping(&["a"], "x.mp3", true), mapping(&["a"], "y.mp3", true)];
        let sound = resolve(&record(&["a"], true), &mappings, "beep.mp3");
        assert_eq!(sound.as_deref(), Some("x.mp3"));
    }

    #[test]
    fn disabled_mapping_is_skipped_not_a_stop() {
        let mappings = [
            mapping(&["a"], "x.mp3", false),
            mapping(&["a"], "y.mp3", true),
        ];
        let sound = resolve(&record(&["a"], true), &mappings, "beep.mp3");
        assert_eq!(sound.as_deref(), Some("y.mp3"));
    }

    #[test]
    fn no_matched_keywords_means_silence_even_with_mappings() {
        let mappings = [mapping(&["a"], "x.mp3", true)];
        assert_eq!(resolve(&record(&[], true), &mappings, "beep.mp3"), None);
    }

    #[test]
    fn hidden_record_is_silent() {
        let mappings = [mapping(&["a"], "x.mp3", true)];
        assert_eq!(resolve(&record(&["a"], false), &mappings, "beep.mp3"), None);
    }

    #[test]
    fn unmatched_mappings_fall_back_to_default() {
        let mappings = [mapping(&["other"], "x.mp3", true)];
        let sound = resolve(&record(&["a"], true), &mappings, "beep.mp3");
        assert_eq!(sound.as_deref(), Some("beep.mp3"));
    }

    #[test]
    fn intersection_is_case_insensitive() {
        let mappings = [mapping(&["Shahed"], "siren.mp3", true)];
        let sound = resolve(&record(&["shahed"], true), &mappings, "beep.mp3");
        assert_eq!(sound.as_deref(), Some("siren.mp3"));
    }
}
