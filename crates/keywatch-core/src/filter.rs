use crate::{config::Settings, domain::MessageRecord};

/// Annotates a record with keyword matches and visibility against one
/// settings snapshot, building a new record from the input.
///
/// Excluded messages are still keyword-matched so counts and logs stay
/// consistent; `visible = false` only suppresses display and sound.
pub fn apply(record: MessageRecord, settings: &Settings) -> MessageRecord {
    let matched_keywords = matched_keywords(&record.text, &settings.keywords);
    let visible = !settings.is_excluded(&record.chat_id);
    MessageRecord {
        matched_keywords,
        visible,
        ..record
    }
}

/// Case-insensitive substring test of each configured keyword against the
/// text. The result preserves the configured keyword order, not the order of
/// appearance in the text.
pub fn matched_keywords(text: &str, keywords: &[String]) -> Vec<String> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Channel, ChatId};
    use crate::normalize::normalize;
    use crate::testutil::raw_event;

    fn settings_with(keywords: &[&str], excluded: &[&str]) -> Settings {
        let mut settings = Settings::default();
        for k in keywords {
            settings.add_keyword(*k);
        }
        for id in excluded {
            settings.add_excluded_channel(Channel {
                name: format!("channel {id}"),
                id: ChatId::new(*id),
            });
        }
        settings
    }

    #[test]
    fn matches_preserve_configured_order() {
        let settings = settings_with(&["rocket", "shahed", "drone"], &[]);
        let record = apply(
            normalize(&raw_event(1, "Shahed drone and a rocket", "99")),
            &settings,
        );
        // Configured order, not the order the words appear in the text.
        assert_eq!(record.matched_keywords, vec!["rocket", "shahed", "drone"]);
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let settings = settings_with(&["ShaHed"], &[]);
        let record = apply(normalize(&raw_event(1, "SHAHED-136 spotted", "99")), &settings);
        assert_eq!(record.matched_keywords, vec!["ShaHed"]);

        let miss = apply(normalize(&raw_event(2, "all quiet", "99")), &settings);
        assert!(miss.matched_keywords.is_empty());
    }

    #[test]
    fn excluded_chat_is_hidden_but_still_matched() {
        let settings = settings_with(&["shahed"], &["42"]);
        let record = apply(normalize(&raw_event(1, "Shahed spotted", "42")), &settings);
        assert!(!record.visible);
        assert_eq!(record.matched_keywords, vec!["shahed"]);
    }

    #[test]
    fn non_excluded_chat_stays_visible() {
        let settings = settings_with(&["shahed"], &["42"]);
        let record = apply(normalize(&raw_event(1, "Shahed spotted", "99")), &settings);
        assert!(record.visible);
    }

    #[test]
    fn identical_input_yields_identical_output() {
        let settings = settings_with(&["alert"], &["42"]);
        let a = apply(normalize(&raw_event(1, "alert!", "42")), &settings);
        let b = apply(normalize(&raw_event(1, "alert!", "42")), &settings);
        assert_eq!(a.matched_keywords, b.matched_keywords);
        assert_eq!(a.visible, b.visible);
    }
}
