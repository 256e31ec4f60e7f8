use super::prompts::{exclusion_notice, language_directive, selected_item_context};
use crate::models::Language;

const SEGMENT_SEPARATOR: &str = "\n\n";

/// Pinned book as it should appear in the prompt. `notes` are already sanitized
/// and wrapped in the private-notes delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedItem {
    pub id: String,
    pub title: String,
    pub author: String,
    pub notes: String,
}

#[derive(Debug, Clone, Default)]
pub struct ContextOptions<'a> {
    pub language: Language,
    pub selected_item: Option<&'a SelectedItem>,
    pub prior_summary: Option<&'a str>,
    pub excluded_ids: &'a [String],
}

/// Builds the contextual user message. Segment order: exclusion notice, prior
/// conversation summary, selected item, language directive, user text.
pub fn build_message_context(user_text: &str, options: &ContextOptions<'_>) -> String {
    let mut segments = Vec::with_capacity(5);

    if !options.excluded_ids.is_empty() {
        segments.push(exclusion_notice(options.language, options.excluded_ids));
    }
    if let Some(summary) = options
        .prior_summary
        .map(str::trim)
        .filter(|summary| !summary.is_empty())
    {
        segments.push(summary.to_string());
    }
    if let Some(item) = options.selected_item {
        segments.push(selected_item_context(
            options.language,
            &item.title,
            &item.author,
            &item.id,
            &item.notes,
        ));
    }
    segments.push(language_directive(options.language).to_string());
    segments.push(user_text.to_string());

    segments.join(SEGMENT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::{ContextOptions, SelectedItem, build_message_context};
    use crate::models::Language;

    #[test]
    fn bare_message_gets_only_language_directive() {
        let prompt = build_message_context("hello", &ContextOptions::default());
        let segments = prompt.split("\n\n").collect::<Vec<_>>();

        assert_eq!(segments.len(), 2);
        assert!(segments[0].starts_with("[Language instruction:"));
        assert_eq!(segments[1], "hello");
    }

    #[test]
    fn segments_follow_fixed_order() {
        let item = SelectedItem {
            id: "book-001".to_string(),
            title: "リーダブルコード".to_string(),
            author: "Dustin Boswell".to_string(),
            notes: "<private_notes>名前が大事</private_notes>".to_string(),
        };
        let excluded = vec!["book-002".to_string()];
        let summary = "[Recent conversation]\nUser: hi\nAssistant: hello";
        let prompt = build_message_context(
            "この本どう？",
            &ContextOptions {
                language: Language::Ja,
                selected_item: Some(&item),
                prior_summary: Some(summary),
                excluded_ids: &excluded,
            },
        );

        let exclusion = prompt.find("[重要:").expect("exclusion notice");
        let recent = prompt.find("[Recent conversation]").expect("summary");
        let selected = prompt.find("【選択中の本").expect("selected item");
        let language = prompt.find("[言語指定:").expect("language directive");
        let message = prompt.rfind("この本どう？").expect("user text");

        assert!(exclusion < recent);
        assert!(recent < selected);
        assert!(selected < language);
        assert!(language < message);
        assert!(prompt.contains("[item::リーダブルコード::book-001]（Dustin Boswell著）"));
        assert!(prompt.ends_with("この本どう？"));
    }

    #[test]
    fn blank_summary_is_skipped() {
        let prompt = build_message_context(
            "hi",
            &ContextOptions {
                prior_summary: Some("   "),
                ..ContextOptions::default()
            },
        );
        assert_eq!(prompt.split("\n\n").count(), 2);
    }
}
