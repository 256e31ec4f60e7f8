use std::sync::LazyLock;

use regex::Regex;

use crate::models::Emotion;

pub const DEFAULT_EMOTION: Emotion = Emotion::Talking;

static EMOTION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[EMOTION:(idle|thinking|talking|surprised|greeting)\]")
        .expect("emotion tag pattern should compile")
});

static SUGGESTIONS_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[SUGGESTIONS:([^\]]+)\]").expect("suggestions tag pattern should compile")
});

static ANY_CONTROL_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*(EMOTION|SUGGESTIONS)\s*:[^\]]*\]")
        .expect("control tag pattern should compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub body: String,
    pub emotion: Emotion,
    pub suggestions: Vec<String>,
    pub has_emotion_tag: bool,
}

/// Splits raw model output into tag-free body, mood and suggestions. Never fails:
/// malformed tags are treated as absent.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let emotion = EMOTION_TAG
        .captures(raw)
        .and_then(|captures| Emotion::parse(&captures[1]));
    let suggestions = SUGGESTIONS_TAG
        .captures(raw)
        .map(|captures| {
            captures[1]
                .split('|')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    let without_emotion = EMOTION_TAG.replace_all(raw, "");
    let body = SUGGESTIONS_TAG.replace_all(&without_emotion, "");

    ParsedResponse {
        body: body.trim().to_string(),
        emotion: emotion.unwrap_or(DEFAULT_EMOTION),
        suggestions,
        has_emotion_tag: emotion.is_some(),
    }
}

/// Removes every control-like tag, well-formed or not.
pub fn strip_control_tags(text: &str) -> String {
    ANY_CONTROL_TAG.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::{parse_response, strip_control_tags};
    use crate::models::Emotion;

    #[test]
    fn parse_extracts_tags_and_trims_body() {
        let parsed = parse_response(
            "  この本はおすすめだよ！ [item::リーダブルコード::book-001]\n[EMOTION:greeting]\n[SUGGESTIONS:他には？| どんな内容？ ||最近読んだ本は？]  ",
        );

        assert_eq!(parsed.body, "この本はおすすめだよ！ [item::リーダブルコード::book-001]");
        assert_eq!(parsed.emotion, Emotion::Greeting);
        assert!(parsed.has_emotion_tag);
        assert_eq!(
            parsed.suggestions,
            vec!["他には？", "どんな内容？", "最近読んだ本は？"]
        );
    }

    #[test]
    fn missing_tags_use_defaults() {
        let parsed = parse_response("Just text.");
        assert_eq!(parsed.body, "Just text.");
        assert_eq!(parsed.emotion, Emotion::Talking);
        assert!(!parsed.has_emotion_tag);
        assert!(parsed.suggestions.is_empty());
    }

    #[test]
    fn malformed_tags_are_treated_as_absent() {
        let parsed = parse_response("Hi [EMOTION:furious] there [SUGGESTIONS:]");
        assert_eq!(parsed.emotion, Emotion::Talking);
        assert!(parsed.suggestions.is_empty());

        assert_eq!(strip_control_tags(&parsed.body), "Hi  there");
    }

    #[test]
    fn strip_control_tags_removes_leftovers_case_insensitively() {
        assert_eq!(
            strip_control_tags("Answer [emotion:happy] text [ SUGGESTIONS : a|b ]"),
            "Answer  text"
        );
    }
}
