use std::path::Path;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

const NEUTRALIZE_OPEN: char = '【';
const NEUTRALIZE_CLOSE: char = '】';
const PRIVATE_NOTES_OPEN: &str = "<private_notes>";
const PRIVATE_NOTES_CLOSE: &str = "</private_notes>";

const BASELINE_INJECTION: &[&str] = &[
    r"ignore\s+(all\s+|any\s+)?(the\s+)?(previous|prior|above)\s+(instructions?|prompts?|rules?)",
    r"(disregard|override|forget)\s+.{0,24}(instructions?|system\s*prompt|rules)",
    r"(reveal|show|print|repeat|output)\s+.{0,24}(system\s*prompt|your\s+instructions|initial\s+prompt)",
    r"you\s+are\s+now\s+",
    r"\bjailbreak\b|\bdan\s+mode\b|developer\s+mode",
    r"(以前|前|上記)の(指示|命令|プロンプト)を(無視|忘れ)",
    r"システムプロンプト",
    r"脱獄",
];

const BASELINE_INSTRUCTION: &[&str] = &[
    r"ignore\s+(all\s+)?(the\s+)?(previous|prior|above)\s+\w+",
    r"you\s+are\s+now\b",
    r"(^|\n)\s*(system|assistant|user)\s*:",
    r"(respond|answer|reply)\s+only\s+(in|with)\b[^.\n]{0,40}",
    r"</?\s*(private_notes|system|instructions?)\s*>",
    r"\[\s*(emotion|suggestions)\s*:[^\]]*\]",
    r"(以前|前|上記)の(指示|命令)を無視[^。\n]{0,20}",
    r"あなたは(今から|これから)",
];

const BASELINE_LEAK_PATTERNS: &[&str] = &[
    r"system\s*prompt",
    r"my\s+(instructions|rules)\s+(are|say)",
    r"</?private_notes>",
    r"\bsk-[a-z0-9_-]{16,}",
    r"システムプロンプト",
];

const BASELINE_LEAK_KEYWORDS: &[&str] = &[
    "openrouter_api_key",
    "recent_conversation",
    "search_books",
    "get_book_details",
    "get_reading_stats",
    "get_owner_info",
    "crates/shared",
];

const BASELINE_ECHO_PHRASES: &[&str] = &[
    "ignore previous",
    "ignore all previous",
    "jailbreak",
    "developer mode",
    "you are now",
    "脱獄",
    "指示を無視",
];

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("failed to read signature file {path}: {message}")]
    Read { path: String, message: String },
    #[error("signature file {path} is not valid json: {message}")]
    Parse { path: String, message: String },
    #[error("invalid {category} signature '{pattern}': {message}")]
    InvalidPattern {
        category: &'static str,
        pattern: String,
        message: String,
    },
}

/// On-disk signature library. Every category is optional; absent categories
/// keep the built-in baseline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignatureFile {
    #[serde(default)]
    pub injection: Option<Vec<String>>,
    #[serde(default)]
    pub instruction: Option<Vec<String>>,
    #[serde(default)]
    pub leak_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub leak_keywords: Option<Vec<String>>,
    #[serde(default)]
    pub echo_phrases: Option<Vec<String>>,
}

/// Compiled detection signatures shared by the gate, sanitizer and leak validator.
#[derive(Debug, Clone)]
pub struct SignatureSet {
    pub injection: Vec<Regex>,
    pub instruction: Vec<Regex>,
    pub leak_patterns: Vec<Regex>,
    pub leak_keywords: Vec<String>,
    pub echo_phrases: Vec<String>,
}

impl SignatureSet {
    pub fn baseline() -> Self {
        Self::from_signature_file(SignatureFile::default())
            .expect("baseline signatures should compile")
    }

    pub fn load(path: &Path) -> Result<Self, SignatureError> {
        let raw = std::fs::read_to_string(path).map_err(|err| SignatureError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let file =
            serde_json::from_str::<SignatureFile>(&raw).map_err(|err| SignatureError::Parse {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        Self::from_signature_file(file)
    }

    pub fn from_signature_file(file: SignatureFile) -> Result<Self, SignatureError> {
        Ok(Self {
            injection: compile_category("injection", file.injection, BASELINE_INJECTION)?,
            instruction: compile_category("instruction", file.instruction, BASELINE_INSTRUCTION)?,
            leak_patterns: compile_category(
                "leak_patterns",
                file.leak_patterns,
                BASELINE_LEAK_PATTERNS,
            )?,
            leak_keywords: lowercase_category(file.leak_keywords, BASELINE_LEAK_KEYWORDS),
            echo_phrases: lowercase_category(file.echo_phrases, BASELINE_ECHO_PHRASES),
        })
    }
}

fn compile_category(
    category: &'static str,
    configured: Option<Vec<String>>,
    baseline: &[&str],
) -> Result<Vec<Regex>, SignatureError> {
    let sources = configured
        .unwrap_or_else(|| baseline.iter().map(|pattern| (*pattern).to_string()).collect());

    sources
        .into_iter()
        .filter(|pattern| !pattern.trim().is_empty())
        .map(|pattern| {
            RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|err| SignatureError::InvalidPattern {
                    category,
                    pattern: pattern.clone(),
                    message: err.to_string(),
                })
        })
        .collect()
}

fn lowercase_category(configured: Option<Vec<String>>, baseline: &[&str]) -> Vec<String> {
    configured
        .unwrap_or_else(|| baseline.iter().map(|entry| (*entry).to_string()).collect())
        .into_iter()
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Canonical NFC form of user text, so lookalike compositions cannot slip past the gate.
pub fn normalize_message(raw: &str) -> String {
    raw.nfc().collect()
}

pub fn char_count(value: &str) -> usize {
    value.chars().count()
}

#[derive(Debug, Clone)]
pub struct InjectionGate {
    signatures: Arc<SignatureSet>,
}

impl InjectionGate {
    pub fn new(signatures: Arc<SignatureSet>) -> Self {
        Self { signatures }
    }

    /// True when the canonical message matches any injection signature.
    pub fn is_injection_attempt(&self, normalized_message: &str) -> bool {
        let matched = self
            .signatures
            .injection
            .iter()
            .any(|pattern| pattern.is_match(normalized_message));
        if matched {
            warn!(
                message_chars = char_count(normalized_message),
                "injection attempt blocked before model call"
            );
        }
        matched
    }
}

/// Neutralizes instruction-like spans in externally authored text by wrapping
/// them in `【】`. Content is never removed.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    signatures: Arc<SignatureSet>,
}

impl Sanitizer {
    pub fn new(signatures: Arc<SignatureSet>) -> Self {
        Self { signatures }
    }

    pub fn sanitize(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        // Patterns run on the bracket-free text; existing regions join the matches.
        let Neutralized { plain, regions } = split_neutralized(text);
        let mut spans = self
            .signatures
            .instruction
            .iter()
            .flat_map(|pattern| pattern.find_iter(&plain))
            .flat_map(|found| bracket_free_pieces(&plain, found.start(), found.end()))
            .collect::<Vec<_>>();
        if spans.is_empty() {
            return text.to_string();
        }
        spans.extend(regions);
        spans.sort_unstable();

        let mut output = String::with_capacity(plain.len() + spans.len() * 6);
        let mut cursor = 0;
        for (start, end) in merge_spans(spans) {
            output.push_str(&plain[cursor..start]);
            output.push(NEUTRALIZE_OPEN);
            output.push_str(&plain[start..end]);
            output.push(NEUTRALIZE_CLOSE);
            cursor = end;
        }
        output.push_str(&plain[cursor..]);
        output
    }

    /// Sanitized notes enclosed in the private-notes delimiter the system prompt refers to.
    pub fn private_notes(&self, notes: &str) -> String {
        format!(
            "{PRIVATE_NOTES_OPEN}{}{PRIVATE_NOTES_CLOSE}",
            self.sanitize(notes)
        )
    }
}

fn merge_spans(sorted: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(sorted.len());
    for (start, end) in sorted {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Byte ranges of existing `【…】` regions, brackets included. A region never
/// contains another bracket character.
fn neutralized_regions(text: &str) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    let mut open_at = None;
    for (index, ch) in text.char_indices() {
        if ch == NEUTRALIZE_OPEN {
            open_at = Some(index);
        } else if ch == NEUTRALIZE_CLOSE
            && let Some(start) = open_at.take()
        {
            regions.push((start, index + ch.len_utf8()));
        }
    }
    regions
}

struct Neutralized {
    /// Text with the paired brackets removed. Unpaired brackets stay as content.
    plain: String,
    /// Former region interiors, as byte ranges of `plain`.
    regions: Vec<(usize, usize)>,
}

fn split_neutralized(text: &str) -> Neutralized {
    let mut plain = String::with_capacity(text.len());
    let mut regions = Vec::new();
    let mut cursor = 0;
    for (start, end) in neutralized_regions(text) {
        plain.push_str(&text[cursor..start]);
        let region_start = plain.len();
        plain.push_str(&text[start + NEUTRALIZE_OPEN.len_utf8()..end - NEUTRALIZE_CLOSE.len_utf8()]);
        regions.push((region_start, plain.len()));
        cursor = end;
    }
    plain.push_str(&text[cursor..]);
    Neutralized { plain, regions }
}

/// Splits a match around stray bracket characters so no wrapped span contains one.
fn bracket_free_pieces(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut piece_start = start;
    for (offset, ch) in text[start..end].char_indices() {
        if ch == NEUTRALIZE_OPEN || ch == NEUTRALIZE_CLOSE {
            let at = start + offset;
            if piece_start < at {
                pieces.push((piece_start, at));
            }
            piece_start = at + ch.len_utf8();
        }
    }
    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}
