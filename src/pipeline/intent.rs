//! Intent classification: maps weak signals (file extension, free-text task
//! description, optionally the leading bytes of the upload) to a modality.
//!
//! Keyword + extension agreement wins first; extension alone is the fallback;
//! `Unknown` is a normal answer, not an error.

use super::types::{file_extension, ModalityTag};

// ──────────────────────────────────────────────
// Extension sets
// ──────────────────────────────────────────────

const ECG_EXTENSIONS: &[&str] = &["csv", "txt"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];
const TABULAR_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf"];

// ──────────────────────────────────────────────
// Keyword sets (Russian + English)
// ──────────────────────────────────────────────

/// Keywords up to this many characters must match a whole word ("кт" must
/// not fire inside "доктор"). Longer keywords match as stems.
const SHORT_KEYWORD_CHARS: usize = 3;

const ECG_KEYWORDS: &[&str] = &[
    "экг", "ecg", "ekg", "кардио", "сердце", "сердц", "ритм", "пульс", "cardio", "heart",
    "rhythm", "pulse",
];

const IMAGE_KEYWORDS: &[&str] = &[
    "рентген", "узи", "томография", "томограф", "кт", "мрт", "снимок", "флюорограф", "xray",
    "x-ray", "ultrasound", "ct", "mri", "radiograph", "tomography",
];

const LAB_KEYWORDS: &[&str] = &[
    "анализ", "кровь", "крови", "lab", "тест", "биохимия", "биохими", "гемоглобин", "глюкоз",
    "мочи", "blood", "test", "panel", "biochem",
];

const DOCUMENT_KEYWORDS: &[&str] = &[
    "документ", "текст", "выписка", "выписк", "диагноз", "ocr", "заключени", "справк",
    "document", "discharge", "diagnosis",
];

// ──────────────────────────────────────────────
// Classification
// ──────────────────────────────────────────────

/// Classify a task from its description and file name.
///
/// Pure and deterministic: identical inputs always give the same tag.
pub fn classify(description: &str, file_name: &str) -> ModalityTag {
    classify_extension(description, file_extension(file_name).as_deref())
}

/// Like [`classify`], but falls back to sniffing `content` when the file name
/// carries no extension at all. A foreign extension stays foreign.
pub fn classify_with_hint(description: &str, file_name: &str, content: Option<&[u8]>) -> ModalityTag {
    let extension = resolve_extension(file_name, content);
    classify_extension(description, extension.as_deref())
}

/// The file name's extension when it has one, otherwise whatever the content
/// sniffs as.
pub fn resolve_extension(file_name: &str, content: Option<&[u8]>) -> Option<String> {
    match (file_extension(file_name), content) {
        (Some(ext), _) => Some(ext),
        (None, Some(bytes)) => sniff_extension(bytes).map(str::to_string),
        (None, None) => None,
    }
}

fn classify_extension(description: &str, extension: Option<&str>) -> ModalityTag {
    let text = description.to_lowercase();
    let words = tokenize(&text);
    let ext = extension.unwrap_or("");
    let has = |keywords: &[&str]| mentions_any(&text, &words, keywords);

    if ECG_EXTENSIONS.contains(&ext) && has(ECG_KEYWORDS) {
        return ModalityTag::Ecg;
    }
    if IMAGE_EXTENSIONS.contains(&ext) && has(IMAGE_KEYWORDS) {
        return ModalityTag::Image;
    }
    if TABULAR_EXTENSIONS.contains(&ext) && has(LAB_KEYWORDS) {
        return ModalityTag::Lab;
    }
    if (DOCUMENT_EXTENSIONS.contains(&ext) || IMAGE_EXTENSIONS.contains(&ext))
        && has(DOCUMENT_KEYWORDS)
    {
        return ModalityTag::Document;
    }

    // Extension-only fallback, in fixed precedence.
    if ECG_EXTENSIONS.contains(&ext) {
        ModalityTag::Ecg
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        ModalityTag::Image
    } else if TABULAR_EXTENSIONS.contains(&ext) {
        ModalityTag::Lab
    } else if DOCUMENT_EXTENSIONS.contains(&ext) {
        ModalityTag::Document
    } else {
        ModalityTag::Unknown
    }
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn mentions_any(text: &str, words: &[&str], keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| {
        if keyword.chars().count() <= SHORT_KEYWORD_CHARS {
            words.contains(keyword)
        } else {
            text.contains(keyword)
        }
    })
}

// ──────────────────────────────────────────────
// Content sniffing
// ──────────────────────────────────────────────

/// Guess a file extension from magic bytes. Extensions can be missing or
/// wrong on uploads; the first bytes rarely are.
pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x25, 0x50, 0x44, 0x46, ..] => Some("pdf"),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("jpg"),
        // BMP: "BM", then size, then four reserved zero bytes.
        [0x42, 0x4D, _, _, _, _, 0, 0, 0, 0, ..] => Some("bmp"),
        [0x50, 0x4B, 0x03, 0x04, ..] if is_xlsx_container(bytes) => Some("xlsx"),
        [0x50, 0x4B, 0x03, 0x04, ..] => None,
        [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, ..] => Some("xls"),
        _ if is_likely_text(bytes) => {
            let first_line = String::from_utf8_lossy(bytes);
            let first_line = first_line.lines().next().unwrap_or("");
            if first_line.contains(',') || first_line.contains(';') {
                Some("csv")
            } else {
                Some("txt")
            }
        }
        _ => None,
    }
}

/// OOXML workbooks store their parts under `xl/`; docx (`word/`), odt and
/// plain zips do not.
fn is_xlsx_container(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(8192)];
    head.windows(3).any(|w| w == b"xl/")
}

/// Valid UTF-8 in the first 4 KiB and at least 80% printable.
fn is_likely_text(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(4096)];
    if head.is_empty() {
        return false;
    }
    let text = match std::str::from_utf8(head) {
        Ok(t) => t,
        // A multi-byte character may straddle the 4 KiB cut.
        Err(e) if e.valid_up_to() > 0 && head.len() - e.valid_up_to() < 4 => {
            match std::str::from_utf8(&head[..e.valid_up_to()]) {
                Ok(t) => t,
                Err(_) => return false,
            }
        }
        Err(_) => return false,
    };
    let total = text.chars().count().max(1);
    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .count();
    printable as f64 / total as f64 > 0.80
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
