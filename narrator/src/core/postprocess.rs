//! Cleanup of raw generated text into speech-synthesis-ready prose.
//!
//! Every step is idempotent, so `post_process(post_process(x)) == post_process(x)`.
//! Hash marks are removed wherever they appear, so rewrapping can never move
//! one to the start of a line where it would read as a heading.

use regex::Regex;
use std::sync::LazyLock;

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\[.*?\]").unwrap());
static STAGE_DIRECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\*.*?\*").unwrap());
static HASH_MARKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#+").unwrap());
static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());
static HORIZONTAL_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

const TERMINATORS: [char; 3] = ['.', '!', '?'];
const CLOSERS: [char; 6] = ['"', '\'', ')', '\u{201D}', '\u{2019}', ']'];

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Splits text into sentences: runs of text up to and including a run of
/// terminators (plus any closing quotes right after it). Trailing text with no
/// terminator becomes the last element. Whitespace-only pieces are dropped and
/// nothing else is lost.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !TERMINATORS.contains(&c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, n)) = chars.peek() {
            if TERMINATORS.contains(&n) || CLOSERS.contains(&n) {
                end = j + n.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        sentences.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

pub fn is_terminated(sentence: &str) -> bool {
    sentence
        .trim_end()
        .trim_end_matches(CLOSERS)
        .ends_with(TERMINATORS)
}

fn normalize_paragraph(paragraph: &str) -> String {
    paragraph
        .lines()
        .map(|line| HORIZONTAL_SPACE.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Packs whole sentences greedily into paragraphs of at most `max_words`.
/// A sentence longer than the cap is kept whole as its own paragraph.
fn rewrap(paragraph: &str, max_words: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0;

    for sentence in split_sentences(paragraph) {
        let sentence = sentence.trim();
        let words = word_count(sentence);
        if !current.is_empty() && current_words + words > max_words {
            out.push(current.join(" "));
            current.clear();
            current_words = 0;
        }
        current.push(sentence);
        current_words += words;
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

pub fn post_process(raw: &str, max_paragraph_words: usize) -> String {
    let text = BRACKETED.replace_all(raw, "");
    let text = STAGE_DIRECTION.replace_all(&text, "");
    let text = HASH_MARKS.replace_all(&text, " ");
    let text = text.replace('!', ".");

    let mut paragraphs = Vec::new();
    for paragraph in PARAGRAPH_BREAK.split(&text) {
        let paragraph = normalize_paragraph(paragraph);
        if paragraph.is_empty() {
            continue;
        }
        if word_count(&paragraph) > max_paragraph_words {
            paragraphs.extend(rewrap(&paragraph, max_paragraph_words));
        } else {
            paragraphs.push(paragraph);
        }
    }

    paragraphs.join("\n\n").trim().to_string()
}
