//! Wake phrase detection on the live transcript stream
//!
//! Matching is whole-word on a normalized form of the text (lower case,
//! ASCII-folded, punctuation stripped), so "ia" fires on "Oi, IA!" but
//! never on "dia".

use tracing::debug;

use crate::recognition::TranscriptEvent;

/// Sensitivity at or above which interim results are scanned too
pub const PARTIAL_SCAN_THRESHOLD: f32 = 0.5;

/// Phrases used when none are configured
pub const DEFAULT_PHRASES: [&str; 3] = ["ia", "hey ia", "oi ia"];

/// A wake phrase found in the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeMatch {
    /// The configured phrase that matched
    pub phrase: String,
    /// Transcript the phrase was found in
    pub transcript: String,
    /// Words spoken after the phrase in the same final utterance
    pub remainder: Option<String>,
}

/// Scans transcripts for the configured wake phrases
pub struct WakeWordDetector {
    /// Tokenized phrases, longest first
    phrases: Vec<Vec<String>>,
}

/// A normalized word and the raw whitespace token it came from
struct Word {
    text: String,
    token: usize,
}

impl WakeWordDetector {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tokenized: Vec<Vec<String>> = phrases
            .into_iter()
            .map(|p| normalize(p.as_ref()).split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect())
            .filter(|words: &Vec<String>| !words.is_empty())
            .collect();

        if tokenized.is_empty() {
            return Self::new(DEFAULT_PHRASES);
        }

        tokenized.sort_by(|a, b| b.len().cmp(&a.len()));
        tokenized.dedup();

        Self { phrases: tokenized }
    }

    /// Feed one transcript event; returns a match if the wake phrase is heard
    pub fn observe(&self, event: &TranscriptEvent, sensitivity: f32) -> Option<WakeMatch> {
        let scan = event.is_final || sensitivity >= PARTIAL_SCAN_THRESHOLD;
        let found = if scan { self.find(&event.text) } else { None };

        let (phrase, end, words, tokens) = found?;
        let remainder = if event.is_final {
            remainder_after(&tokens, &words, end)
        } else {
            None
        };

        debug!(phrase = %phrase, is_final = event.is_final, "wake phrase matched");
        Some(WakeMatch {
            phrase,
            transcript: event.text.clone(),
            remainder,
        })
    }

    /// Strip a leading wake phrase from a command utterance
    pub fn strip_wake_phrase(&self, text: &str) -> String {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let words = words(&tokens);

        for phrase in &self.phrases {
            if starts_with(&words, 0, phrase) {
                return remainder_after(&tokens, &words, phrase.len()).unwrap_or_default();
            }
        }
        text.trim().to_string()
    }

    fn find<'a>(&self, text: &'a str) -> Option<(String, usize, Vec<Word>, Vec<&'a str>)> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let words = words(&tokens);

        for phrase in &self.phrases {
            for start in 0..words.len() {
                if starts_with(&words, start, phrase) {
                    return Some((phrase.join(" "), start + phrase.len(), words, tokens));
                }
            }
        }
        None
    }
}

fn words(tokens: &[&str]) -> Vec<Word> {
    tokens
        .iter()
        .enumerate()
        .flat_map(|(token, raw)| {
            normalize(raw)
                .split(' ')
                .filter(|w| !w.is_empty())
                .map(|w| Word {
                    text: w.to_string(),
                    token,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn starts_with(words: &[Word], start: usize, phrase: &[String]) -> bool {
    words.len() >= start + phrase.len()
        && words[start..start + phrase.len()]
            .iter()
            .zip(phrase)
            .all(|(word, expected)| word.text == *expected)
}

/// Raw text following the word at `end - 1`
fn remainder_after(tokens: &[&str], words: &[Word], end: usize) -> Option<String> {
    let last_token = words.get(end.checked_sub(1)?)?.token;
    let rest = tokens[last_token + 1..].join(" ");
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Lower-case, ASCII-fold, replace punctuation with spaces and collapse
/// whitespace
pub fn normalize(text: &str) -> String {
    let folded = deunicode::deunicode(text).to_lowercase();
    let spaced: String = folded
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}
