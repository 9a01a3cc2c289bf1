//! Recognizer output cleanup: filler trimming, assistant-name detection, and the
//! speech-safe rendering of replies.

use std::sync::LazyLock;

use regex::Regex;

use crate::{similarity, truncate_chars};

const EDGE_FILLERS: &[&str] = &["has", "the", "uh", "um", "uhh", "huh", "yeah", "okay", "ok"];
const NAME_SIMILARITY: f64 = 0.78;
const HUD_MAX_CHARS: usize = 500;

/// Lower-case, collapse whitespace, and drop one filler word from each edge.
pub(crate) fn clean_transcript(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();
    if let Some(first) = tokens.first().copied() {
        let keep = first == "the"
            && tokens
                .get(1)
                .is_some_and(|next| matches!(*next, "time" | "weather" | "news"));
        if EDGE_FILLERS.contains(&first) && !keep {
            tokens.remove(0);
        }
    }
    if let Some(last) = tokens.last() {
        if EDGE_FILLERS.contains(last) {
            tokens.pop();
        }
    }
    tokens.join(" ")
}

pub(crate) fn normalize_quotes(text: &str) -> String {
    text.replace(['\u{2019}', '\u{2018}'], "'")
}

/// True when any alias appears, or some word is a near miss of the primary name.
pub(crate) fn contains_name(text: &str, names: &[String]) -> bool {
    let low = text.to_lowercase();
    if names.iter().any(|alias| !alias.is_empty() && low.contains(alias.as_str())) {
        return true;
    }
    let Some(primary) = names.first() else {
        return false;
    };
    low.split(|c: char| !(c.is_ascii_alphabetic() || c == '\''))
        .filter(|w| !w.is_empty())
        .any(|word| similarity(word, primary) >= NAME_SIMILARITY)
}

pub(crate) fn strip_name(text: &str, names: &[String]) -> String {
    let mut low = text.to_lowercase();
    for alias in names.iter().filter(|a| !a.is_empty()) {
        let pattern = format!(r"\b{}\b[,\s:;.\-]*", regex::escape(alias));
        if let Ok(re) = Regex::new(&pattern) {
            low = re.replace_all(&low, " ").into_owned();
        }
    }
    let trimmed = low.trim_matches(|c: char| c.is_whitespace() || ",;:.-".contains(c));
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

static MATH_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\$\$.*?\$\$|\$.*?\$|\\\[.*?\\\]|\\\(.*?\\\)").unwrap()
});
static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[`*_^~\\#>{}\[\]|]").unwrap());
static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

/// Remove math spans and markup so the synthesizer does not read symbols aloud.
pub(crate) fn clean_for_tts(text: &str) -> String {
    let out = MATH_SPAN.replace_all(text, " ");
    let out = MARKUP.replace_all(&out, " ");
    SPACE_RUN.replace_all(&out, " ").trim().to_string()
}

pub(crate) fn hud_display(text: &str) -> String {
    match truncate_chars(text, HUD_MAX_CHARS) {
        Some(head) => format!("{head} …"),
        None => text.to_string(),
    }
}
