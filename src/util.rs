use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use crate::ConfigError;

pub(crate) const DEFAULT_WORKSPACE_DIR: &str = ".aethervoice";

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env_optional(name) {
        Some(value) => value.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
            name: name.to_string(),
        }),
        None => Ok(default),
    }
}

pub(crate) fn env_f64(name: &str, default: f64) -> Result<f64, ConfigError> {
    match env_optional(name) {
        Some(value) => value.trim().parse::<f64>().map_err(|_| ConfigError::Invalid {
            name: name.to_string(),
        }),
        None => Ok(default),
    }
}

pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    match env_optional(name) {
        Some(value) => {
            let v = value.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "y" | "on")
        }
        None => default,
    }
}

pub(crate) fn resolve_workspace(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Some(value) = env_optional("AETHERVOICE_WORKSPACE") {
        return PathBuf::from(value);
    }
    PathBuf::from(DEFAULT_WORKSPACE_DIR)
}

/// Lower-cased word tokens; apostrophes stay inside words ("i'm", "don't").
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub(crate) fn dedup_keep_order(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for v in values {
        if seen.insert(v.clone()) {
            out.push(v);
        }
    }
    out
}

pub(crate) fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();
    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }
    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];
    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

/// 1.0 for identical strings, falling linearly with edit distance.
pub(crate) fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f64 / max_len as f64
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> Option<String> {
    let mut indices = text.char_indices();
    let (cut, _) = indices.nth(max)?;
    Some(text[..cut].to_string())
}
