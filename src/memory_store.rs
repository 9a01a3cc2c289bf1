//! SQLite-backed personal fact memory.
//!
//! Facts are short sentences pulled out of conversation turns. Retrieval ranks the most
//! recent rows by keyword overlap, exponential recency decay, and stored importance.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use regex::Regex;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Clock, ConversationTurn, MemoryError, dedup_keep_order, tokenize};

const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS memories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    agent_id TEXT,
    namespace TEXT,
    ts INTEGER NOT NULL,
    text TEXT NOT NULL,
    source TEXT,
    importance REAL,
    UNIQUE(user_id, namespace, text)
);
CREATE INDEX IF NOT EXISTS idx_mem_user_ns ON memories(user_id, namespace);
CREATE INDEX IF NOT EXISTS idx_mem_ts ON memories(ts);
";

const KEYWORD_WEIGHT: f64 = 0.65;
const RECENCY_WEIGHT: f64 = 0.25;
const IMPORTANCE_WEIGHT: f64 = 0.10;
const MIN_ALPHA_TOKENS: usize = 8;
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone)]
pub(crate) struct MemoryConfig {
    pub(crate) half_life_days: f64,
    pub(crate) min_sentence_len: usize,
    pub(crate) max_sentence_len: usize,
    pub(crate) max_facts_per_add: usize,
    pub(crate) max_scan: usize,
    /// Counted as a salience keyword alongside the first-person markers.
    pub(crate) assistant_name: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            min_sentence_len: 8,
            max_sentence_len: 240,
            max_facts_per_add: 5,
            max_scan: 800,
            assistant_name: "jarvis".to_string(),
        }
    }
}

/// Who a fact belongs to and where it is filed.
#[derive(Debug, Clone)]
pub(crate) struct MemoryScope {
    pub(crate) user_id: String,
    pub(crate) agent_id: Option<String>,
    pub(crate) namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MemoryFact {
    #[serde(default)]
    pub(crate) id: i64,
    #[serde(default)]
    pub(crate) user_id: String,
    #[serde(default)]
    pub(crate) agent_id: Option<String>,
    #[serde(default = "default_namespace")]
    pub(crate) namespace: String,
    #[serde(default)]
    pub(crate) ts: i64,
    pub(crate) text: String,
    #[serde(default = "default_source")]
    pub(crate) source: String,
    #[serde(default = "default_importance")]
    pub(crate) importance: f64,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_source() -> String {
    "import".to_string()
}

fn default_importance() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct MemoryHit {
    pub(crate) id: i64,
    pub(crate) text: String,
    pub(crate) ts: i64,
    /// `None` when the query was too short to rank and rows came back by recency.
    pub(crate) score: Option<f64>,
}

pub(crate) struct MemoryStore {
    conn: Mutex<Connection>,
    config: MemoryConfig,
    clock: Arc<dyn Clock>,
    salience: Regex,
}

impl MemoryStore {
    pub(crate) fn open(
        path: &Path,
        config: MemoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        let salience = salience_pattern(&config.assistant_name)?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
            clock,
            salience,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite itself inconsistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store the salient sentences of one exchange. Returns the number of new rows.
    pub(crate) fn add(
        &self,
        turns: &[ConversationTurn],
        scope: &MemoryScope,
        source: &str,
        importance: f64,
    ) -> Result<usize, MemoryError> {
        let facts = self.extract_salient_sentences(turns);
        if facts.is_empty() {
            return Ok(0);
        }
        let ts = self.clock.now().timestamp();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO memories (user_id, agent_id, namespace, ts, text, source, importance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for text in &facts {
                inserted += stmt.execute(params![
                    scope.user_id,
                    scope.agent_id,
                    scope.namespace,
                    ts,
                    text,
                    source,
                    importance.clamp(0.0, 1.0),
                ])?;
            }
        }
        tx.commit()?;
        debug!(candidates = facts.len(), inserted, "memory add");
        Ok(inserted)
    }

    /// Rank the most recent rows against `query`. `namespace = None` spans every namespace
    /// of the user.
    pub(crate) fn search(
        &self,
        query: &str,
        user_id: &str,
        namespace: Option<&str>,
        k: usize,
    ) -> Result<Vec<MemoryHit>, MemoryError> {
        let k = k.max(1);
        let rows = self.recent_rows(user_id, namespace)?;
        let query_tokens = tokenize(query);

        if query_tokens.len() < 2 {
            return Ok(rows
                .into_iter()
                .take(k)
                .map(|(id, text, ts, _)| MemoryHit {
                    id,
                    text,
                    ts,
                    score: None,
                })
                .collect());
        }

        let now = self.clock.now().timestamp();
        let mut scored: Vec<MemoryHit> = rows
            .into_iter()
            .map(|(id, text, ts, importance)| {
                let overlap = keyword_overlap(&query_tokens, &tokenize(&text));
                let recency = recency_score(now - ts, self.config.half_life_days);
                let score = KEYWORD_WEIGHT * overlap
                    + RECENCY_WEIGHT * recency
                    + IMPORTANCE_WEIGHT * importance;
                MemoryHit {
                    id,
                    text,
                    ts,
                    score: Some(score),
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn recent_rows(
        &self,
        user_id: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<(i64, String, i64, f64)>, MemoryError> {
        let conn = self.conn();
        let limit = self.config.max_scan as i64;
        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(i64, String, i64, f64)> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
            ))
        };
        let rows = match namespace {
            Some(ns) => {
                let mut stmt = conn.prepare(
                    "SELECT id, text, ts, importance FROM memories
                     WHERE user_id = ?1 AND namespace = ?2
                     ORDER BY ts DESC, id DESC LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![user_id, ns, limit], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, text, ts, importance FROM memories
                     WHERE user_id = ?1
                     ORDER BY ts DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![user_id, limit], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    pub(crate) fn forget(&self, id: i64) -> Result<bool, MemoryError> {
        let changed = self
            .conn()
            .execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub(crate) fn wipe_user(&self, user_id: &str) -> Result<usize, MemoryError> {
        let changed = self
            .conn()
            .execute("DELETE FROM memories WHERE user_id = ?1", params![user_id])?;
        Ok(changed)
    }

    pub(crate) fn export_user(&self, user_id: &str) -> Result<Vec<MemoryFact>, MemoryError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, agent_id, namespace, ts, text, source, importance
             FROM memories WHERE user_id = ?1 ORDER BY id",
        )?;
        let facts = stmt
            .query_map(params![user_id], |row| {
                Ok(MemoryFact {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    agent_id: row.get(2)?,
                    namespace: row.get::<_, Option<String>>(3)?.unwrap_or_else(default_namespace),
                    ts: row.get(4)?,
                    text: row.get(5)?,
                    source: row.get::<_, Option<String>>(6)?.unwrap_or_else(default_source),
                    importance: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(facts)
    }

    /// Re-insert exported facts under `user_id`. Rows that already exist are skipped.
    pub(crate) fn import_user(&self, user_id: &str, facts: &[MemoryFact]) -> Result<usize, MemoryError> {
        let now = self.clock.now().timestamp();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO memories (user_id, agent_id, namespace, ts, text, source, importance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for fact in facts.iter().filter(|f| !f.text.trim().is_empty()) {
                let ts = if fact.ts > 0 { fact.ts } else { now };
                inserted += stmt.execute(params![
                    user_id,
                    fact.agent_id,
                    fact.namespace,
                    ts,
                    fact.text,
                    fact.source,
                    fact.importance,
                ])?;
            }
        }
        tx.commit()?;
        debug!(offered = facts.len(), inserted, "memory import");
        Ok(inserted)
    }

    pub(crate) fn import_json(&self, user_id: &str, raw: &str) -> Result<usize, MemoryError> {
        let facts: Vec<MemoryFact> = serde_json::from_str(raw)?;
        self.import_user(user_id, &facts)
    }

    fn extract_salient_sentences(&self, turns: &[ConversationTurn]) -> Vec<String> {
        // Turns never share a sentence, punctuated or not.
        let keep = turns
            .iter()
            .flat_map(|t| split_sentences(&t.content))
            .filter(|s| {
                let len = s.chars().count();
                len >= self.config.min_sentence_len && len <= self.config.max_sentence_len
            })
            .filter(|s| {
                self.salience.is_match(s)
                    || tokenize(s)
                        .iter()
                        .filter(|t| t.chars().all(char::is_alphabetic))
                        .count()
                        >= MIN_ALPHA_TOKENS
            })
            .collect::<Vec<_>>();

        let mut keep = dedup_keep_order(keep);
        keep.truncate(self.config.max_facts_per_add);
        keep
    }
}

fn salience_pattern(assistant_name: &str) -> Result<Regex, regex::Error> {
    let mut words = vec![
        "i", "i'm", "i am", "my", "prefer", "always", "from now on", "call me", "remind",
        "remember", "major", "college", "schedule", "birthday",
    ]
    .into_iter()
    .map(regex::escape)
    .collect::<Vec<_>>();
    let name = assistant_name.trim();
    if !name.is_empty() {
        words.push(regex::escape(name));
    }
    Regex::new(&format!(r"(?i)\b({})\b", words.join("|")))
}

/// Split after `.`, `!` or `?` when followed by whitespace.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.trim().chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_some_and(|next| next.is_whitespace());
        if boundary {
            out.push(std::mem::take(&mut current));
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
        }
    }
    out.push(current);
    out.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Set intersection over the geometric mean of the two set sizes.
pub(crate) fn keyword_overlap(query: &[String], memory: &[String]) -> f64 {
    if query.is_empty() || memory.is_empty() {
        return 0.0;
    }
    let q: HashSet<&str> = query.iter().map(String::as_str).collect();
    let m: HashSet<&str> = memory.iter().map(String::as_str).collect();
    let inter = q.intersection(&m).count() as f64;
    let denom = ((q.len() * m.len()) as f64).sqrt();
    if denom == 0.0 { 0.0 } else { inter / denom }
}

pub(crate) fn recency_score(age_secs: i64, half_life_days: f64) -> f64 {
    let half_life = half_life_days * SECONDS_PER_DAY;
    if half_life <= 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_secs.max(0) as f64 / half_life)
}

pub(crate) fn format_memory_prefix(hits: &[MemoryHit]) -> String {
    let mut lines = vec!["Known user facts (keep brief, only use when relevant):".to_string()];
    lines.extend(hits.iter().map(|h| format!("- {}", h.text)));
    lines.join("\n")
}
