//! Per-chat rolling transcript.
//!
//! Each chat keeps the last `max_lines` lines of `Pengguna: …` / `Bot: …`
//! text. Truncation counts lines, not exchanges, so one long multi-line
//! answer can push every earlier exchange out of the window.
//!
//! Chats idle for longer than the configured TTL are dropped the next time
//! the store is touched.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::ConversationConfig;

/// Label for the user's lines, both in the stored transcript and in the
/// text handed to the pipeline.
pub const USER_LABEL: &str = "Pengguna";
pub const BOT_LABEL: &str = "Bot";

struct Entry {
    transcript: String,
    touched: Instant,
}

pub struct ConversationStore {
    entries: Mutex<HashMap<i64, Entry>>,
    max_lines: usize,
    idle_ttl: Duration,
}

impl ConversationStore {
    pub fn new(max_lines: usize, idle_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_lines,
            idle_ttl,
        }
    }

    pub fn from_config(config: &ConversationConfig) -> Self {
        Self::new(config.max_lines, Duration::from_secs(config.idle_ttl_secs))
    }

    /// The chat's transcript, or an empty string.
    pub fn get(&self, chat_id: i64) -> String {
        let now = Instant::now();
        let mut entries = self.lock();
        self.evict_idle(&mut entries, now);
        entries
            .get(&chat_id)
            .map(|e| e.transcript.clone())
            .unwrap_or_default()
    }

    /// Record one exchange and trim the transcript to the line window.
    pub fn append(&self, chat_id: i64, user_text: &str, bot_text: &str) {
        let now = Instant::now();
        let mut entries = self.lock();
        self.evict_idle(&mut entries, now);

        let previous = entries
            .get(&chat_id)
            .map(|e| e.transcript.as_str())
            .unwrap_or("");
        let combined =
            format!("{previous}\n{USER_LABEL}: {user_text}\n{BOT_LABEL}: {bot_text}");
        let transcript = last_lines(&combined, self.max_lines);

        entries.insert(
            chat_id,
            Entry {
                transcript,
                touched: now,
            },
        );
    }

    /// Number of chats currently holding a transcript.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_idle(&self, entries: &mut HashMap<i64, Entry>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.touched) < self.idle_ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "dropped idle conversations");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Text handed to the pipeline: the transcript, a blank line, then the new
/// message with the user label.
pub fn build_input(previous: &str, user_text: &str) -> String {
    format!("{previous}\n\n{USER_LABEL}: {user_text}")
}

fn last_lines(text: &str, max_lines: usize) -> String {
    let lines = split_lines(text);
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Splits on every Unicode line boundary, not only `\n`. A trailing
/// terminator does not produce an empty last line.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !is_line_break(c) {
            continue;
        }
        lines.push(&text[start..i]);
        start = i + c.len_utf8();
        if c == '\r' {
            if let Some(&(j, '\n')) = chars.peek() {
                chars.next();
                start = j + 1;
            }
        }
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{0b}' | '\u{0c}' | '\u{1c}' | '\u{1d}' | '\u{1e}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}
