//! Interactive prompt detection
//!
//! A bounded trailing window of recent output is scanned for an interactive
//! password prompt so a saved secret can be injected once. Best-effort by
//! construction: the pattern is a convenience, not a security boundary, and
//! lives behind this narrow type so it can be swapped or disabled without
//! touching session lifecycle code.

use once_cell::sync::Lazy;
use regex::Regex;
use zeroize::Zeroizing;

/// Default prompt-tail capacity in characters.
pub const DEFAULT_TAIL_CHARS: usize = 800;

/// End-anchored, case-insensitive password prompt. Covers the common
/// phrasings (`user@host's password:`, `Password:`, `Password for user:`),
/// with optional trailing whitespace since prompts usually end in a space.
static PASSWORD_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)password(\s+for\s+[^:\r\n]+)?\s*:\s*$").expect("static prompt pattern")
});

/// Rolling window over the last N characters of a session's output.
/// Prompts can arrive split across chunks, so matching always runs against
/// the accumulated tail, not the incoming chunk.
#[derive(Debug)]
pub struct PromptTail {
    text: String,
    cap: usize,
}

impl PromptTail {
    pub fn new(cap: usize) -> Self {
        Self {
            text: String::new(),
            cap,
        }
    }

    pub fn push(&mut self, data: &str) {
        self.text.push_str(data);
        let count = self.text.chars().count();
        if count > self.cap {
            let excess = count - self.cap;
            if let Some((offset, _)) = self.text.char_indices().nth(excess) {
                self.text.drain(..offset);
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }
}

impl Default for PromptTail {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_CHARS)
    }
}

/// One-shot credential injection state for a single session.
///
/// A secret is staged only when the store had one at connect time. The
/// first prompt match emits the secret plus newline exactly once; a later
/// re-prompt (wrong password) is never auto-retried. The staged value is
/// wiped on fire and on discard.
pub struct AutoAuth {
    staged: Option<Zeroizing<String>>,
    sent: bool,
}

impl AutoAuth {
    /// No saved secret: the heuristic stays inert for this session.
    pub fn inert() -> Self {
        Self {
            staged: None,
            sent: false,
        }
    }

    pub fn staged(secret: String) -> Self {
        Self {
            staged: Some(Zeroizing::new(secret)),
            sent: false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.staged.is_some() && !self.sent
    }

    pub fn was_sent(&self) -> bool {
        self.sent
    }

    /// Test the tail against the prompt pattern; on the first match, return
    /// the write payload (secret + newline) and disarm permanently.
    pub fn try_fire(&mut self, tail: &str) -> Option<Zeroizing<String>> {
        if self.sent {
            return None;
        }
        if !PASSWORD_PROMPT.is_match(tail) {
            return None;
        }
        let secret = self.staged.take()?;
        self.sent = true;
        Some(Zeroizing::new(format!("{}\n", secret.as_str())))
    }

    /// Drop the staged secret (session exit, whatever the reason).
    pub fn discard(&mut self) {
        self.staged = None;
    }
}

impl std::fmt::Debug for AutoAuth {
    // Never print the secret, even at trace level.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoAuth")
            .field("staged", &self.staged.is_some())
            .field("sent", &self.sent)
            .finish()
    }
}
