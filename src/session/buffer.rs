//! Output buffer store
//!
//! Per-session chunked ring buffer for raw terminal output. Only the event
//! multiplexer appends; only the tab switch-over reads. Eviction runs two
//! independent policies on every append:
//!
//! - drop oldest chunks while the live character count exceeds the
//!   character budget (default 2,000,000)
//! - drop oldest chunks while the visible chunk count exceeds the chunk
//!   budget (default 2,048), so many tiny appends cannot inflate iteration
//!   cost even at low character volume
//!
//! Both advance a `start` cursor instead of splicing the vector; the dead
//! prefix is reclaimed once it grows past half the list, amortizing the
//! compaction over many appends. `read` flattens the live range once and
//! caches it until the next append invalidates it.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Default character budget per session
pub const DEFAULT_CHAR_BUDGET: usize = 2_000_000;

/// Default visible chunk budget per session
pub const DEFAULT_CHUNK_BUDGET: usize = 2_048;

/// Eviction limits, both enforced independently.
#[derive(Debug, Clone, Copy)]
pub struct BufferLimits {
    pub char_budget: usize,
    pub chunk_budget: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            char_budget: DEFAULT_CHAR_BUDGET,
            chunk_budget: DEFAULT_CHUNK_BUDGET,
        }
    }
}

/// One appended fragment; the unit of eviction. The character count is
/// cached so eviction never rescans text.
struct Chunk {
    text: String,
    chars: usize,
}

/// Buffer for a single session.
struct SessionBuffer {
    chunks: Vec<Chunk>,
    /// Index of the first live chunk; everything before it is evicted
    start: usize,
    /// Sum of `chars` over `chunks[start..]`
    total_chars: usize,
    /// Last flattened value; cleared on every append
    cached: Option<Arc<str>>,
}

impl SessionBuffer {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            start: 0,
            total_chars: 0,
            cached: None,
        }
    }

    fn append(&mut self, data: &str, limits: BufferLimits) {
        let chars = data.chars().count();
        self.chunks.push(Chunk {
            text: data.to_string(),
            chars,
        });
        self.total_chars += chars;
        self.cached = None;

        self.evict(limits);
        self.maybe_compact();
    }

    fn evict(&mut self, limits: BufferLimits) {
        while self.total_chars > limits.char_budget && self.start < self.chunks.len() {
            self.total_chars -= self.chunks[self.start].chars;
            self.start += 1;
        }
        while self.chunks.len() - self.start > limits.chunk_budget {
            self.total_chars -= self.chunks[self.start].chars;
            self.start += 1;
        }
    }

    /// Reclaim the dead prefix once it exceeds half the list length.
    fn maybe_compact(&mut self) {
        if self.start > self.chunks.len() / 2 {
            self.chunks.drain(..self.start);
            self.start = 0;
        }
    }

    fn read(&mut self) -> Arc<str> {
        if let Some(cached) = &self.cached {
            return Arc::clone(cached);
        }
        let mut flat = String::with_capacity(
            self.chunks[self.start..].iter().map(|c| c.text.len()).sum(),
        );
        for chunk in &self.chunks[self.start..] {
            flat.push_str(&chunk.text);
        }
        let flat: Arc<str> = flat.into();
        self.cached = Some(Arc::clone(&flat));
        flat
    }

    fn live_chunks(&self) -> usize {
        self.chunks.len() - self.start
    }
}

/// All session buffers, keyed by session id. Created on first output,
/// deleted when the session closes cleanly. Deleting is distinct from
/// being empty, and empty buffers are not retained across sessions.
pub struct OutputBufferStore {
    buffers: DashMap<String, SessionBuffer>,
    limits: BufferLimits,
}

impl OutputBufferStore {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            buffers: DashMap::new(),
            limits,
        }
    }

    /// Append an output chunk, creating the buffer on the session's first
    /// byte.
    pub fn append(&self, session_id: &str, data: &str) {
        let mut buffer = self
            .buffers
            .entry(session_id.to_string())
            .or_insert_with(SessionBuffer::new);
        buffer.append(data, self.limits);
    }

    /// Flatten the session's live chunks. Idempotent between appends; does
    /// not change budgets.
    pub fn read(&self, session_id: &str) -> Option<Arc<str>> {
        self.buffers.get_mut(session_id).map(|mut b| b.read())
    }

    /// Drop the session's buffer entirely.
    pub fn delete(&self, session_id: &str) {
        if self.buffers.remove(session_id).is_some() {
            debug!("Dropped output buffer for session {}", session_id);
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.buffers.contains_key(session_id)
    }

    /// Live character count for a session (0 when absent).
    pub fn total_chars(&self, session_id: &str) -> usize {
        self.buffers
            .get(session_id)
            .map(|b| b.total_chars)
            .unwrap_or(0)
    }

    /// Visible chunk count for a session (0 when absent).
    pub fn chunk_count(&self, session_id: &str) -> usize {
        self.buffers
            .get(session_id)
            .map(|b| b.live_chunks())
            .unwrap_or(0)
    }
}

impl Default for OutputBufferStore {
    fn default() -> Self {
        Self::new(BufferLimits::default())
    }
}
