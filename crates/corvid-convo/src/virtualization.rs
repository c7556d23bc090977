//! Message virtualization: a bounded `[loaded_start, loaded_end)` window over
//! a conversation's messages, so the TUI never has to hold or re-render the
//! full history of a long-running session.
//!
//! Heights are estimates, not measurements — the renderer reports back what
//! it actually drew and the window keeps a running mean per message so later
//! scroll-distance calculations get more accurate over time. The message
//! currently streaming into view is pinned and never evicted, regardless of
//! where the window would otherwise settle.

const INITIAL_HEIGHT_ESTIMATE: f64 = 15.0;

/// One message's rendering metadata inside the window. Content itself is
/// owned by the caller (typically a `Vec<PersistedMessage>` in lock-step with
/// this window) — this type tracks only what virtualization needs.
#[derive(Debug, Clone, Copy, PartialEq)]
struct HeightEntry {
    message_id: i64,
    estimated_height: f64,
    samples: u32,
}

/// A bounded, scrollable window over a conversation's message ids.
///
/// Indices handed out by `local_to_absolute`/`absolute_to_local` are relative
/// to `loaded_start`; everything outside `[loaded_start, loaded_end)` is
/// unloaded and must be fetched via `ConvoDb::load_range` before it can be
/// addressed locally.
#[derive(Debug, Clone)]
pub struct VirtualWindow {
    loaded_start: i64,
    loaded_end: i64,
    capacity: usize,
    heights: Vec<HeightEntry>,
    streaming_message_id: Option<i64>,
}

impl VirtualWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            loaded_start: 0,
            loaded_end: 0,
            capacity,
            heights: Vec::new(),
            streaming_message_id: None,
        }
    }

    pub fn loaded_start(&self) -> i64 {
        self.loaded_start
    }

    pub fn loaded_end(&self) -> i64 {
        self.loaded_end
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    pub fn set_streaming(&mut self, message_id: Option<i64>) {
        self.streaming_message_id = message_id;
    }

    /// Registers freshly loaded message ids `[start, end)` as the new window,
    /// seeding heights for any ids not already tracked.
    pub fn set_loaded_range(&mut self, start: i64, end: i64, ids: impl IntoIterator<Item = i64>) {
        self.loaded_start = start;
        self.loaded_end = end;
        self.heights = ids
            .into_iter()
            .map(|id| {
                self.heights
                    .iter()
                    .find(|h| h.message_id == id)
                    .copied()
                    .unwrap_or(HeightEntry {
                        message_id: id,
                        estimated_height: INITIAL_HEIGHT_ESTIMATE,
                        samples: 0,
                    })
            })
            .collect();
    }

    /// Updates the running mean height estimate for `message_id` after the
    /// renderer reports the rows it actually drew.
    pub fn observe_height(&mut self, message_id: i64, rows_drawn: u16) {
        if let Some(entry) = self.heights.iter_mut().find(|h| h.message_id == message_id) {
            let n = entry.samples as f64;
            entry.estimated_height = (entry.estimated_height * n + rows_drawn as f64) / (n + 1.0);
            entry.samples += 1;
        }
    }

    pub fn estimated_height(&self, message_id: i64) -> f64 {
        self.heights
            .iter()
            .find(|h| h.message_id == message_id)
            .map(|h| h.estimated_height)
            .unwrap_or(INITIAL_HEIGHT_ESTIMATE)
    }

    pub fn total_estimated_height(&self) -> f64 {
        self.heights.iter().map(|h| h.estimated_height).sum()
    }

    /// Evicts messages from the edges of the window to bring it back within
    /// `capacity`, without ever evicting the streaming message.
    pub fn trim_to_capacity(&mut self) {
        while self.heights.len() > self.capacity {
            let drop_front = match self.heights.first() {
                Some(h) if Some(h.message_id) == self.streaming_message_id => false,
                _ => true,
            };
            if drop_front {
                if self.heights.len() <= 1 {
                    break;
                }
                self.heights.remove(0);
                self.loaded_start += 1;
            } else {
                let last_is_streaming = self
                    .heights
                    .last()
                    .map(|h| Some(h.message_id) == self.streaming_message_id)
                    .unwrap_or(false);
                if last_is_streaming && self.heights.len() <= 1 {
                    break;
                }
                if last_is_streaming {
                    // both ends pinned-ish; drop the second-to-last instead of the streaming tail
                    let idx = self.heights.len() - 2;
                    self.heights.remove(idx);
                } else {
                    self.heights.pop();
                }
                self.loaded_end -= 1;
            }
        }
    }

    pub fn local_to_absolute(&self, local: usize) -> Option<i64> {
        self.heights.get(local).map(|h| h.message_id)
    }

    pub fn absolute_to_local(&self, message_id: i64) -> Option<usize> {
        self.heights.iter().position(|h| h.message_id == message_id)
    }

    pub fn loaded_ids(&self) -> Vec<i64> {
        self.heights.iter().map(|h| h.message_id).collect()
    }
}
