//! Time-windowed buffering of streaming deltas.
//!
//! Agents emit text, thought and tool notifications at a high rate. The
//! [`StreamCoalescer`] collects them into three buffers and hands out a
//! [`FlushTicket`] when a buffer becomes non-empty. The owner sleeps for the
//! ticket's delay and then calls [`StreamCoalescer::fire`]; a ticket that was
//! overtaken by an explicit flush carries a stale generation and is ignored.
//!
//! Text and tool activity share one ordering: buffering a tool patch first
//! releases pending text, and buffering text first releases pending tools, so
//! the reducer sees them in arrival order. Thought is independent.

use indexmap::IndexMap;
use nexus_core::config::OrchestratorConfig;
use nexus_core::tool::ToolPatch;
use nexus_core::transcript::TranscriptEvent;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Text,
    Thought,
    Tool,
}

impl BufferKind {
    fn index(self) -> usize {
        match self {
            Self::Text => 0,
            Self::Thought => 1,
            Self::Tool => 2,
        }
    }
}

/// Flush windows per buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerWindows {
    pub text: Duration,
    pub thought: Duration,
    pub tool: Duration,
}

impl Default for CoalescerWindows {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for CoalescerWindows {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            text: config.text_window(),
            thought: config.thought_window(),
            tool: config.tool_window(),
        }
    }
}

impl CoalescerWindows {
    fn window(&self, kind: BufferKind) -> Duration {
        match kind {
            BufferKind::Text => self.text,
            BufferKind::Thought => self.thought,
            BufferKind::Tool => self.tool,
        }
    }
}

/// Request to flush one buffer after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTicket {
    pub kind: BufferKind,
    pub delay: Duration,
    pub generation: u64,
}

/// Result of buffering one delta.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Push {
    /// Events released from the other buffer to keep arrival order.
    pub flushed: Vec<TranscriptEvent>,
    /// Set when this delta armed a new timer.
    pub ticket: Option<FlushTicket>,
}

#[derive(Debug, Default)]
struct TimerSlot {
    generation: u64,
    armed: bool,
    timer: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn arm(&mut self, kind: BufferKind, delay: Duration) -> Option<FlushTicket> {
        if self.armed {
            return None;
        }
        self.generation += 1;
        self.armed = true;
        Some(FlushTicket {
            kind,
            delay,
            generation: self.generation,
        })
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.armed {
            self.generation += 1;
            self.armed = false;
        }
    }
}

#[derive(Debug, Default)]
pub struct StreamCoalescer {
    windows: CoalescerWindows,
    text: String,
    thought: String,
    tools: IndexMap<String, ToolPatch>,
    slots: [TimerSlot; 3],
}

impl StreamCoalescer {
    pub fn new(windows: CoalescerWindows) -> Self {
        Self {
            windows,
            text: String::new(),
            thought: String::new(),
            tools: IndexMap::new(),
            slots: Default::default(),
        }
    }

    pub fn push_text(&mut self, text: &str) -> Push {
        let mut push = Push::default();
        if text.is_empty() {
            return push;
        }
        push.flushed.extend(self.take(BufferKind::Tool));
        self.text.push_str(text);
        push.ticket = self.arm(BufferKind::Text);
        push
    }

    pub fn push_thought(&mut self, text: &str) -> Push {
        if text.is_empty() {
            return Push::default();
        }
        self.thought.push_str(text);
        Push {
            flushed: Vec::new(),
            ticket: self.arm(BufferKind::Thought),
        }
    }

    /// Buffers a tool patch, merging it into any pending patch for `id`.
    pub fn push_tool(&mut self, id: &str, patch: ToolPatch) -> Push {
        let mut push = Push::default();
        push.flushed.extend(self.take(BufferKind::Text));
        match self.tools.get_mut(id) {
            Some(pending) => pending.merge(patch),
            None => {
                self.tools.insert(id.to_string(), patch);
            }
        }
        push.ticket = self.arm(BufferKind::Tool);
        push
    }

    /// Keeps the timer task for `ticket` so a flush can abort it.
    ///
    /// A handle for a ticket that is no longer current is aborted at once.
    pub fn attach_timer(&mut self, ticket: &FlushTicket, timer: JoinHandle<()>) {
        let slot = &mut self.slots[ticket.kind.index()];
        if slot.armed && slot.generation == ticket.generation {
            if let Some(previous) = slot.timer.replace(timer) {
                previous.abort();
            }
        } else {
            timer.abort();
        }
    }

    /// Handles an elapsed timer.
    ///
    /// # Returns
    ///
    /// The buffered content as one event, or `None` when the ticket is stale
    /// or the buffer is empty.
    pub fn fire(&mut self, ticket: &FlushTicket) -> Option<TranscriptEvent> {
        let slot = &mut self.slots[ticket.kind.index()];
        if !slot.armed || slot.generation != ticket.generation {
            return None;
        }
        // The timer task is the caller; dropping the handle detaches it.
        slot.timer = None;
        slot.armed = false;
        self.drain(ticket.kind)
    }

    /// Releases every buffer in text, thought, tool order and cancels timers.
    pub fn flush(&mut self) -> Vec<TranscriptEvent> {
        [BufferKind::Text, BufferKind::Thought, BufferKind::Tool]
            .into_iter()
            .filter_map(|kind| self.take(kind))
            .collect()
    }

    /// Drops buffered content without emitting it.
    pub fn discard(&mut self) {
        self.flush();
    }

    pub fn buffered_tool(&self, id: &str) -> Option<&ToolPatch> {
        self.tools.get(id)
    }

    pub fn is_idle(&self) -> bool {
        self.text.is_empty()
            && self.thought.is_empty()
            && self.tools.is_empty()
            && self.slots.iter().all(|slot| !slot.armed)
    }

    fn arm(&mut self, kind: BufferKind) -> Option<FlushTicket> {
        let delay = self.windows.window(kind);
        self.slots[kind.index()].arm(kind, delay)
    }

    fn take(&mut self, kind: BufferKind) -> Option<TranscriptEvent> {
        self.slots[kind.index()].disarm();
        self.drain(kind)
    }

    fn drain(&mut self, kind: BufferKind) -> Option<TranscriptEvent> {
        match kind {
            BufferKind::Text if !self.text.is_empty() => {
                Some(TranscriptEvent::TextDelta(std::mem::take(&mut self.text)))
            }
            BufferKind::Thought if !self.thought.is_empty() => {
                Some(TranscriptEvent::ThoughtDelta(std::mem::take(&mut self.thought)))
            }
            BufferKind::Tool if !self.tools.is_empty() => {
                Some(TranscriptEvent::ToolBatch(std::mem::take(&mut self.tools)))
            }
            _ => None,
        }
    }
}

impl Drop for StreamCoalescer {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            slot.disarm();
        }
    }
}
