//! Gapless scheduling of inbound model speech.
//!
//! The scheduler is pure bookkeeping over the output clock: it decides when
//! each chunk starts and which chunks are still audible. Actually producing
//! sound is the job of an [`AudioOutput`](crate::realtime_api::AudioOutput).

use std::collections::HashSet;
use std::fmt;

/// Identifies one scheduled chunk on the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackId(pub u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a chunk landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: PlaybackId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Tracks the next free start time and the set of audible chunks.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    cursor: f64,
    active: HashSet<PlaybackId>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a chunk of `duration` seconds at `max(now, cursor)` and moves
    /// the cursor to its end.
    pub fn schedule(&mut self, now: f64, duration: f64) -> ScheduledChunk {
        let start_at = self.cursor.max(now);
        self.cursor = start_at + duration.max(0.0);

        let id = PlaybackId(self.next_id);
        self.next_id += 1;
        self.active.insert(id);

        ScheduledChunk {
            id,
            start_at,
            duration,
        }
    }

    /// Forgets a chunk that finished playing. Returns false for unknown ids,
    /// e.g. chunks already cut by an interruption.
    pub fn finished(&mut self, id: PlaybackId) -> bool {
        self.active.remove(&id)
    }

    /// Drains every audible chunk and rewinds the cursor to zero. The caller
    /// must stop each returned handle on the output.
    pub fn interrupt(&mut self) -> Vec<PlaybackId> {
        self.cursor = 0.0;
        let mut cut: Vec<PlaybackId> = self.active.drain().collect();
        cut.sort();
        cut
    }

    /// Rewinds the cursor when the session closes. Chunks already handed to
    /// the output keep playing and still report their natural end.
    pub fn reset(&mut self) {
        self.cursor = 0.0;
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: PlaybackId) -> bool {
        self.active.contains(&id)
    }
}
