//! Rolling speech transcript with independent per-reader cursors.
//!
//! Features that consume speech incrementally (name detection, word games) keep a
//! tag here so each sees every chunk once, regardless of how the others read.

use crate::types::{Role, Timestamp};
use std::collections::{HashMap, VecDeque};

const DEFAULT_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptChunk {
    pub seq: u64,
    pub speaker: Role,
    pub text: String,
    pub at: Timestamp,
}

#[derive(Debug)]
pub struct TranscriptLog {
    chunks: VecDeque<TranscriptChunk>,
    cursors: HashMap<String, u64>,
    next_seq: u64,
    capacity: usize,
}

impl Default for TranscriptLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TranscriptLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            cursors: HashMap::new(),
            next_seq: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, speaker: Role, text: impl Into<String>, at: Timestamp) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.chunks.push_back(TranscriptChunk {
            seq,
            speaker,
            text: text.into(),
            at,
        });
        while self.chunks.len() > self.capacity {
            self.chunks.pop_front();
        }
        seq
    }

    /// Text appended since `tag` last read, joined with spaces. Advances the cursor.
    pub fn take_new(&mut self, tag: &str) -> String {
        let from = self.cursors.get(tag).copied().unwrap_or(0);
        let text = self
            .chunks
            .iter()
            .filter(|c| c.seq >= from)
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.cursors.insert(tag.to_string(), self.next_seq);
        text
    }

    /// Move `tag` to the end so earlier speech is never reported to it.
    pub fn reset_tag(&mut self, tag: &str) {
        self.cursors.insert(tag.to_string(), self.next_seq);
    }

    /// The last `count` chunks, oldest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &TranscriptChunk> {
        let skip = self.chunks.len().saturating_sub(count);
        self.chunks.iter().skip(skip)
    }

    /// The last `count` chunks from `speaker`, oldest first.
    pub fn recent_from(&self, speaker: Role, count: usize) -> Vec<&TranscriptChunk> {
        let mut out: Vec<&TranscriptChunk> = self
            .chunks
            .iter()
            .rev()
            .filter(|c| c.speaker == speaker)
            .take(count)
            .collect();
        out.reverse();
        out
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.cursors.clear();
    }
}
