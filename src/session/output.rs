// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded per-session output buffer.
//!
//! Raw chunks are split into lines; each completed line gets a monotonically
//! increasing sequence number. Only the newest `capacity` lines are retained,
//! evicted lines are counted. The unterminated tail (a prompt, usually) is
//! kept separately so the classifier can see it. Carriage-return redraws are
//! collapsed as they arrive and a tail that outgrows `max_line_bytes` is
//! committed as a line, so a spinner that never prints `\n` stays bounded.

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Default cap on the unterminated tail.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    // CSI, OSC (BEL or ST terminated), then lone two-byte escapes
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").unwrap()
});

/// Remove ANSI escape sequences and carriage-return overwrites.
///
/// For `"50%\r100%"` only the last non-empty segment survives, which is what
/// a terminal would show.
pub fn clean_line(raw: &str) -> String {
    let stripped = ANSI_ESCAPE.replace_all(raw, "");
    let line = stripped.trim_end_matches('\r');
    match line.rsplit('\r').find(|segment| !segment.is_empty()) {
        Some(segment) => segment.to_string(),
        None => String::new(),
    }
}

/// One retained output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub seq: u64,
    pub text: String,
}

/// A page of retained output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPage {
    pub lines: Vec<OutputLine>,
    /// Sequence number to request for the following page.
    pub next_seq: u64,
    /// Lines evicted from the buffer so far.
    pub dropped: u64,
    /// Unterminated last line, present once the page reaches the end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
}

#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<OutputLine>,
    partial: String,
    next_seq: u64,
    dropped: u64,
    capacity: usize,
    max_line_bytes: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            partial: String::new(),
            next_seq: 0,
            dropped: 0,
            capacity: capacity.max(1),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Append a raw chunk and return the lines it completed.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<OutputLine> {
        let mut completed = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.find('\n') {
            self.partial.push_str(&rest[..pos]);
            let raw = std::mem::take(&mut self.partial);
            completed.push(self.commit(&raw));
            rest = &rest[pos + 1..];
        }
        if !rest.is_empty() {
            self.partial.push_str(rest);
            self.collapse_redraws();
            if self.partial.len() > self.max_line_bytes {
                let raw = std::mem::take(&mut self.partial);
                completed.push(self.commit(&raw));
            }
        }
        completed
    }

    /// Drop tail text a later `\r` has already overwritten.
    ///
    /// Only cuts when the surviving segment is visible after escape
    /// stripping, so [`clean_line`] of the tail is unchanged.
    fn collapse_redraws(&mut self) {
        let body = self.partial.trim_end_matches('\r');
        let Some(pos) = body.rfind('\r') else {
            return;
        };
        if ANSI_ESCAPE.replace_all(&body[pos + 1..], "").is_empty() {
            return;
        }
        self.partial.drain(..=pos);
    }

    /// Commit the partial line, if any, as a completed line.
    pub fn break_line(&mut self) -> Option<OutputLine> {
        if self.partial.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.partial);
        Some(self.commit(&raw))
    }

    fn commit(&mut self, raw: &str) -> OutputLine {
        let line = OutputLine {
            seq: self.next_seq,
            text: clean_line(raw),
        };
        self.next_seq += 1;
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line.clone());
        line
    }

    /// Sequence number the next completed line will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn retained(&self) -> usize {
        self.lines.len()
    }

    /// The cleaned unterminated last line, if any.
    pub fn partial(&self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(clean_line(&self.partial))
        }
    }

    /// The last `n` lines, ending with the partial line when present.
    pub fn tail(&self, n: usize) -> Vec<String> {
        self.tail_since(0, n)
    }

    /// Like [`tail`](Self::tail) but ignoring lines numbered below `floor`.
    pub fn tail_since(&self, floor: u64, n: usize) -> Vec<String> {
        if n == 0 {
            return Vec::new();
        }
        let partial = self.partial();
        let wanted = n - usize::from(partial.is_some());
        let mut tail: Vec<String> = self
            .lines
            .iter()
            .rev()
            .take_while(|line| line.seq >= floor)
            .take(wanted)
            .map(|line| line.text.clone())
            .collect();
        tail.reverse();
        tail.extend(partial);
        tail
    }

    /// Up to `limit` retained lines starting at `from_seq`.
    ///
    /// Requests below the oldest retained line start at the oldest one.
    pub fn page(&self, from_seq: u64, limit: usize) -> OutputPage {
        let oldest = self.lines.front().map(|l| l.seq).unwrap_or(self.next_seq);
        let start = from_seq.max(oldest);
        let skip = (start - oldest) as usize;
        let lines: Vec<OutputLine> = self.lines.iter().skip(skip).take(limit).cloned().collect();
        let next_seq = lines.last().map(|l| l.seq + 1).unwrap_or(start);
        let partial = if next_seq >= self.next_seq {
            self.partial()
        } else {
            None
        };
        OutputPage {
            lines,
            next_seq,
            dropped: self.dropped,
            partial,
        }
    }
}
