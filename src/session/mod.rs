// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session record store.
//!
//! - **Types**: SessionId, SessionStatus, SessionRecord, SessionSnapshot, events
//! - **Output**: bounded ring buffer with sequence numbers and pagination
//! - **Store**: the single shared table of sessions
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 SessionStore                   │
//! │  RwLock<HashMap<SessionId, Arc<SessionEntry>>> │
//! └───────────────────────┬───────────────────────┘
//!                         │ per entry
//!        ┌────────────────┼─────────────────┐
//!        ▼                ▼                 ▼
//! ┌──────────────┐ ┌─────────────┐ ┌─────────────────┐
//! │ SessionRecord│ │  op lock    │ │ signal broadcast│
//! │ + OutputBuf  │ │ (input/close)│ │ (dispatchers)   │
//! └──────────────┘ └─────────────┘ └─────────────────┘
//! ```
//!
//! Only the orchestrator mutates records; everything else reads snapshots
//! or subscribes to events.

mod output;
mod store;
mod types;

pub use output::{clean_line, OutputBuffer, OutputLine, OutputPage};
pub use store::{SessionEntry, SessionStore};
pub use types::{
    LayoutView, Placement, SessionEvent, SessionId, SessionRecord, SessionSignal,
    SessionSnapshot, SessionStatus,
};
