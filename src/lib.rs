// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! CCTM - concurrent terminal session orchestration.
//!
//! Runs many interactive command-line sessions side by side, notices when one
//! of them stops to wait for a human, arranges them on a grid and measures
//! how well all of that holds up under load.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`host`] - Spawns, feeds and terminates OS processes ([`host::ProcessHost`])
//! - [`session`] - Session records, lifecycle states, output buffers and the store
//! - [`attention`] - Classifies output tails as busy, idle or waiting for input
//! - [`layout`] - Grid placement, elevation, opacity and theme
//! - [`orchestrator`] - The public session API tying the above together
//! - [`dispatch`] - Sends one command to a session and waits for a bounded outcome
//! - [`harness`] - Quick validation and full stress runs with resource sampling
//! - [`project`] - Project-type detection for working directories
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing, metrics, and observability infrastructure
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cctm::config::{load_config, CliOptions};
//! use cctm::{Dispatcher, DispatchRequest, Orchestrator};
//!
//! let config = load_config(".".as_ref(), CliOptions::default())?;
//! let orchestrator = Arc::new(Orchestrator::with_process_host(config.clone()).await?);
//! let dispatcher = Dispatcher::new(Arc::clone(&orchestrator), config.dispatch)?;
//!
//! let result = dispatcher.dispatch(DispatchRequest::new("cargo test")).await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! orchestrator.shutdown().await;
//! ```

pub mod attention;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod harness;
pub mod host;
pub mod layout;
pub mod orchestrator;
pub mod project;
pub mod session;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use error::{ConfigError, ErrorKind, OrchestratorError};
pub use dispatch::{DispatchRequest, DispatchResult, DispatchTarget, Dispatcher};
pub use harness::{Harness, QuickCheckReport, StressTestResult};
pub use orchestrator::{Orchestrator, SessionRequest};
pub use project::{detect_project_type, ProjectType};
pub use session::{Placement, SessionId, SessionSnapshot, SessionStatus};

/// CCTM version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
