// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub columns: Option<u16>,
    pub rows: Option<u16>,
    pub dispatch_timeout_ms: Option<u64>,
    pub working_dir: Option<PathBuf>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.cctm.local.json)
/// 3. Workspace config (.cctm.json)
/// 4. Global config (~/.cctm/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, &config);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: &WorkspaceConfig) {
    if let Some(ref host) = config.host {
        if let Some(ref command) = host.command {
            result.host.command = command.clone();
        }
        if let Some(ref args) = host.args {
            result.host.args = args.clone();
        }
        if let Some(ref env) = host.env {
            result.host.env.extend(env.clone());
        }
        if let Some(limit) = host.read_retry_limit {
            result.host.read_retry_limit = limit;
        }
        if let Some(limit) = host.spawn_retry_limit {
            result.host.spawn_retry_limit = limit;
        }
        if let Some(ms) = host.drain_timeout_ms {
            result.host.drain_timeout_ms = ms;
        }
        if let Some(ms) = host.write_timeout_ms {
            result.host.write_timeout_ms = ms;
        }
    }

    if let Some(ref output) = config.output {
        if let Some(lines) = output.retention_lines {
            result.output.retention_lines = lines;
        }
        if let Some(lines) = output.classifier_tail_lines {
            result.output.classifier_tail_lines = lines;
        }
        if let Some(bytes) = output.max_line_bytes {
            result.output.max_line_bytes = bytes;
        }
    }

    if let Some(ref attention) = config.attention {
        if let Some(ms) = attention.quiescence_ms {
            result.attention.quiescence_ms = ms;
        }
        if let Some(ref patterns) = attention.extra_patterns {
            // Merge pattern lists
            for pattern in patterns {
                if !result.attention.extra_patterns.contains(pattern) {
                    result.attention.extra_patterns.push(pattern.clone());
                }
            }
        }
    }

    if let Some(ref layout) = config.layout {
        if let Some(columns) = layout.columns {
            result.layout.columns = columns;
        }
        if let Some(rows) = layout.rows {
            result.layout.rows = rows;
        }
        if let Some(opacity) = layout.opacity {
            result.layout.opacity = opacity;
        }
        if let Some(ref theme) = layout.theme {
            result.layout.theme = theme.clone();
        }
        if let Some(width) = layout.viewport_width {
            result.layout.viewport_width = width;
        }
        if let Some(height) = layout.viewport_height {
            result.layout.viewport_height = height;
        }
    }

    if let Some(ref dispatch) = config.dispatch {
        if let Some(ms) = dispatch.timeout_ms {
            result.dispatch.timeout_ms = ms;
        }
        if let Some(ref marker) = dispatch.completion_marker {
            result.dispatch.completion_marker = marker.clone();
        }
        if let Some(ref marker) = dispatch.error_marker {
            // An empty string disables error-marker detection
            result.dispatch.error_marker = if marker.is_empty() {
                None
            } else {
                Some(marker.clone())
            };
        }
        if let Some(on_prompt) = dispatch.complete_on_prompt {
            result.dispatch.complete_on_prompt = on_prompt;
        }
        if dispatch.default_working_dir.is_some() {
            result.dispatch.default_working_dir = dispatch.default_working_dir.clone();
        }
        if let Some(limit) = dispatch.history_limit {
            result.dispatch.history_limit = limit;
        }
    }

    if let Some(ref harness) = config.harness {
        if let Some(n) = harness.quick_sessions {
            result.harness.quick_sessions = n;
        }
        if let Some(ms) = harness.quick_timeout_ms {
            result.harness.quick_timeout_ms = ms;
        }
        if let Some(mb) = harness.quick_memory_ceiling_mb {
            result.harness.quick_memory_ceiling_mb = mb;
        }
        if let Some(n) = harness.stress_concurrency {
            result.harness.stress_concurrency = n;
        }
        if let Some(ms) = harness.observation_window_ms {
            result.harness.observation_window_ms = ms;
        }
        if let Some(ms) = harness.sample_interval_ms {
            result.harness.sample_interval_ms = ms;
        }
        if let Some(mb) = harness.memory_budget_mb {
            result.harness.memory_budget_mb = mb;
        }
        if let Some(pct) = harness.cpu_budget_percent {
            result.harness.cpu_budget_percent = pct;
        }
        if harness.working_dir.is_some() {
            result.harness.working_dir = harness.working_dir.clone();
        }
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref command) = cli.command {
        result.host.command = command.clone();
    }

    if let Some(ref args) = cli.args {
        result.host.args = args.clone();
    }

    if let Some(columns) = cli.columns {
        result.layout.columns = columns;
    }

    if let Some(rows) = cli.rows {
        result.layout.rows = rows;
    }

    if let Some(ms) = cli.dispatch_timeout_ms {
        result.dispatch.timeout_ms = ms;
    }

    if cli.working_dir.is_some() {
        result.dispatch.default_working_dir = cli.working_dir.clone();
        result.harness.working_dir = cli.working_dir.clone();
    }
}
