// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace (partial) and resolved configuration,
//! supporting JSON and YAML formats.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Workspace configuration for CCTM.
/// Can be defined in .cctm.json or .cctm/config.json in the project root.
/// Every field is optional; missing values fall back to lower-precedence sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Process host settings (the CLI each session runs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostConfig>,

    /// Output retention settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,

    /// Attention detection settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention: Option<AttentionConfig>,

    /// Layout defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutConfig>,

    /// Command dispatch settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchConfig>,

    /// Stress harness settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harness: Option<HarnessConfig>,
}

/// Process host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Executable to launch for each session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments passed to the executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Extra environment variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,

    /// Retries for transient output read errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_retry_limit: Option<u32>,

    /// Retries for transient spawn errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_retry_limit: Option<u32>,

    /// Upper bound for draining output after a process exits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_timeout_ms: Option<u64>,

    /// Upper bound for one stdin write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_timeout_ms: Option<u64>,
}

/// Output retention configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Lines kept per session before the oldest are evicted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_lines: Option<usize>,

    /// Lines of tail handed to the attention classifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_tail_lines: Option<usize>,

    /// Unterminated output longer than this is committed as a line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_line_bytes: Option<usize>,
}

/// Attention detection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionConfig {
    /// Quiet period before weak prompt markers count as waiting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiescence_ms: Option<u64>,

    /// Additional blocking-prompt regexes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_patterns: Option<Vec<String>>,
}

/// Layout defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport_width: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport_height: Option<u32>,
}

/// Command dispatch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Default timeout in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Regex that marks a command as complete. Matched against completed
    /// lines and, while the command runs, the unterminated last line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_marker: Option<String>,

    /// Regex that marks a command as failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_marker: Option<String>,

    /// Treat a return to the input prompt as completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_on_prompt: Option<bool>,

    /// Working directory for sessions created by the dispatcher
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_working_dir: Option<PathBuf>,

    /// Results kept in the dispatch history
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
}

/// Stress harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_sessions: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_memory_ceiling_mb: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stress_concurrency: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_window_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_budget_mb: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_budget_percent: Option<f64>,

    /// Working directory for harness sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Fully resolved configuration with defaults applied.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub host: ResolvedHostConfig,
    pub output: ResolvedOutputConfig,
    pub attention: ResolvedAttentionConfig,
    pub layout: ResolvedLayoutConfig,
    pub dispatch: ResolvedDispatchConfig,
    pub harness: ResolvedHarnessConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedHostConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub read_retry_limit: u32,
    pub spawn_retry_limit: u32,
    pub drain_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for ResolvedHostConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            read_retry_limit: 3,
            spawn_retry_limit: 2,
            drain_timeout_ms: 500,
            write_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOutputConfig {
    pub retention_lines: usize,
    pub classifier_tail_lines: usize,
    pub max_line_bytes: usize,
}

impl Default for ResolvedOutputConfig {
    fn default() -> Self {
        Self {
            retention_lines: 5_000,
            classifier_tail_lines: 8,
            max_line_bytes: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAttentionConfig {
    pub quiescence_ms: u64,
    pub extra_patterns: Vec<String>,
}

impl Default for ResolvedAttentionConfig {
    fn default() -> Self {
        Self {
            quiescence_ms: 1_500,
            extra_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLayoutConfig {
    pub columns: u16,
    pub rows: u16,
    pub opacity: f32,
    pub theme: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for ResolvedLayoutConfig {
    fn default() -> Self {
        Self {
            columns: 3,
            rows: 3,
            opacity: 1.0,
            theme: "default".to_string(),
            viewport_width: 1920,
            viewport_height: 1080,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDispatchConfig {
    pub timeout_ms: u64,
    pub completion_marker: String,
    pub error_marker: Option<String>,
    pub complete_on_prompt: bool,
    pub default_working_dir: Option<PathBuf>,
    pub history_limit: usize,
}

impl Default for ResolvedDispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            completion_marker: r"^\s*\[cctm:done\]".to_string(),
            error_marker: Some(r"(?i)^\s*error:".to_string()),
            complete_on_prompt: false,
            default_working_dir: None,
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedHarnessConfig {
    pub quick_sessions: usize,
    pub quick_timeout_ms: u64,
    pub quick_memory_ceiling_mb: f64,
    pub stress_concurrency: usize,
    pub observation_window_ms: u64,
    pub sample_interval_ms: u64,
    pub memory_budget_mb: f64,
    pub cpu_budget_percent: f64,
    pub working_dir: Option<PathBuf>,
}

impl Default for ResolvedHarnessConfig {
    fn default() -> Self {
        Self {
            quick_sessions: 3,
            quick_timeout_ms: 5_000,
            quick_memory_ceiling_mb: 1_024.0,
            stress_concurrency: 50,
            observation_window_ms: 10_000,
            sample_interval_ms: 500,
            memory_budget_mb: 2_048.0,
            cpu_budget_percent: 80.0,
            working_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_config_camel_case() {
        let json = r#"{
            "host": {"command": "codex", "args": ["--quiet"], "readRetryLimit": 5},
            "layout": {"columns": 4, "viewportWidth": 800},
            "dispatch": {"timeoutMs": 2000, "completeOnPrompt": true}
        }"#;
        let config: WorkspaceConfig = serde_json::from_str(json).unwrap();
        let host = config.host.unwrap();
        assert_eq!(host.command.as_deref(), Some("codex"));
        assert_eq!(host.read_retry_limit, Some(5));
        assert_eq!(config.layout.unwrap().viewport_width, Some(800));
        assert_eq!(config.dispatch.unwrap().complete_on_prompt, Some(true));
    }

    #[test]
    fn test_resolved_defaults() {
        let config = ResolvedConfig::default();
        assert_eq!(config.host.command, "claude");
        assert_eq!(config.layout.columns, 3);
        assert_eq!(config.harness.stress_concurrency, 50);
        assert_eq!(config.output.retention_lines, 5_000);
        assert_eq!(config.output.max_line_bytes, 16 * 1024);
        assert_eq!(config.host.write_timeout_ms, 5_000);
    }

    #[test]
    fn test_empty_workspace_config_serializes_empty() {
        let json = serde_json::to_string(&WorkspaceConfig::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
