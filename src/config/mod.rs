// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for CCTM.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.cctm/config.json
//! - Workspace config: .cctm.json, .cctm/config.json, .cctm/config.yaml or cctm.config.json
//! - Local config: .cctm.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

// Re-export public types
pub use loader::{
    get_example_config, get_global_config_dir, get_global_config_path, init_config,
    load_config_file, load_global_config, load_local_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{
    AttentionConfig, DispatchConfig, HarnessConfig, HostConfig, LayoutConfig, OutputConfig,
    ResolvedAttentionConfig, ResolvedConfig, ResolvedDispatchConfig, ResolvedHarnessConfig,
    ResolvedHostConfig, ResolvedLayoutConfig, ResolvedOutputConfig, WorkspaceConfig,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
///
/// This is the main entry point for configuration loading. The merged
/// result is validated before it is returned.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let config = merge_config(global, workspace, local, cli_options);
    validate_config(&config)?;
    Ok(config)
}

/// Check a resolved configuration for values the orchestrator cannot run with.
pub fn validate_config(config: &ResolvedConfig) -> Result<(), ConfigError> {
    if config.host.command.trim().is_empty() {
        return Err(ConfigError::invalid("host.command", "must not be empty"));
    }
    if config.layout.columns == 0 || config.layout.rows == 0 {
        return Err(ConfigError::invalid(
            "layout",
            format!(
                "grid must be at least 1x1 (got {}x{})",
                config.layout.columns, config.layout.rows
            ),
        ));
    }
    if !(0.0..=1.0).contains(&config.layout.opacity) {
        return Err(ConfigError::invalid(
            "layout.opacity",
            format!("{} is outside 0.0..=1.0", config.layout.opacity),
        ));
    }
    if config.output.retention_lines == 0 {
        return Err(ConfigError::invalid("output.retentionLines", "must be positive"));
    }
    if config.output.max_line_bytes == 0 {
        return Err(ConfigError::invalid("output.maxLineBytes", "must be positive"));
    }
    if config.host.write_timeout_ms == 0 {
        return Err(ConfigError::invalid("host.writeTimeoutMs", "must be positive"));
    }
    if config.harness.sample_interval_ms == 0 {
        return Err(ConfigError::invalid("harness.sampleIntervalMs", "must be positive"));
    }
    if config.harness.memory_budget_mb <= 0.0 || config.harness.cpu_budget_percent <= 0.0 {
        return Err(ConfigError::invalid("harness", "resource budgets must be positive"));
    }

    let patterns = std::iter::once(&config.dispatch.completion_marker)
        .chain(config.dispatch.error_marker.iter())
        .chain(config.attention.extra_patterns.iter());
    for pattern in patterns {
        if let Err(e) = regex::Regex::new(pattern) {
            return Err(ConfigError::invalid("pattern", format!("{pattern}: {e}")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_no_files() {
        let temp = TempDir::new().unwrap();
        let result = load_config(temp.path(), CliOptions::default());
        assert!(result.is_ok());
        assert!(!result.unwrap().host.command.is_empty());
    }

    #[test]
    fn test_load_config_with_workspace_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".cctm.json"),
            r#"{"host": {"command": "codex"}, "dispatch": {"timeoutMs": 1500}}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert_eq!(config.dispatch.timeout_ms, 1500);
    }

    #[test]
    fn test_load_config_cli_override() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".cctm.json"),
            r#"{"layout": {"columns": 2}}"#,
        )
        .unwrap();

        let cli = CliOptions {
            columns: Some(5),
            ..Default::default()
        };

        let config = load_config(temp.path(), cli).unwrap();
        assert_eq!(config.layout.columns, 5); // CLI wins
    }

    #[test]
    fn test_validate_rejects_zero_grid() {
        let mut config = ResolvedConfig::default();
        config.layout.rows = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_regex() {
        let mut config = ResolvedConfig::default();
        config.dispatch.completion_marker = "([unclosed".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_opacity_out_of_range() {
        let mut config = ResolvedConfig::default();
        config.layout.opacity = 1.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_output_and_write_bounds() {
        let mut config = ResolvedConfig::default();
        config.output.max_line_bytes = 0;
        assert!(validate_config(&config).is_err());

        let mut config = ResolvedConfig::default();
        config.host.write_timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }
}
