// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Project-type detection from marker files.
//!
//! Used only to pick a default session title. Detection never fails:
//! anything unreadable or unrecognized is [`ProjectType::Unknown`].

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Rust,
    Node,
    Python,
    Go,
    Java,
    Ruby,
    Dotnet,
    Php,
    Unknown,
}

impl ProjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Node => "node",
            Self::Python => "python",
            Self::Go => "go",
            Self::Java => "java",
            Self::Ruby => "ruby",
            Self::Dotnet => "dotnet",
            Self::Php => "php",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker files checked in order; the first hit wins.
const MARKERS: &[(&str, ProjectType)] = &[
    ("Cargo.toml", ProjectType::Rust),
    ("package.json", ProjectType::Node),
    ("pyproject.toml", ProjectType::Python),
    ("setup.py", ProjectType::Python),
    ("requirements.txt", ProjectType::Python),
    ("go.mod", ProjectType::Go),
    ("pom.xml", ProjectType::Java),
    ("build.gradle", ProjectType::Java),
    ("build.gradle.kts", ProjectType::Java),
    ("Gemfile", ProjectType::Ruby),
    ("composer.json", ProjectType::Php),
];

/// Detect the project type of `dir`.
pub fn detect_project_type(dir: &Path) -> ProjectType {
    for (marker, project) in MARKERS {
        if dir.join(marker).is_file() {
            return *project;
        }
    }

    // .NET projects are named after the project, so match on extension
    let Ok(entries) = std::fs::read_dir(dir) else {
        return ProjectType::Unknown;
    };
    let is_dotnet = entries.flatten().any(|entry| {
        entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "csproj" | "fsproj" | "sln"))
    });
    if is_dotnet {
        ProjectType::Dotnet
    } else {
        ProjectType::Unknown
    }
}

/// Default title: `"<dir-name> (<project-type>)"`.
pub fn default_title(dir: &Path, project: ProjectType) -> String {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string());
    format!("{} ({})", name, project)
}
