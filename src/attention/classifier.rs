// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pattern-based attention classifier.

use std::time::Duration;

use regex::{Regex, RegexSet};

use super::{AttentionClassifier, AttentionInput, AttentionSignal};

/// Activity indicators on the last line: the process is still working.
const BUSY_PATTERNS: &[&str] = &[
    r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]",
    r"^\s*[✻✽✶✳✢·*]\s+\S.*(…|\.\.\.)",
    r"(?i)esc to interrupt",
    r"(?i)\bthinking\b.*(…|\.\.\.)",
    r"(?i)^\s*(working|running|loading|processing|compiling)\b.*(…|\.\.\.)\s*$",
];

/// Prompts that block until answered, wherever they sit in the tail.
const BLOCKING_PATTERNS: &[&str] = &[
    r"(?i)\(y/n\)",
    r"(?i)\[y/n\]",
    r"(?i)\(yes/no\)",
    r"(?i)do you want to (proceed|continue|make this edit|create)",
    r"(?i)press (enter|return|any key) to continue",
    r"(?i)^\s*(│\s*)?allow\b.*\?\s*(│\s*)?$",
    r"(?i)password\s*:\s*$",
    r"(?i)passphrase.*:\s*$",
];

/// Weak prompt markers on the last line; only trusted after quiescence.
const WEAK_PATTERNS: &[&str] = &[
    r"^\s*(│\s*)?[>❯›]\s*(│\s*)?$",
    r"[>❯›$#]\s*$",
    r"\?\s*$",
    r"(?i)waiting for (your )?input",
];

/// Default [`AttentionClassifier`]: three regex families checked in order.
///
/// 1. busy markers on the last line → [`AttentionSignal::Busy`]
/// 2. blocking prompts in the tail → [`AttentionSignal::WaitingForInput`]
/// 3. weak markers on the last line, once quiet for `quiescence`
///    → [`AttentionSignal::WaitingForInput`]
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    busy: RegexSet,
    blocking: Vec<Regex>,
    weak: Vec<Regex>,
    quiescence: Duration,
}

impl PatternClassifier {
    /// Build the classifier, adding `extra_blocking` to the blocking family.
    pub fn new(extra_blocking: &[String], quiescence: Duration) -> Result<Self, regex::Error> {
        let busy = RegexSet::new(BUSY_PATTERNS)?;
        let blocking = BLOCKING_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(extra_blocking.iter().cloned())
            .map(|p| Regex::new(&p))
            .collect::<Result<Vec<_>, _>>()?;
        let weak = WEAK_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            busy,
            blocking,
            weak,
            quiescence,
        })
    }

    pub fn quiescence(&self) -> Duration {
        self.quiescence
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        // Built-in patterns are literals
        Self::new(&[], Duration::from_millis(1500)).unwrap()
    }
}

impl AttentionClassifier for PatternClassifier {
    fn classify(&self, input: &AttentionInput<'_>) -> AttentionSignal {
        let Some(last) = input.tail.iter().rev().find(|line| !line.trim().is_empty()) else {
            return AttentionSignal::Indeterminate;
        };

        if self.busy.is_match(last) {
            return AttentionSignal::Busy;
        }

        for line in input.tail.iter().rev() {
            if let Some(pattern) = self.blocking.iter().find(|re| re.is_match(line)) {
                return AttentionSignal::WaitingForInput {
                    reason: format!("prompt matched /{}/", pattern.as_str()),
                };
            }
        }

        if input.quiet_for >= self.quiescence {
            if let Some(pattern) = self.weak.iter().find(|re| re.is_match(last)) {
                return AttentionSignal::WaitingForInput {
                    reason: format!(
                        "quiet for {}ms after /{}/",
                        input.quiet_for.as_millis(),
                        pattern.as_str()
                    ),
                };
            }
        }

        AttentionSignal::Indeterminate
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(lines: &[&str], quiet_ms: u64) -> AttentionSignal {
        let tail: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        PatternClassifier::default().classify(&AttentionInput {
            tail: &tail,
            quiet_for: Duration::from_millis(quiet_ms),
        })
    }

    #[test]
    fn test_blocking_prompts_fire_immediately() {
        for prompt in [
            "Overwrite file? (y/n) ",
            "Continue [Y/n]",
            "Do you want to proceed?",
            "Press Enter to continue",
            "Allow edit to src/main.rs?",
            "Password: ",
        ] {
            assert!(
                classify(&["some output", prompt], 0).is_waiting(),
                "{prompt}"
            );
        }
    }

    #[test]
    fn test_blocking_prompt_earlier_in_tail() {
        let signal = classify(&["Do you want to proceed?", "❯ 1. Yes", "  2. No"], 0);
        assert!(signal.is_waiting());
    }

    #[test]
    fn test_busy_wins_over_stale_prompt() {
        let signal = classify(&["Continue? (y/n)", "✻ Thinking… (esc to interrupt)"], 5000);
        assert_eq!(signal, AttentionSignal::Busy);
    }

    #[test]
    fn test_weak_marker_needs_quiescence() {
        assert_eq!(classify(&["build finished", "> "], 100), AttentionSignal::Indeterminate);
        assert!(classify(&["build finished", "> "], 2000).is_waiting());
        assert!(classify(&["What should I do next?"], 2000).is_waiting());
    }

    #[test]
    fn test_plain_output_is_indeterminate() {
        assert_eq!(classify(&["compiling crate", "done"], 10_000), AttentionSignal::Indeterminate);
        assert_eq!(classify(&[], 10_000), AttentionSignal::Indeterminate);
        assert_eq!(classify(&["", "   "], 10_000), AttentionSignal::Indeterminate);
    }

    #[test]
    fn test_extra_patterns_extend_blocking_family() {
        let classifier =
            PatternClassifier::new(&["(?i)approve plan".to_string()], Duration::from_secs(1))
                .unwrap();
        let tail = vec!["Approve plan to start".to_string()];
        let signal = classifier.classify(&AttentionInput {
            tail: &tail,
            quiet_for: Duration::ZERO,
        });
        assert!(signal.is_waiting());
    }

    #[test]
    fn test_invalid_extra_pattern_is_rejected() {
        assert!(PatternClassifier::new(&["(unclosed".to_string()], Duration::ZERO).is_err());
    }
}
