// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Performance score for a stress run.
//!
//! `100 × (0.5·successRate + 0.25·memHeadroom + 0.25·cpuHeadroom)` where a
//! headroom is `1 − min(1, peak / budget)`. The result is clamped to
//! `[0, 100]` and never decreases when spawns succeed more often or when
//! peak usage drops.

const SUCCESS_WEIGHT: f64 = 0.5;
const MEMORY_WEIGHT: f64 = 0.25;
const CPU_WEIGHT: f64 = 0.25;

/// Inputs to [`performance_score`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub requested: usize,
    pub spawned: usize,
    pub peak_memory_mb: f64,
    pub memory_budget_mb: f64,
    pub peak_cpu_percent: f64,
    pub cpu_budget_percent: f64,
}

pub fn performance_score(inputs: &ScoreInputs) -> f64 {
    let success_rate = if inputs.requested == 0 {
        1.0
    } else {
        (inputs.spawned.min(inputs.requested) as f64) / inputs.requested as f64
    };
    let score = 100.0
        * (SUCCESS_WEIGHT * success_rate
            + MEMORY_WEIGHT * headroom(inputs.peak_memory_mb, inputs.memory_budget_mb)
            + CPU_WEIGHT * headroom(inputs.peak_cpu_percent, inputs.cpu_budget_percent));
    score.clamp(0.0, 100.0)
}

/// `1 − min(1, peak / budget)`; unusable figures count as no headroom.
fn headroom(peak: f64, budget: f64) -> f64 {
    if !peak.is_finite() || !budget.is_finite() || budget <= 0.0 {
        return 0.0;
    }
    1.0 - (peak.max(0.0) / budget).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(spawned: usize, mem: f64, cpu: f64) -> ScoreInputs {
        ScoreInputs {
            requested: 50,
            spawned,
            peak_memory_mb: mem,
            memory_budget_mb: 2048.0,
            peak_cpu_percent: cpu,
            cpu_budget_percent: 80.0,
        }
    }

    #[test]
    fn test_perfect_and_worst() {
        assert_eq!(performance_score(&inputs(50, 0.0, 0.0)), 100.0);
        assert_eq!(performance_score(&inputs(0, 4096.0, 100.0)), 0.0);
    }

    #[test]
    fn test_known_value() {
        // 0.5*0.9 + 0.25*0.5 + 0.25*0.75
        let score = performance_score(&inputs(45, 1024.0, 20.0));
        assert!((score - 76.25).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic_in_failures() {
        let mut previous = f64::MAX;
        for spawned in (0..=50).rev() {
            let score = performance_score(&inputs(spawned, 512.0, 40.0));
            assert!(score <= previous, "score rose as failures grew: {spawned}");
            previous = score;
        }
    }

    #[test]
    fn test_monotonic_in_memory_and_cpu() {
        let mut previous = f64::MAX;
        for step in 0..=60 {
            let score = performance_score(&inputs(50, step as f64 * 50.0, 30.0));
            assert!(score <= previous);
            previous = score;
        }
        let mut previous = f64::MAX;
        for step in 0..=60 {
            let score = performance_score(&inputs(50, 300.0, step as f64 * 2.0));
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn test_degenerate_inputs_stay_in_range() {
        let cases = [
            ScoreInputs { requested: 0, ..inputs(0, 0.0, 0.0) },
            inputs(80, 0.0, 0.0),
            inputs(50, f64::NAN, f64::INFINITY),
            ScoreInputs { memory_budget_mb: 0.0, ..inputs(50, 10.0, 10.0) },
            inputs(50, -5.0, -1.0),
        ];
        for case in cases {
            let score = performance_score(&case);
            assert!((0.0..=100.0).contains(&score), "{case:?} -> {score}");
        }
    }
}
