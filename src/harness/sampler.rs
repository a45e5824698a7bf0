// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! CPU and memory sampling of this process and its session processes.

use std::time::Instant;

use serde::Serialize;
use sysinfo::{
    CpuRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
};
use tokio::sync::Mutex;
use tracing::trace;

use crate::timed;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One resource reading across a set of processes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// CPU use normalized to the whole machine (0-100).
    pub cpu_percent: f64,
    pub memory_mb: f64,
    /// Processes that were found and measured.
    pub processes: usize,
    pub taken_at: Instant,
}

/// Peak and average over a series of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    pub peak_cpu_percent: f64,
    pub avg_cpu_percent: f64,
    pub peak_memory_mb: f64,
    pub avg_memory_mb: f64,
    pub sample_count: usize,
}

impl ResourceSummary {
    pub fn from_samples(samples: &[ResourceSample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        Self {
            peak_cpu_percent: samples.iter().map(|s| s.cpu_percent).fold(0.0, f64::max),
            avg_cpu_percent: samples.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
            peak_memory_mb: samples.iter().map(|s| s.memory_mb).fold(0.0, f64::max),
            avg_memory_mb: samples.iter().map(|s| s.memory_mb).sum::<f64>() / n,
            sample_count: samples.len(),
        }
    }
}

/// Samples the orchestrator process plus a caller-supplied set of pids.
///
/// CPU figures come from the delta between consecutive refreshes, so the
/// first reading of a newly seen process is zero.
pub struct ResourceSampler {
    system: Mutex<System>,
    own_pid: Option<Pid>,
    cpu_count: usize,
}

impl ResourceSampler {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()),
        );
        let cpu_count = system.cpus().len().max(1);
        Self {
            system: Mutex::new(system),
            own_pid: sysinfo::get_current_pid().ok(),
            cpu_count,
        }
    }

    pub fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    /// Take one sample of this process and `session_pids`.
    pub async fn sample(&self, session_pids: &[u32]) -> ResourceSample {
        let _timer = timed!("harness.sample");
        let mut pids: Vec<Pid> = session_pids.iter().map(|p| Pid::from_u32(*p)).collect();
        if let Some(own) = self.own_pid {
            pids.push(own);
        }

        let mut system = self.system.lock().await;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let mut cpu = 0.0f64;
        let mut memory = 0u64;
        let mut processes = 0;
        for pid in &pids {
            if let Some(process) = system.process(*pid) {
                cpu += f64::from(process.cpu_usage());
                memory += process.memory();
                processes += 1;
            }
        }

        let sample = ResourceSample {
            cpu_percent: (cpu / self.cpu_count as f64).clamp(0.0, 100.0),
            memory_mb: memory as f64 / BYTES_PER_MB,
            processes,
            taken_at: Instant::now(),
        };
        trace!(
            cpu_percent = sample.cpu_percent,
            memory_mb = sample.memory_mb,
            processes,
            "Resource sample"
        );
        sample
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, mem: f64) -> ResourceSample {
        ResourceSample {
            cpu_percent: cpu,
            memory_mb: mem,
            processes: 1,
            taken_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_sample_own_process() {
        let sampler = ResourceSampler::new();
        assert!(sampler.cpu_count() > 0);
        let s = sampler.sample(&[]).await;
        assert_eq!(s.processes, 1);
        assert!(s.memory_mb > 0.0);
        assert!((0.0..=100.0).contains(&s.cpu_percent));
    }

    #[tokio::test]
    async fn test_unknown_pids_are_skipped() {
        let sampler = ResourceSampler::new();
        let s = sampler.sample(&[u32::MAX - 7]).await;
        assert_eq!(s.processes, 1);
    }

    #[test]
    fn test_summary() {
        let summary =
            ResourceSummary::from_samples(&[sample(10.0, 100.0), sample(30.0, 300.0)]);
        assert_eq!(summary.peak_cpu_percent, 30.0);
        assert_eq!(summary.avg_cpu_percent, 20.0);
        assert_eq!(summary.peak_memory_mb, 300.0);
        assert_eq!(summary.avg_memory_mb, 200.0);
        assert_eq!(summary.sample_count, 2);
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(ResourceSummary::from_samples(&[]), ResourceSummary::default());
    }
}
