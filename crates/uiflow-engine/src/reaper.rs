use crate::process;
use regex::Regex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uiflow_common::config::SessionConfig;

/// A process the sweep considers orphaned.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cmdline: String,
    pub age: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub found: Vec<ProcessInfo>,
    pub terminated: Vec<u32>,
    pub killed: Vec<u32>,
}

/// Finds and kills browser or bridge processes left behind by sessions that
/// never released. Runs independently of any session.
pub struct OrphanReaper {
    patterns: Vec<Regex>,
    max_age: Duration,
    grace: Duration,
}

impl OrphanReaper {
    pub fn new(config: &SessionConfig) -> Result<Self, regex::Error> {
        let patterns = config
            .process_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            max_age: Duration::from_secs(config.orphan_max_age_secs),
            grace: Duration::from_millis(config.grace_period_ms),
        })
    }

    pub fn matches(&self, cmdline: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(cmdline))
    }

    /// Matching processes older than the age limit, excluding this one.
    pub fn find_orphans(&self) -> Vec<ProcessInfo> {
        let own = std::process::id();
        list_processes()
            .into_iter()
            .filter(|p| p.pid != own && p.age >= self.max_age && self.matches(&p.cmdline))
            .collect()
    }

    pub async fn sweep(&self) -> SweepReport {
        let found = self.find_orphans();
        let mut report = SweepReport::default();
        if found.is_empty() {
            debug!("no orphaned processes");
            return report;
        }

        for p in &found {
            info!(pid = p.pid, age_secs = p.age.as_secs(), cmd = %p.cmdline, "terminating orphan");
            if process::terminate(p.pid) {
                report.terminated.push(p.pid);
            }
        }

        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline && report.terminated.iter().any(|&pid| process::is_alive(pid)) {
            sleep(Duration::from_millis(100)).await;
        }
        for &pid in &report.terminated {
            if process::is_alive(pid) {
                warn!(pid, "orphan ignored SIGTERM, killing");
                if process::force_kill(pid) {
                    report.killed.push(pid);
                }
            }
        }

        report.found = found;
        report
    }

    /// Sweeps every `interval` until `token` is cancelled.
    pub fn spawn(self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(interval) => {
                        let report = self.sweep().await;
                        if !report.found.is_empty() {
                            info!(
                                found = report.found.len(),
                                killed = report.killed.len(),
                                "orphan sweep finished"
                            );
                        }
                    }
                }
            }
            debug!("orphan reaper stopped");
        })
    }
}

#[cfg(target_os = "linux")]
fn list_processes() -> Vec<ProcessInfo> {
    let Some(uptime) = std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|s| s.split_whitespace().next()?.parse::<f64>().ok())
    else {
        warn!("cannot read /proc/uptime, skipping sweep");
        return Vec::new();
    };
    let ticks_per_sec = clock_ticks();

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
            let raw = std::fs::read(entry.path().join("cmdline")).ok()?;
            if raw.is_empty() {
                return None;
            }
            let cmdline = String::from_utf8_lossy(&raw)
                .split('\0')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            let stat = std::fs::read_to_string(entry.path().join("stat")).ok()?;
            let started = process::start_ticks(&stat)? as f64 / ticks_per_sec;
            let age = Duration::from_secs_f64((uptime - started).max(0.0));
            Some(ProcessInfo { pid, cmdline, age })
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn clock_ticks() -> f64 {
    use nix::unistd::{SysconfVar, sysconf};

    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as f64,
        _ => 100.0,
    }
}

#[cfg(not(target_os = "linux"))]
fn list_processes() -> Vec<ProcessInfo> {
    debug!("orphan sweep is only supported on Linux");
    Vec::new()
}
