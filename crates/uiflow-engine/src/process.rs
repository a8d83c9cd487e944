//! Signalling helpers for processes a session owns or the reaper finds.

/// Whether `pid` names one process we may signal: not init, not ourselves,
/// and not a value that `kill(2)` would read as a process group.
pub fn is_signallable(pid: u32) -> bool {
    pid > 1 && i32::try_from(pid).is_ok() && pid != std::process::id()
}

/// Asks the process to exit. Returns false when it could not be signalled.
pub fn terminate(pid: u32) -> bool {
    if !is_signallable(pid) {
        return false;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

pub fn force_kill(pid: u32) -> bool {
    if !is_signallable(pid) {
        return false;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Whether the process still exists and has not merely become a zombie.
pub fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => kill(Pid::from_raw(raw), None).is_ok() && !is_zombie(pid),
            _ => false,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| process_state(&stat))
        .is_some_and(|state| state == 'Z' || state == 'X')
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Fields of `/proc/<pid>/stat` after the parenthesised command name,
/// which may itself contain spaces and parentheses.
pub(crate) fn stat_fields(stat: &str) -> Option<Vec<&str>> {
    let close = stat.rfind(')')?;
    Some(stat[close + 1..].split_whitespace().collect())
}

pub(crate) fn process_state(stat: &str) -> Option<char> {
    stat_fields(stat)?.first()?.chars().next()
}

/// Start time in clock ticks since boot (field 22 of `stat`).
pub(crate) fn start_ticks(stat: &str) -> Option<u64> {
    stat_fields(stat)?.get(19)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "4242 (chrome (renderer)) S 1 4242 4242 0 -1 4194560 1200 0 0 0 \
                        15 7 0 0 20 0 12 0 987654 123456789 4000 18446744073709551615";

    #[test]
    fn test_stat_parsing_skips_command_name() {
        assert_eq!(process_state(STAT), Some('S'));
        assert_eq!(start_ticks(STAT), Some(987654));
        assert_eq!(start_ticks("garbage"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn test_group_and_self_pids_are_never_signalled() {
        for pid in [0, 1, u32::MAX, i32::MAX as u32 + 1, std::process::id()] {
            assert!(!is_signallable(pid), "pid {}", pid);
            assert!(!terminate(pid));
            assert!(!force_kill(pid));
        }
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
        assert!(is_signallable(4242));
    }
}
