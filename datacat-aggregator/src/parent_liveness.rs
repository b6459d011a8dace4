//! Parent-process liveness probe (spec.md §4.1, §9).
//!
//! POSIX signal-0 on Unix-like systems; conservative (always alive) on
//! every other target, since Windows has no equivalent kill(pid, 0) trick
//! and the Store's same-machine re-registration heuristic becomes the
//! primary crash signal there.

#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn current_process_reports_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn an_implausible_pid_reports_dead() {
        assert!(!is_process_alive(u32::MAX - 1));
    }
}
