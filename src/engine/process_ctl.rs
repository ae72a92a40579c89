// OS-level process suspend/continue for pause without CPU burn

use anyhow::{Result, bail};

/// Freeze a running child process. The process keeps its state and
/// file handles but consumes no CPU until continued.
#[cfg(unix)]
pub fn suspend(pid: u32) -> Result<()> {
    signal(pid, libc::SIGSTOP)
}

/// Un-freeze a suspended child process
#[cfg(unix)]
pub fn resume(pid: u32) -> Result<()> {
    signal(pid, libc::SIGCONT)
}

#[cfg(unix)]
fn signal(pid: u32, sig: libc::c_int) -> Result<()> {
    // Safety: kill(2) with a valid signal number; the pid came from a
    // Child we own
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc != 0 {
        bail!(
            "signal {} to pid {} failed: {}",
            sig,
            pid,
            std::io::Error::last_os_error()
        );
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn suspend(_pid: u32) -> Result<()> {
    bail!("process suspend is not supported on this platform")
}

#[cfg(not(unix))]
pub fn resume(_pid: u32) -> Result<()> {
    bail!("process resume is not supported on this platform")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    #[test]
    fn test_suspend_and_resume_child() {
        let mut child = Command::new("sleep")
            .arg("5")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        suspend(pid).expect("suspend");
        resume(pid).expect("resume");

        child.kill().ok();
        child.wait().ok();
    }

    #[test]
    fn test_kill_while_suspended_terminates_promptly() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sleep");
        let pid = child.id();

        suspend(pid).expect("suspend");

        // SIGKILL must take effect even while the process is stopped
        let start = Instant::now();
        child.kill().expect("kill");
        child.wait().expect("wait");
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
