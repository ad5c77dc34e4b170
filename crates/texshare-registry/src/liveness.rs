//! Owner process liveness.
//!
//! Entries left behind by a crashed producer are detected lazily: whenever an
//! entry is looked up or a name collides, its owner pid is probed.

use std::fmt;
use std::sync::Arc;

pub trait ProcessProbe: Send + Sync + fmt::Debug {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Asks the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessProbe;

#[cfg(unix)]
impl ProcessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == 0 || pid > i32::MAX as u32 {
            return false;
        }
        // Signal 0 performs the permission and existence checks only.
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(target_os = "windows")]
impl ProcessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        use windows::Win32::Foundation::{CloseHandle, ERROR_ACCESS_DENIED, STILL_ACTIVE};
        use windows::Win32::System::Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        if pid == 0 {
            return false;
        }
        unsafe {
            let process = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
                Ok(handle) => handle,
                Err(e) => return e.code() == ERROR_ACCESS_DENIED.to_hresult(),
            };
            let mut code = 0u32;
            let alive = GetExitCodeProcess(process, &mut code).is_ok()
                && code == STILL_ACTIVE.0 as u32;
            let _ = CloseHandle(process);
            alive
        }
    }
}

/// Who a registry handle acts as: the pid written into entries it registers,
/// and the probe used to judge other entries' owners.
#[derive(Debug, Clone)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub probe: Arc<dyn ProcessProbe>,
}

impl ProcessIdentity {
    /// The calling process, probed through the OS.
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            probe: Arc::new(OsProcessProbe),
        }
    }

    pub fn with_probe(pid: u32, probe: Arc<dyn ProcessProbe>) -> Self {
        Self { pid, probe }
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        pid == self.pid || self.probe.is_alive(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn this_process_is_alive() {
        assert!(OsProcessProbe.is_alive(std::process::id()));
        assert!(!OsProcessProbe.is_alive(0));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!OsProcessProbe.is_alive(pid));
    }

    #[test]
    fn identity_trusts_its_own_pid() {
        #[derive(Debug)]
        struct NobodyAlive;
        impl ProcessProbe for NobodyAlive {
            fn is_alive(&self, _pid: u32) -> bool {
                false
            }
        }
        let identity = ProcessIdentity::with_probe(42, Arc::new(NobodyAlive));
        assert!(identity.is_alive(42));
        assert!(!identity.is_alive(43));
    }
}
