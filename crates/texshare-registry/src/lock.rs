//! Cross-process lock serialising directory mutations.
//!
//! Held only while slots or the active pointer are being rewritten, never
//! across GPU work. An in-process mutex sits in front of the OS lock so that
//! threads sharing one registry handle also exclude each other.

use std::io;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::error::{RegistryError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct SegmentLock {
    local: Mutex<OsLock>,
    timeout: Duration,
}

pub struct SegmentGuard<'a> {
    os: MutexGuard<'a, OsLock>,
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        self.os.release();
    }
}

impl SegmentLock {
    pub fn open(segment_name: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            local: Mutex::new(OsLock::open(segment_name)?),
            timeout,
        })
    }

    pub fn acquire(&self) -> Result<SegmentGuard<'_>> {
        let deadline = Instant::now() + self.timeout;
        let os = self
            .local
            .try_lock_until(deadline)
            .ok_or(RegistryError::LockTimeout)?;
        if !os.acquire(deadline)? {
            warn!("registry lock still held after {:?}", self.timeout);
            return Err(RegistryError::LockTimeout);
        }
        Ok(SegmentGuard { os })
    }
}

#[cfg(unix)]
mod imp {
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;
    use std::path::PathBuf;

    use super::*;

    pub struct OsLock {
        file: File,
    }

    pub fn lock_path(segment_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{segment_name}.lock"))
    }

    impl OsLock {
        pub fn open(segment_name: &str) -> io::Result<Self> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(lock_path(segment_name))?;
            Ok(Self { file })
        }

        /// Poll a non-blocking `flock` until `deadline`.
        pub fn acquire(&self, deadline: Instant) -> io::Result<bool> {
            loop {
                let rc =
                    unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
                if rc == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EWOULDBLOCK) {
                    return Err(err);
                }
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }

        pub fn release(&self) {
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }

        pub fn remove(segment_name: &str) -> io::Result<()> {
            match std::fs::remove_file(lock_path(segment_name)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        }
    }
}

#[cfg(target_os = "windows")]
mod imp {
    use windows::core::HSTRING;
    use windows::Win32::Foundation::{
        CloseHandle, HANDLE, WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
    };
    use windows::Win32::System::Threading::{CreateMutexW, ReleaseMutex, WaitForSingleObject};

    use super::*;

    pub struct OsLock {
        mutex: HANDLE,
    }

    // SAFETY: the mutex handle is only used behind the in-process lock.
    unsafe impl Send for OsLock {}

    impl OsLock {
        pub fn open(segment_name: &str) -> io::Result<Self> {
            let name = HSTRING::from(format!("Local\\{segment_name}-lock"));
            let mutex = unsafe { CreateMutexW(None, false, &name) }.map_err(io::Error::from)?;
            Ok(Self { mutex })
        }

        pub fn acquire(&self, deadline: Instant) -> io::Result<bool> {
            let wait = deadline.saturating_duration_since(Instant::now());
            let status = unsafe { WaitForSingleObject(self.mutex, wait.as_millis() as u32) };
            match status {
                WAIT_OBJECT_0 => Ok(true),
                WAIT_ABANDONED => {
                    warn!("registry lock was abandoned by a crashed process");
                    Ok(true)
                }
                WAIT_TIMEOUT => Ok(false),
                _ => Err(io::Error::last_os_error()),
            }
        }

        pub fn release(&self) {
            unsafe {
                let _ = ReleaseMutex(self.mutex);
            }
        }

        pub fn remove(_segment_name: &str) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for OsLock {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.mutex);
            }
        }
    }
}

pub use imp::OsLock;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_handle_times_out_while_first_holds() {
        let name = format!("txs-lock-{}", std::process::id());
        let first = SegmentLock::open(&name, Duration::from_millis(50)).unwrap();
        let second = SegmentLock::open(&name, Duration::from_millis(20)).unwrap();

        // The Windows mutex is owned per thread, so contend from another one.
        let contend = || std::thread::scope(|s| s.spawn(|| second.acquire().is_ok()).join().unwrap());

        let guard = first.acquire().unwrap();
        assert!(!contend());
        drop(guard);
        assert!(contend());

        OsLock::remove(&name).unwrap();
    }
}
