//! Named shared-memory mapping holding the directory.
//!
//! Opening never initialises anything: the caller holds the registry lock and
//! decides from the header whether the segment is fresh.

use std::io;
use std::sync::atomic::AtomicU64;

/// A mapped segment, viewed as 64-bit words.
pub struct Segment {
    ptr: *mut u8,
    len: usize,
    #[cfg(target_os = "windows")]
    mapping: windows::Win32::Foundation::HANDLE,
}

// SAFETY: the mapping is only accessed through `AtomicU64`s.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    pub fn words(&self) -> &[AtomicU64] {
        unsafe { std::slice::from_raw_parts(self.ptr as *const AtomicU64, self.len / 8) }
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(unix)]
mod imp {
    use std::ffi::CString;

    use super::*;

    fn shm_name(name: &str) -> io::Result<CString> {
        CString::new(format!("/{name}")).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    impl Segment {
        /// Open `name`, creating it with `create_len` zeroed bytes if it does
        /// not exist or is still empty.
        pub fn open_or_create(name: &str, create_len: usize) -> io::Result<Self> {
            let c_name = shm_name(name)?;
            unsafe {
                let fd = libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_CREAT | libc::O_RDWR,
                    0o600 as libc::c_uint,
                );
                if fd < 0 {
                    return Err(io::Error::last_os_error());
                }
                let result = Self::map_fd(fd, create_len);
                libc::close(fd);
                result
            }
        }

        unsafe fn map_fd(fd: libc::c_int, create_len: usize) -> io::Result<Self> {
            let mut stat: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut stat) != 0 {
                return Err(io::Error::last_os_error());
            }
            let mut len = stat.st_size as usize;
            if len == 0 {
                if libc::ftruncate(fd, create_len as libc::off_t) != 0 {
                    return Err(io::Error::last_os_error());
                }
                len = create_len;
            }
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                ptr: ptr as *mut u8,
                len,
            })
        }

        /// Remove the name. Processes that still map the segment keep it.
        pub fn unlink(name: &str) -> io::Result<()> {
            let c_name = shm_name(name)?;
            if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(err);
                }
            }
            Ok(())
        }
    }

    impl Drop for Segment {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }
}

#[cfg(target_os = "windows")]
mod imp {
    use windows::core::HSTRING;
    use windows::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
    use windows::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, VirtualQuery, FILE_MAP_ALL_ACCESS,
        MEMORY_BASIC_INFORMATION, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
    };

    use super::*;

    impl Segment {
        /// Open `name` in the session namespace, creating a zeroed mapping of
        /// `create_len` bytes if none exists.
        pub fn open_or_create(name: &str, create_len: usize) -> io::Result<Self> {
            let wide = HSTRING::from(format!("Local\\{name}"));
            unsafe {
                let mapping = CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    None,
                    PAGE_READWRITE,
                    (create_len as u64 >> 32) as u32,
                    create_len as u32,
                    &wide,
                )
                .map_err(io::Error::from)?;

                let view = MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, 0);
                if view.Value.is_null() {
                    let err = io::Error::last_os_error();
                    let _ = CloseHandle(mapping);
                    return Err(err);
                }

                // An existing mapping keeps its own size; the view covers it.
                let mut info = MEMORY_BASIC_INFORMATION::default();
                VirtualQuery(
                    Some(view.Value),
                    &mut info,
                    std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                );
                Ok(Self {
                    ptr: view.Value as *mut u8,
                    len: info.RegionSize,
                    mapping,
                })
            }
        }

        /// Named mappings disappear with their last handle.
        pub fn unlink(_name: &str) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for Segment {
        fn drop(&mut self) {
            unsafe {
                let _ = UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                    Value: self.ptr as *mut std::ffi::c_void,
                });
                let _ = CloseHandle(self.mapping);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn two_mappings_share_memory() {
        let name = format!("txs-shm-{}", std::process::id());
        let a = Segment::open_or_create(&name, 4096).unwrap();
        let b = Segment::open_or_create(&name, 8192).unwrap();
        assert_eq!(b.len(), 4096, "existing segment keeps its size");

        a.words()[3].store(0xfeed, Ordering::SeqCst);
        assert_eq!(b.words()[3].load(Ordering::SeqCst), 0xfeed);

        Segment::unlink(&name).unwrap();
        Segment::unlink(&name).unwrap();
    }
}
