//! Windows process access: module enumeration and memory reads.

use std::ffi::c_void;
use std::mem;

use tracing::debug;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW, TH32CS_SNAPMODULE,
    TH32CS_SNAPMODULE32,
};
use windows::Win32::System::Threading::{
    GetCurrentProcessId, OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

use super::ReadMemory;
use crate::error::{Error, Result};
use crate::image::{ModuleImage, ModuleProvider};

/// An open handle to a process with read access.
pub struct ProcessHandle {
    pub pid: u32,
    handle: HANDLE,
}

// SAFETY: the handle is only used for ReadProcessMemory, which Windows allows
// from any thread concurrently.
unsafe impl Send for ProcessHandle {}
unsafe impl Sync for ProcessHandle {}

impl ProcessHandle {
    pub fn open(pid: u32) -> Result<Self> {
        // SAFETY: OpenProcess has no memory-safety preconditions.
        let handle = unsafe { OpenProcess(PROCESS_VM_READ | PROCESS_QUERY_INFORMATION, false, pid) }
            .map_err(|e| Error::Io(std::io::Error::other(format!("OpenProcess({pid}): {e}"))))?;
        Ok(Self { pid, handle })
    }

    /// Open the process this library is loaded into.
    pub fn current() -> Result<Self> {
        // SAFETY: GetCurrentProcessId has no preconditions.
        let pid = unsafe { GetCurrentProcessId() };
        Self::open(pid)
    }

    /// Base address and size of a loaded module, by case-insensitive name.
    fn module_range(&self, name: &str) -> Result<(u64, u64)> {
        // SAFETY: snapshot handle is closed below on every path.
        let snapshot =
            unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, self.pid) }
                .map_err(|e| {
                    Error::Io(std::io::Error::other(format!(
                        "CreateToolhelp32Snapshot: {e}"
                    )))
                })?;

        let mut entry = MODULEENTRY32W {
            dwSize: mem::size_of::<MODULEENTRY32W>() as u32,
            ..Default::default()
        };

        let mut found = None;
        // SAFETY: entry is a properly sized MODULEENTRY32W.
        let mut ok = unsafe { Module32FirstW(snapshot, &mut entry) }.is_ok();
        while ok {
            let len = entry
                .szModule
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(entry.szModule.len());
            let module_name = String::from_utf16_lossy(&entry.szModule[..len]);

            if module_name.eq_ignore_ascii_case(name) {
                found = Some((entry.modBaseAddr as u64, entry.modBaseSize as u64));
                break;
            }
            // SAFETY: same as above.
            ok = unsafe { Module32NextW(snapshot, &mut entry) }.is_ok();
        }

        // SAFETY: snapshot came from CreateToolhelp32Snapshot.
        let _ = unsafe { CloseHandle(snapshot) };

        found.ok_or_else(|| Error::ModuleNotFound(name.to_string()))
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // SAFETY: handle came from OpenProcess and is closed exactly once.
        let _ = unsafe { CloseHandle(self.handle) };
    }
}

impl ReadMemory for ProcessHandle {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        let mut bytes_read = 0usize;

        // SAFETY: buffer is valid for `size` bytes; the source address belongs to
        // the target process and is never dereferenced here.
        unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                size,
                Some(&mut bytes_read),
            )
        }
        .map_err(|e| Error::MemoryReadFailed {
            address,
            message: format!("ReadProcessMemory failed: {e}"),
        })?;

        if bytes_read != size {
            return Err(Error::MemoryReadFailed {
                address,
                message: format!("expected {} bytes, got {}", size, bytes_read),
            });
        }

        Ok(buffer)
    }
}

impl ModuleProvider for ProcessHandle {
    fn find_module(&self, name: &str) -> Result<ModuleImage> {
        let (base, size) = self.module_range(name)?;
        debug!("Found module {} at {:#x} (size {:#x})", name, base, size);

        let image = ModuleImage::from_pe_headers(self, name, base)?;
        if image.size() != size {
            debug!(
                "Module {} header size {:#x} differs from loader size {:#x}",
                name,
                image.size(),
                size
            );
        }
        Ok(image)
    }
}
