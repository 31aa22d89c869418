// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows implementation of the process-local counting semaphore.
// An unnamed kernel semaphore via `CreateSemaphoreW`.

use std::io;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows_sys::Win32::System::Threading::{
    CreateSemaphoreW, ReleaseSemaphore, WaitForSingleObject, INFINITE,
};

// Upper bound on the permit count.  Matches `LONG_MAX` for the Win32 API.
const MAX_COUNT: i32 = i32::MAX;

pub struct PlatformSemaphore {
    handle: HANDLE,
}

unsafe impl Send for PlatformSemaphore {}
unsafe impl Sync for PlatformSemaphore {}

impl PlatformSemaphore {
    pub fn new(initial: u32) -> io::Result<Self> {
        let initial = i32::try_from(initial)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let handle = unsafe { CreateSemaphoreW(ptr::null(), initial, MAX_COUNT, ptr::null()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    fn wait_ms(&self, ms: u32) -> io::Result<bool> {
        let ret = unsafe { WaitForSingleObject(self.handle, ms) };
        match ret {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub fn wait(&self) -> io::Result<()> {
        self.wait_ms(INFINITE).map(|_| ())
    }

    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        // INFINITE is a sentinel, so clamp just below it.
        let ms = timeout.as_millis().min(u128::from(INFINITE - 1)) as u32;
        self.wait_ms(ms)
    }

    pub fn try_wait(&self) -> io::Result<bool> {
        self.wait_ms(0)
    }

    pub fn post(&self, count: u32) -> io::Result<()> {
        if count == 0 {
            return Ok(());
        }
        let count = i32::try_from(count)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let ok = unsafe { ReleaseSemaphore(self.handle, count, ptr::null_mut()) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PlatformSemaphore {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}
