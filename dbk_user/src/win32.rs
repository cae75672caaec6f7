//! The real OS backend.
use std::ffi::c_void;

use log::trace;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    CloseHandle, GetLastError, GENERIC_READ, GENERIC_WRITE, HANDLE, LUID,
};
use windows::Win32::Security::{
    AdjustTokenPrivileges, LookupPrivilegeValueW, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED,
    TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Threading::{CreateEventW, GetCurrentProcess, OpenProcessToken};
use windows::Win32::System::IO::DeviceIoControl;

use crate::os::{
    AdjustError, Adjustment, DeviceIo, KernelObject, Luid, OsError, Platform, SecurityContext,
    ERROR_INVALID_PARAMETER, ERROR_NOT_ALL_ASSIGNED,
};
use crate::uni::WideString;

/// Recover the Win32 code from an `HRESULT_FROM_WIN32` value.
fn os_error(err: windows::core::Error) -> OsError {
    let hr = err.code().0 as u32;
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        OsError(hr & 0xFFFF)
    } else {
        OsError(hr)
    }
}

fn buffer_len(len: usize) -> Result<u32, OsError> {
    u32::try_from(len).map_err(|_| OsError(ERROR_INVALID_PARAMETER))
}

/// Closes the wrapped handle on drop.
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // Nothing useful can be done if this fails.
        let _ = unsafe { CloseHandle(self.0) };
    }
}

pub struct Win32Device(OwnedHandle);

impl DeviceIo for Win32Device {
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<usize, OsError> {
        let in_len = buffer_len(input.len())?;
        let out_len = buffer_len(output.len())?;
        let in_ptr = (!input.is_empty()).then(|| input.as_ptr() as *const c_void);
        let out_ptr = (!output.is_empty()).then(|| output.as_mut_ptr() as *mut c_void);

        let mut returned = 0u32;
        unsafe {
            DeviceIoControl(
                self.0 .0,
                code,
                in_ptr,
                in_len,
                out_ptr,
                out_len,
                Some(&mut returned),
                None,
            )
        }
        .map_err(os_error)?;
        trace!("DeviceIoControl(0x{code:08X}) returned {returned} bytes");
        Ok(returned as usize)
    }
}

pub struct Win32Event(OwnedHandle);

impl KernelObject for Win32Event {
    fn raw(&self) -> u64 {
        self.0 .0 .0 as u64
    }
}

/// Handles, events and token adjustment through the Win32 API.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32;

impl Platform for Win32 {
    type Device = Win32Device;
    type Event = Win32Event;

    fn open_device(&self, path: &str) -> Result<Win32Device, OsError> {
        let path = WideString::new(path);
        let handle = unsafe {
            CreateFileW(
                path.as_pcwstr(),
                GENERIC_READ.0 | GENERIC_WRITE.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        }
        .map_err(os_error)?;
        Ok(Win32Device(OwnedHandle(handle)))
    }

    fn create_event(&self, name: &str) -> Result<Win32Event, OsError> {
        let name = WideString::new(name);
        // Manual reset, initially not signalled.
        let handle = unsafe { CreateEventW(None, true, false, name.as_pcwstr()) }.map_err(os_error)?;
        Ok(Win32Event(OwnedHandle(handle)))
    }

    fn close_handle(&self, raw: u64) -> Result<(), OsError> {
        unsafe { CloseHandle(HANDLE(raw as isize)) }.map_err(os_error)
    }
}

impl SecurityContext for Win32 {
    fn lookup_privilege(&self, name: &str) -> Result<Luid, OsError> {
        let name = WideString::new(name);
        let mut luid = LUID::default();
        unsafe { LookupPrivilegeValueW(PCWSTR::null(), name.as_pcwstr(), &mut luid) }
            .map_err(os_error)?;
        Ok(Luid {
            low: luid.LowPart,
            high: luid.HighPart,
        })
    }

    fn enable_privilege(&self, luid: Luid) -> Result<Adjustment, AdjustError> {
        let mut token = HANDLE::default();
        unsafe {
            OpenProcessToken(
                GetCurrentProcess(),
                TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
                &mut token,
            )
        }
        .map_err(|e| AdjustError::OpenToken(os_error(e)))?;
        let token = OwnedHandle(token);

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: LUID {
                    LowPart: luid.low,
                    HighPart: luid.high,
                },
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };
        unsafe { AdjustTokenPrivileges(token.0, false, Some(&privileges), 0, None, None) }
            .map_err(|e| AdjustError::Adjust(os_error(e)))?;

        // The call reports success even when the token does not hold the
        // privilege; only the last error tells the two apart.
        if unsafe { GetLastError() }.0 == ERROR_NOT_ALL_ASSIGNED {
            Ok(Adjustment::NotAllAssigned)
        } else {
            Ok(Adjustment::Complete)
        }
    }
}
