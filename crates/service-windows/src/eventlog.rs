//! Application event-log source registration.

use std::iter;

use tracing::debug;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, WIN32_ERROR};
use windows::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegDeleteTreeW, RegSetValueExW, HKEY, HKEY_LOCAL_MACHINE,
    KEY_SET_VALUE, REG_DWORD, REG_EXPAND_SZ, REG_OPTION_NON_VOLATILE,
};

use service_platform::{Result, ServiceError};

const APPLICATION_LOG: &str = r"SYSTEM\CurrentControlSet\Services\EventLog\Application";
const MESSAGE_FILE: &str = r"%SystemRoot%\System32\EventCreate.exe";
// error | warning | information
const TYPES_SUPPORTED: u32 = 7;

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(iter::once(0)).collect()
}

fn source_key(name: &str) -> Vec<u16> {
    wide(&format!(r"{}\{}", APPLICATION_LOG, name))
}

fn check(call: &str, status: WIN32_ERROR) -> Result<()> {
    status.ok().map_err(|e| ServiceError::invocation(call, e))
}

pub fn register_source(name: &str) -> Result<()> {
    let subkey = source_key(name);
    let mut key = HKEY::default();
    check("RegCreateKeyExW", unsafe {
        RegCreateKeyExW(
            HKEY_LOCAL_MACHINE,
            PCWSTR(subkey.as_ptr()),
            0,
            PCWSTR::null(),
            REG_OPTION_NON_VOLATILE,
            KEY_SET_VALUE,
            None,
            &mut key,
            None,
        )
    })?;

    let written = set_values(key);
    let _ = unsafe { RegCloseKey(key) };
    if written.is_ok() {
        debug!("registered event source {}", name);
    }
    written
}

fn set_values(key: HKEY) -> Result<()> {
    let file: Vec<u8> = wide(MESSAGE_FILE)
        .into_iter()
        .flat_map(u16::to_le_bytes)
        .collect();
    let file_value = wide("EventMessageFile");
    let types_value = wide("TypesSupported");

    check("RegSetValueExW EventMessageFile", unsafe {
        RegSetValueExW(key, PCWSTR(file_value.as_ptr()), 0, REG_EXPAND_SZ, Some(&file))
    })?;
    check("RegSetValueExW TypesSupported", unsafe {
        RegSetValueExW(
            key,
            PCWSTR(types_value.as_ptr()),
            0,
            REG_DWORD,
            Some(&TYPES_SUPPORTED.to_le_bytes()),
        )
    })
}

/// Remove the source. A source that was never registered is not an error.
pub fn remove_source(name: &str) -> Result<()> {
    let subkey = source_key(name);
    let status = unsafe { RegDeleteTreeW(HKEY_LOCAL_MACHINE, PCWSTR(subkey.as_ptr())) };
    if status == ERROR_FILE_NOT_FOUND {
        debug!("event source {} not registered", name);
        return Ok(());
    }
    check("RegDeleteTreeW", status)
}
