//! Process source backed by ToolHelp snapshots on Windows

use crate::poll::{self, Snapshot};
use crate::source::{ProcessEvent, ProcessSource, Subscription};
use netfence_core::{FenceError, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Handle;
use windows::core::PWSTR;
use windows::Win32::Foundation::{
    CloseHandle, GetLastError, BOOL, ERROR_INSUFFICIENT_BUFFER, HANDLE,
};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};

const MAX_PATH_CHARS: usize = 32768;

struct HandleGuard(HANDLE);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

/// Every (pid, image name) pair in a fresh process snapshot
fn process_entries() -> Result<Vec<(u32, String)>> {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }.map_err(|e| {
        FenceError::ProcessSource(format!("CreateToolhelp32Snapshot failed: {}", e.message()))
    })?;
    let _guard = HandleGuard(snapshot);

    let mut entry = PROCESSENTRY32W {
        dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };
    let mut entries = Vec::new();

    let mut has_entry = unsafe { Process32FirstW(snapshot, &mut entry) }.is_ok();
    while has_entry {
        // pid 0 is the idle process
        if entry.th32ProcessID != 0 {
            entries.push((entry.th32ProcessID, wide_to_string(&entry.szExeFile)));
        }
        has_entry = unsafe { Process32NextW(snapshot, &mut entry) }.is_ok();
    }
    Ok(entries)
}

fn image_path(pid: u32) -> Option<PathBuf> {
    let handle =
        unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), pid) }.ok()?;
    let _guard = HandleGuard(handle);

    let mut cap: usize = 260;
    loop {
        let mut buffer = vec![0u16; cap];
        let mut size = buffer.len() as u32;
        let result = unsafe {
            QueryFullProcessImageNameW(
                handle,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut size,
            )
        };

        if result.is_ok() && size > 0 {
            return Some(PathBuf::from(String::from_utf16_lossy(
                &buffer[..size as usize],
            )));
        }

        let err = unsafe { GetLastError() };
        if err == ERROR_INSUFFICIENT_BUFFER && cap < MAX_PATH_CHARS {
            cap = (cap * 2).min(MAX_PATH_CHARS);
            continue;
        }
        return None;
    }
}

/// Polls the system process list; paths come from `QueryFullProcessImageNameW`
///
/// Processes owned by other users may hide their image path unless the
/// caller is elevated; those events fall back to the watcher's path lookup
/// and are dropped if it also fails.
#[derive(Debug, Clone)]
pub struct ToolhelpSource {
    poll_interval: Duration,
}

impl ToolhelpSource {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Snapshot for ToolhelpSource {
    fn pids(&self) -> Result<HashSet<u32>> {
        Ok(process_entries()?.into_iter().map(|(pid, _)| pid).collect())
    }

    fn describe(&self, pid: u32) -> ProcessEvent {
        let path = image_path(pid);
        let name = path
            .as_deref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        ProcessEvent::new(pid, name, path)
    }
}

impl ProcessSource for ToolhelpSource {
    fn running(&self) -> Result<Vec<ProcessEvent>> {
        let mut entries = process_entries()?;
        entries.sort_unstable_by_key(|(pid, _)| *pid);
        Ok(entries
            .into_iter()
            .map(|(pid, name)| ProcessEvent::new(pid, name, image_path(pid)))
            .collect())
    }

    fn executable_path(&self, pid: u32) -> Option<PathBuf> {
        image_path(pid)
    }

    fn subscribe(&self, runtime: &Handle) -> Result<Subscription> {
        poll::subscribe(self.clone(), self.poll_interval, runtime)
    }
}
