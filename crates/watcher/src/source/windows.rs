//! `ReadDirectoryChangesExW` with overlapped I/O and completion routines
//!
//! Completion routines are queued to the thread that issued the read and run
//! while that thread sits in an alertable wait. The worker thread issues every
//! read and is the only one that waits, so completions are collected in a
//! thread-local inbox and handed out by [`ChangeSource::wait`]. A semaphore
//! lets other threads interrupt the wait.

use super::{ChangeSource, Completion, CompletionStatus};
use crate::path::WatchPath;
use crate::request::RequestId;
use std::cell::RefCell;
use std::io;
use std::ptr;
use tracing::trace;
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_OPERATION_ABORTED, ERROR_SUCCESS, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadDirectoryChangesExW, ReadDirectoryNotifyExtendedInformation,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED, FILE_LIST_DIRECTORY,
    FILE_NOTIFY_CHANGE_CREATION, FILE_NOTIFY_CHANGE_DIR_NAME, FILE_NOTIFY_CHANGE_FILE_NAME,
    FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
    OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{
    CreateSemaphoreW, ReleaseSemaphore, WaitForSingleObjectEx, INFINITE,
};
use windows_sys::Win32::System::IO::{CancelIo, OVERLAPPED};

const NOTIFY_FILTER: u32 = FILE_NOTIFY_CHANGE_CREATION
    | FILE_NOTIFY_CHANGE_LAST_WRITE
    | FILE_NOTIFY_CHANGE_FILE_NAME
    | FILE_NOTIFY_CHANGE_DIR_NAME;

thread_local! {
    static INBOX: RefCell<Vec<Completion>> = const { RefCell::new(Vec::new()) };
}

/// Native change source for Windows
#[derive(Debug)]
pub struct ReadDirectoryChanges {
    wakeup: HANDLE,
}

// The semaphore handle may be signalled and waited on from any thread.
unsafe impl Send for ReadDirectoryChanges {}
unsafe impl Sync for ReadDirectoryChanges {}

impl ReadDirectoryChanges {
    pub fn new() -> io::Result<Self> {
        let wakeup = unsafe { CreateSemaphoreW(ptr::null(), 0, 1, ptr::null()) };
        if wakeup.is_null() || wakeup == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { wakeup })
    }
}

impl Drop for ReadDirectoryChanges {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.wakeup);
        }
    }
}

/// Open directory handle and the OVERLAPPED its reads use
///
/// The OVERLAPPED is boxed so its address stays fixed while a read is pending.
pub struct NativeDirectory {
    handle: HANDLE,
    overlapped: Box<OVERLAPPED>,
}

// Created on the caller's thread and moved to the worker before any read is issued.
unsafe impl Send for NativeDirectory {}

impl NativeDirectory {
    fn close(&mut self) {
        if self.handle != INVALID_HANDLE_VALUE {
            unsafe {
                CloseHandle(self.handle);
            }
            self.handle = INVALID_HANDLE_VALUE;
        }
    }
}

impl Drop for NativeDirectory {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChangeSource for ReadDirectoryChanges {
    type Directory = NativeDirectory;

    fn open(&self, path: &WatchPath) -> io::Result<NativeDirectory> {
        let wide = path.to_wide_nul();
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                FILE_LIST_DIRECTORY,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }

        Ok(NativeDirectory {
            handle,
            // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state
            overlapped: Box::new(unsafe { std::mem::zeroed() }),
        })
    }

    unsafe fn read(
        &self,
        directory: &mut NativeDirectory,
        id: RequestId,
        buffer: &mut [u8],
        recursive: bool,
    ) -> io::Result<()> {
        // With a completion routine the event member is ours to use; it carries
        // the request id back to `on_read_complete`.
        *directory.overlapped = std::mem::zeroed();
        directory.overlapped.hEvent = id.as_u64() as usize as HANDLE;

        let ok = ReadDirectoryChangesExW(
            directory.handle,
            buffer.as_mut_ptr().cast(),
            buffer.len() as u32,
            i32::from(recursive),
            NOTIFY_FILTER,
            ptr::null_mut(),
            &mut *directory.overlapped,
            Some(on_read_complete),
            ReadDirectoryNotifyExtendedInformation,
        );
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn cancel(&self, directory: &mut NativeDirectory) {
        if directory.handle != INVALID_HANDLE_VALUE {
            // Reads were issued by this (the worker) thread, so CancelIo reaches them.
            unsafe {
                CancelIo(directory.handle);
            }
        }
        directory.close();
    }

    fn wait(&self, completions: &mut Vec<Completion>) {
        unsafe {
            WaitForSingleObjectEx(self.wakeup, INFINITE, 1);
        }
        INBOX.with(|inbox| completions.append(&mut inbox.borrow_mut()));
    }

    fn wake(&self) {
        // Fails harmlessly when the semaphore is already signalled
        unsafe {
            ReleaseSemaphore(self.wakeup, 1, ptr::null_mut());
        }
    }
}

unsafe extern "system" fn on_read_complete(
    error_code: u32,
    bytes_transferred: u32,
    overlapped: *mut OVERLAPPED,
) {
    let id = RequestId::from_u64((*overlapped).hEvent as usize as u64);
    let status = match error_code {
        ERROR_SUCCESS => CompletionStatus::Transferred(bytes_transferred),
        ERROR_OPERATION_ABORTED => CompletionStatus::Aborted,
        code => CompletionStatus::Failed(io::Error::from_raw_os_error(code as i32)),
    };
    trace!("Read completion for request {}: {:?}", id, status);
    INBOX.with(|inbox| inbox.borrow_mut().push(Completion::new(id, status)));
}
