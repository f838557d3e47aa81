//! Pluggable custom-transport backend loaded from a shared library at
//! node-creation time.
//!
//! The underlying ABI is a C function-pointer table; that's wrapped
//! here behind a safe loader so a backend missing a required symbol is
//! a load-time error rather than a null function pointer discovered at
//! call time. This module is the load path;
//! `crate::transport::CustomTransport` is the `Transport` facade built
//! on top of it.

use libloading::{Library, Symbol};

use edgelink_core::{ErrorKind, Result};

/// Trampoline a custom backend calls to deliver an out-of-band event
/// (raw edge-data frame bytes) back into the node, paired with the
/// opaque `user_data` the node handed it in `set_event_cb`.
pub type EventTrampoline = extern "C" fn(user_data: *mut std::ffi::c_void, data: *const u8, len: usize);

/// The ABI a custom-transport shared library must export: one
/// `extern "C"` constructor named `edgelink_custom_transport_create`
/// returning an owned, opaque handle plus the function table operating
/// on it (the variant set `{create, close, start, stop, connect,
/// subscribe, is_connected, discover, set_event_cb, send_data,
/// set_info, get_info}`; `create` is the entry point itself rather
/// than a table slot). Every entry is optional; a backend that doesn't
/// implement a given operation leaves it null, and the call surfaces
/// as `ErrorKind::NotSupported` instead of crashing.
#[repr(C)]
pub struct CustomTransportVTable {
    pub handle: *mut std::ffi::c_void,
    pub start: Option<extern "C" fn(*mut std::ffi::c_void, *const std::os::raw::c_char, u16) -> i32>,
    pub stop: Option<extern "C" fn(*mut std::ffi::c_void) -> i32>,
    pub connect: Option<extern "C" fn(*mut std::ffi::c_void, *const std::os::raw::c_char, u16) -> i32>,
    pub disconnect: Option<extern "C" fn(*mut std::ffi::c_void) -> i32>,
    pub subscribe: Option<extern "C" fn(*mut std::ffi::c_void) -> i32>,
    pub discover: Option<extern "C" fn(*mut std::ffi::c_void) -> i32>,
    pub is_connected: Option<extern "C" fn(*mut std::ffi::c_void) -> i32>,
    pub set_event_cb:
        Option<extern "C" fn(*mut std::ffi::c_void, *mut std::ffi::c_void, EventTrampoline) -> i32>,
    pub send_data: Option<extern "C" fn(*mut std::ffi::c_void, *const u8, usize) -> i32>,
    pub set_info: Option<
        extern "C" fn(*mut std::ffi::c_void, *const std::os::raw::c_char, *const std::os::raw::c_char) -> i32,
    >,
    pub get_info: Option<
        extern "C" fn(*mut std::ffi::c_void, *const std::os::raw::c_char, *mut u8, usize) -> i32,
    >,
    pub close: Option<extern "C" fn(*mut std::ffi::c_void) -> i32>,
}

type CreateFn = unsafe extern "C" fn() -> CustomTransportVTable;

const ENTRY_SYMBOL: &[u8] = b"edgelink_custom_transport_create";

/// A loaded custom-transport plugin. Keeps the `Library` alive for as
/// long as the vtable's function pointers may be called — dropping the
/// library first would leave dangling function pointers.
pub struct CustomBackend {
    _library: Library,
    vtable: CustomTransportVTable,
}

// SAFETY: the loaded backend's contract requires its vtable functions
// be safe to call from any thread; `handle` is only ever touched
// through those functions, never read directly by this crate.
unsafe impl Send for CustomBackend {}
unsafe impl Sync for CustomBackend {}

impl CustomBackend {
    /// Loads `path` and resolves its single entry point. A missing
    /// library or missing symbol is a load-time error, never a panic,
    /// per the REDESIGN FLAGS guidance.
    pub fn load(path: &str) -> Result<Self> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| ErrorKind::not_supported(format!("failed to load custom transport {}: {}", path, e)))?;

        let vtable = unsafe {
            let create: Symbol<CreateFn> = library.get(ENTRY_SYMBOL).map_err(|e| {
                ErrorKind::not_supported(format!(
                    "custom transport {} missing entry point {}: {}",
                    path,
                    String::from_utf8_lossy(ENTRY_SYMBOL),
                    e
                ))
            })?;
            create()
        };

        Ok(CustomBackend { _library: library, vtable })
    }

    pub fn start(&self, local_host: &str, local_port: u16) -> Result<()> {
        let f = self
            .vtable
            .start
            .ok_or_else(|| ErrorKind::not_supported("custom transport does not implement start"))?;
        let host = std::ffi::CString::new(local_host)
            .map_err(|_| ErrorKind::invalid_parameter("local host contains a NUL byte"))?;
        check(f(self.vtable.handle, host.as_ptr(), local_port))
    }

    pub fn stop(&self) -> Result<()> {
        match self.vtable.stop {
            Some(f) => check(f(self.vtable.handle)),
            None => Ok(()),
        }
    }

    pub fn subscribe(&self) -> Result<()> {
        let f = self
            .vtable
            .subscribe
            .ok_or_else(|| ErrorKind::not_supported("custom transport does not implement subscribe"))?;
        check(f(self.vtable.handle))
    }

    pub fn discover(&self) -> Result<()> {
        let f = self
            .vtable
            .discover
            .ok_or_else(|| ErrorKind::not_supported("custom transport does not implement discover"))?;
        check(f(self.vtable.handle))
    }

    /// Registers a trampoline the backend may call later (from any
    /// thread) to deliver an asynchronous event. `user_data` is handed
    /// back verbatim on every call and is never read by this crate.
    pub fn set_event_cb(&self, user_data: *mut std::ffi::c_void, trampoline: EventTrampoline) -> Result<()> {
        let f = self
            .vtable
            .set_event_cb
            .ok_or_else(|| ErrorKind::not_supported("custom transport does not implement set_event_cb"))?;
        check(f(self.vtable.handle, user_data, trampoline))
    }

    pub fn set_info(&self, key: &str, value: &str) -> Result<()> {
        let f = self
            .vtable
            .set_info
            .ok_or_else(|| ErrorKind::not_supported("custom transport does not implement set_info"))?;
        let key = std::ffi::CString::new(key).map_err(|_| ErrorKind::invalid_parameter("key contains a NUL byte"))?;
        let value =
            std::ffi::CString::new(value).map_err(|_| ErrorKind::invalid_parameter("value contains a NUL byte"))?;
        check(f(self.vtable.handle, key.as_ptr(), value.as_ptr()))
    }

    /// Fetches a backend-defined info string into a fixed scratch
    /// buffer; the backend is expected to NUL-terminate its answer
    /// within it.
    pub fn get_info(&self, key: &str) -> Result<Option<String>> {
        let f = match self.vtable.get_info {
            Some(f) => f,
            None => return Ok(None),
        };
        let key = std::ffi::CString::new(key).map_err(|_| ErrorKind::invalid_parameter("key contains a NUL byte"))?;
        let mut buf = [0u8; 256];
        check(f(self.vtable.handle, key.as_ptr(), buf.as_mut_ptr(), buf.len()))?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(Some(String::from_utf8_lossy(&buf[..end]).into_owned()))
    }

    pub fn connect(&self, dest_host: &str, dest_port: u16) -> Result<()> {
        let f = self
            .vtable
            .connect
            .ok_or_else(|| ErrorKind::not_supported("custom transport does not implement connect"))?;
        let host = std::ffi::CString::new(dest_host)
            .map_err(|_| ErrorKind::invalid_parameter("dest host contains a NUL byte"))?;
        check(f(self.vtable.handle, host.as_ptr(), dest_port))
    }

    pub fn disconnect(&self) -> Result<()> {
        let f = self
            .vtable
            .disconnect
            .ok_or_else(|| ErrorKind::not_supported("custom transport does not implement disconnect"))?;
        check(f(self.vtable.handle))
    }

    pub fn send_data(&self, blob: &[u8]) -> Result<()> {
        let f = self
            .vtable
            .send_data
            .ok_or_else(|| ErrorKind::not_supported("custom transport does not implement send_data"))?;
        check(f(self.vtable.handle, blob.as_ptr(), blob.len()))
    }

    pub fn is_connected(&self) -> bool {
        match self.vtable.is_connected {
            Some(f) => f(self.vtable.handle) != 0,
            None => false,
        }
    }

    pub fn close(&self) -> Result<()> {
        match self.vtable.close {
            Some(f) => check(f(self.vtable.handle)),
            None => Ok(()),
        }
    }
}

fn check(status: i32) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(ErrorKind::connection_failure(format!(
            "custom transport call returned status {}",
            status
        )))
    }
}

impl Drop for CustomBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
