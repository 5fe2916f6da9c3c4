//! Hosting library loader
//!
//! Loads `hostfxr` from a .NET installation, resolves the exports needed to
//! run a component-hosted runtime and forwards the library's own error text
//! to the log.

use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use libloading::Library;

use crate::error::{DotNetError, Result};
use crate::ffi::*;

/// File name of the hosting library on this platform
#[cfg(target_os = "windows")]
pub const HOSTFXR_LIBRARY_NAME: &str = "hostfxr.dll";
/// File name of the hosting library on this platform
#[cfg(target_os = "macos")]
pub const HOSTFXR_LIBRARY_NAME: &str = "libhostfxr.dylib";
/// File name of the hosting library on this platform
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const HOSTFXR_LIBRARY_NAME: &str = "libhostfxr.so";

#[cfg(windows)]
type PdString = widestring::U16CString;
#[cfg(not(windows))]
type PdString = std::ffi::CString;

#[cfg(windows)]
fn pd_string(text: &str) -> Option<PdString> {
    widestring::U16CString::from_str(text).ok()
}

#[cfg(not(windows))]
fn pd_string(text: &str) -> Option<PdString> {
    std::ffi::CString::new(text).ok()
}

#[cfg(windows)]
fn pd_path(path: &Path) -> Result<PdString> {
    widestring::U16CString::from_os_str(path.as_os_str()).map_err(|_| DotNetError::InvalidPath(path.to_path_buf()))
}

#[cfg(not(windows))]
fn pd_path(path: &Path) -> Result<PdString> {
    path.to_str()
        .and_then(pd_string)
        .ok_or_else(|| DotNetError::InvalidPath(path.to_path_buf()))
}

/// # Safety
/// `text` must be a NUL-terminated platform string.
#[cfg(windows)]
unsafe fn pd_to_string(text: *const PdChar) -> String {
    widestring::U16CStr::from_ptr_str(text).to_string_lossy()
}

/// # Safety
/// `text` must be a NUL-terminated platform string.
#[cfg(not(windows))]
unsafe fn pd_to_string(text: *const PdChar) -> String {
    std::ffi::CStr::from_ptr(text).to_string_lossy().into_owned()
}

/// Error writer installed into the hosting library
unsafe extern "C" fn forward_host_error(message: *const PdChar) {
    if message.is_null() {
        return;
    }
    log::error!(target: "hostfxr", "{}", pd_to_string(message));
}

/// Resolved hosting library exports
#[derive(Debug, Clone, Copy)]
pub struct HostFxrExports {
    pub initialize_for_runtime_config: HostFxrInitializeForRuntimeConfigFn,
    pub get_runtime_delegate: HostFxrGetRuntimeDelegateFn,
    pub close: HostFxrCloseFn,
    pub set_error_writer: Option<HostFxrSetErrorWriterFn>,
}

impl HostFxrExports {
    /// Resolve the exports from a loaded library
    ///
    /// # Safety
    /// The library must be a `hostfxr` build exporting the expected signatures.
    unsafe fn resolve(library: &Library, path: &Path) -> Result<Self> {
        let missing = |symbol: &str| DotNetError::symbol_not_found(path.display().to_string(), symbol);

        let initialize_for_runtime_config = *library
            .get::<HostFxrInitializeForRuntimeConfigFn>(b"hostfxr_initialize_for_runtime_config\0")
            .map_err(|_| missing("hostfxr_initialize_for_runtime_config"))?;
        let get_runtime_delegate = *library
            .get::<HostFxrGetRuntimeDelegateFn>(b"hostfxr_get_runtime_delegate\0")
            .map_err(|_| missing("hostfxr_get_runtime_delegate"))?;
        let close = *library
            .get::<HostFxrCloseFn>(b"hostfxr_close\0")
            .map_err(|_| missing("hostfxr_close"))?;

        // Optional, older hosts may not export it
        let set_error_writer = library
            .get::<HostFxrSetErrorWriterFn>(b"hostfxr_set_error_writer\0")
            .ok()
            .map(|symbol| *symbol);

        Ok(Self {
            initialize_for_runtime_config,
            get_runtime_delegate,
            close,
            set_error_writer,
        })
    }
}

/// An initialized runtime context
pub struct RuntimeContext(NonNull<c_void>);

// Safety: the context handle is an opaque token, hostfxr does not tie it to a thread
unsafe impl Send for RuntimeContext {}

impl RuntimeContext {
    /// Wrap a raw context handle, `None` if null
    pub fn from_raw(handle: HostFxrHandle) -> Option<Self> {
        NonNull::new(handle).map(Self)
    }

    pub fn as_ptr(&self) -> HostFxrHandle {
        self.0.as_ptr()
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RuntimeContext").field(&self.0).finish()
    }
}

/// Owner of the loaded hosting library
pub struct HostFxr {
    library: Option<Library>,
    path: Option<PathBuf>,
    exports: Option<HostFxrExports>,
}

// Safety: the library handle and exports are plain function pointers
unsafe impl Send for HostFxr {}
unsafe impl Sync for HostFxr {}

impl HostFxr {
    /// Create an inactive loader
    pub fn new() -> Self {
        Self {
            library: None,
            path: None,
            exports: None,
        }
    }

    /// Create an active loader over already resolved exports
    pub fn from_exports(exports: HostFxrExports) -> Self {
        install_error_writer(&exports);
        Self {
            library: None,
            path: None,
            exports: Some(exports),
        }
    }

    /// Load the hosting library from `path` and resolve its exports.
    ///
    /// On failure the loader stays inactive.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if self.is_active() {
            log::warn!(target: "dotnet", "hostfxr is already loaded, ignoring '{}'", path.display());
            return Ok(());
        }

        let library = unsafe { Library::new(path).map_err(|e| DotNetError::load_error(path, e.to_string()))? };
        let exports = unsafe { HostFxrExports::resolve(&library, path)? };

        install_error_writer(&exports);

        log::info!(target: "dotnet", "Loaded hostfxr from '{}'", path.display());

        self.library = Some(library);
        self.path = Some(path.to_path_buf());
        self.exports = Some(exports);
        Ok(())
    }

    /// Check if the exports are available
    pub fn is_active(&self) -> bool {
        self.exports.is_some()
    }

    /// Path the library was loaded from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Release the library. Safe to call when inactive.
    pub fn unload(&mut self) {
        let Some(exports) = self.exports.take() else {
            return;
        };

        if let Some(set_error_writer) = exports.set_error_writer {
            unsafe { set_error_writer(None) };
        }

        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                log::warn!(target: "dotnet", "Failed to close hostfxr: {}", e);
            }
        }

        if let Some(path) = self.path.take() {
            log::info!(target: "dotnet", "Unloaded hostfxr from '{}'", path.display());
        }
    }

    fn exports(&self) -> Result<&HostFxrExports> {
        self.exports.as_ref().ok_or(DotNetError::HostNotActive)
    }

    /// Initialize a runtime context from a `runtimeconfig.json`
    pub fn init_for_runtime_config(&self, config_path: &Path) -> Result<RuntimeContext> {
        const OPERATION: &str = "hostfxr_initialize_for_runtime_config";

        let exports = self.exports()?;
        let config = pd_path(config_path)?;

        let mut handle: HostFxrHandle = ptr::null_mut();
        let code = unsafe { (exports.initialize_for_runtime_config)(config.as_ptr(), ptr::null(), &mut handle) };

        if let Err(e) = DotNetError::check(OPERATION, code) {
            if !handle.is_null() {
                unsafe { (exports.close)(handle) };
            }
            return Err(e);
        }

        log::debug!(target: "dotnet", "Initialized runtime context from '{}'", config_path.display());
        RuntimeContext::from_raw(handle).ok_or(DotNetError::HostCall { operation: OPERATION, code })
    }

    /// Load `assembly` into the context and resolve `method` of `type_name`,
    /// which must be marked `[UnmanagedCallersOnly]`
    pub fn load_runtime_and_get_function_pointer(
        &self,
        context: &RuntimeContext,
        assembly: &Path,
        type_name: &str,
        method: &str,
    ) -> Result<NonNull<c_void>> {
        let exports = self.exports()?;

        let mut delegate: *mut c_void = ptr::null_mut();
        let code = unsafe {
            (exports.get_runtime_delegate)(context.as_ptr(), HDT_LOAD_ASSEMBLY_AND_GET_FUNCTION_POINTER, &mut delegate)
        };
        DotNetError::check("hostfxr_get_runtime_delegate", code)?;
        if delegate.is_null() {
            return Err(DotNetError::HostCall { operation: "hostfxr_get_runtime_delegate", code });
        }

        let load_assembly: LoadAssemblyAndGetFunctionPointerFn = unsafe { std::mem::transmute(delegate) };

        let assembly_path = pd_path(assembly)?;
        let invalid = || DotNetError::NullEntryPoint { type_name: type_name.into(), method: method.into() };
        let type_name_pd = pd_string(type_name).ok_or_else(invalid)?;
        let method_pd = pd_string(method).ok_or_else(invalid)?;

        let mut entry_point: *mut c_void = ptr::null_mut();
        let code = unsafe {
            load_assembly(
                assembly_path.as_ptr(),
                type_name_pd.as_ptr(),
                method_pd.as_ptr(),
                UNMANAGEDCALLERSONLY_METHOD,
                ptr::null_mut(),
                &mut entry_point,
            )
        };
        DotNetError::check("load_assembly_and_get_function_pointer", code)?;

        NonNull::new(entry_point).ok_or_else(invalid)
    }

    /// Close a runtime context
    pub fn close_runtime(&self, context: RuntimeContext) -> Result<()> {
        let exports = self.exports()?;
        let code = unsafe { (exports.close)(context.as_ptr()) };
        DotNetError::check("hostfxr_close", code)
    }
}

fn install_error_writer(exports: &HostFxrExports) {
    if let Some(set_error_writer) = exports.set_error_writer {
        unsafe { set_error_writer(Some(forward_host_error)) };
    }
}

impl Default for HostFxr {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostFxr {
    fn drop(&mut self) {
        self.unload();
    }
}

impl fmt::Debug for HostFxr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFxr")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}
