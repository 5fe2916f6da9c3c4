//! Managed runtime session
//!
//! A session owns one runtime context. Loading it initializes the context
//! from the loader's runtime config, resolves the loader entry point and
//! hands it the native delegate table. The loader fills in the managed
//! delegate table in return.

use std::path::Path;

use widestring::U16CString;

use crate::delegates::NATIVE_DELEGATES;
use crate::error::{DotNetError, Result};
use crate::ffi::{ManagedDelegateTable, ManagedEntryPointFn};
use crate::hostfxr::{HostFxr, RuntimeContext};
use crate::settings::DotNetSettings;

/// The loaded runtime, if any
#[derive(Debug, Default)]
pub struct RuntimeSession {
    context: Option<RuntimeContext>,
}

impl RuntimeSession {
    pub fn new() -> Self {
        Self { context: None }
    }

    /// Check if a runtime context is open
    pub fn is_active(&self) -> bool {
        self.context.is_some()
    }

    /// Start the runtime and run the loader entry point.
    ///
    /// `managed` must stay at a fixed address while the runtime is loaded,
    /// managed code keeps writing through it.
    pub fn load(&mut self, host: &HostFxr, settings: &DotNetSettings, managed: &mut ManagedDelegateTable) -> Result<()> {
        if self.is_active() {
            return Err(DotNetError::RuntimeAlreadyLoaded);
        }
        if !host.is_active() {
            return Err(DotNetError::HostNotActive);
        }

        let context = host.init_for_runtime_config(&settings.loader_config_path())?;

        let entry_point = match host.load_runtime_and_get_function_pointer(
            &context,
            &settings.loader_assembly_path(),
            settings.entry_type(),
            settings.entry_method(),
        ) {
            Ok(entry_point) => entry_point,
            Err(e) => {
                if let Err(close) = host.close_runtime(context) {
                    log::warn!(target: "dotnet", "Failed to close runtime context: {}", close);
                }
                return Err(e);
            }
        };

        let plugins_path = managed_path(&settings.managed_plugins_path())?;
        let plugins_len = plugins_path.len() as i32;

        // Safety: the loader resolved this method as `[UnmanagedCallersOnly]`
        // with the entry point signature
        let entry_point: ManagedEntryPointFn = unsafe { std::mem::transmute(entry_point.as_ptr()) };
        unsafe { entry_point(plugins_path.as_ptr(), plugins_len, &NATIVE_DELEGATES, managed) };

        let missing = managed.missing();
        if !missing.is_empty() {
            log::warn!(target: "dotnet", "Managed loader did not provide: {}", missing.join(", "));
        }

        self.context = Some(context);
        Ok(())
    }

    /// Close the runtime context. Safe to call when inactive.
    pub fn unload(&mut self, host: &HostFxr) -> Result<()> {
        let Some(context) = self.context.take() else {
            return Ok(());
        };
        host.close_runtime(context)
    }
}

fn managed_path(path: &Path) -> Result<U16CString> {
    U16CString::from_os_str(path.as_os_str()).map_err(|_| DotNetError::InvalidPath(path.to_path_buf()))
}
