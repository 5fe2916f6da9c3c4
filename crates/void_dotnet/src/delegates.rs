//! Native delegates called by managed code
//!
//! The callbacks have a fixed shape without a context argument, so they reach
//! the class bridge through a single binding that [`crate::DotNetModule`]
//! installs while the runtime is loaded.

use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use parking_lot::RwLock;
use void_core::ClassObject;
use widestring::U16Str;

use crate::class_bridge::ClassBridge;
use crate::error::BridgeError;
use crate::ffi::{FfiManagedClassDescriptor, NativeDelegateTable};

/// Log target for text sent by managed code
pub const MANAGED_LOG_TARGET: &str = "dotnet::managed";

/// The table handed to the managed loader
pub static NATIVE_DELEGATES: NativeDelegateTable = NativeDelegateTable {
    log: managed_log,
    outer_register_internal,
    inner_register_internal,
    register_managed_class,
};

static CLASS_BRIDGE: RwLock<Option<Arc<ClassBridge>>> = RwLock::new(None);

/// Route class registration callbacks to `bridge`
pub fn bind_class_bridge(bridge: Arc<ClassBridge>) {
    if CLASS_BRIDGE.write().replace(bridge).is_some() {
        log::warn!(target: "dotnet", "Replaced the bound class bridge");
    }
}

/// Stop routing class registration callbacks
pub fn unbind_class_bridge() -> Option<Arc<ClassBridge>> {
    CLASS_BRIDGE.write().take()
}

/// The currently bound class bridge
pub fn bound_class_bridge() -> Option<Arc<ClassBridge>> {
    CLASS_BRIDGE.read().clone()
}

/// Managed log verbosity
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedVerbosity {
    Fatal = 1,
    Error = 2,
    Warning = 3,
    Display = 4,
    Log = 5,
    Verbose = 6,
    VeryVerbose = 7,
}

impl ManagedVerbosity {
    /// Level the text is logged at
    pub fn level(self) -> log::Level {
        match self {
            ManagedVerbosity::Fatal | ManagedVerbosity::Error => log::Level::Error,
            ManagedVerbosity::Warning => log::Level::Warn,
            ManagedVerbosity::Display => log::Level::Info,
            ManagedVerbosity::Log => log::Level::Debug,
            ManagedVerbosity::Verbose | ManagedVerbosity::VeryVerbose => log::Level::Trace,
        }
    }
}

impl TryFrom<u8> for ManagedVerbosity {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            1 => ManagedVerbosity::Fatal,
            2 => ManagedVerbosity::Error,
            3 => ManagedVerbosity::Warning,
            4 => ManagedVerbosity::Display,
            5 => ManagedVerbosity::Log,
            6 => ManagedVerbosity::Verbose,
            7 => ManagedVerbosity::VeryVerbose,
            other => return Err(other),
        })
    }
}

unsafe extern "C" fn managed_log(verbosity: u8, text: *const u16, length: i32) {
    let Ok(verbosity) = ManagedVerbosity::try_from(verbosity) else {
        return;
    };
    if text.is_null() || length <= 0 {
        return;
    }

    let text = U16Str::from_ptr(text, length as usize).to_string_lossy();
    log::log!(target: MANAGED_LOG_TARGET, verbosity.level(), "{}", text);
}

unsafe extern "C" fn outer_register_internal(descriptor: *mut FfiManagedClassDescriptor) -> *mut ClassObject {
    dispatch("outer_register_internal", |bridge| bridge.outer_register(descriptor))
        .map_or(ptr::null_mut(), |class| class.as_ptr())
}

unsafe extern "C" fn inner_register_internal(descriptor: *mut FfiManagedClassDescriptor) -> *mut ClassObject {
    dispatch("inner_register_internal", |bridge| bridge.inner_register(descriptor))
        .map_or(ptr::null_mut(), |class| class.as_ptr())
}

unsafe extern "C" fn register_managed_class(descriptor: *mut FfiManagedClassDescriptor) {
    dispatch("register_managed_class", |bridge| bridge.register(descriptor));
}

/// Run `call` against the bound bridge.
///
/// A missing parent class aborts the process; other failures are logged.
fn dispatch<T>(operation: &str, call: impl FnOnce(&ClassBridge) -> Result<T, BridgeError>) -> Option<T> {
    // The binding lock is released before calling in, accessors re-enter here
    let Some(bridge) = bound_class_bridge() else {
        log::error!(target: "dotnet", "{}: {}", operation, BridgeError::NoClassHost);
        return None;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| call(&bridge))) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e @ BridgeError::ParentClassNotFound { .. })) => {
            log::error!(target: "dotnet", "Fatal error in {}: {}", operation, e);
            std::process::abort();
        }
        Ok(Err(e)) => {
            log::error!(target: "dotnet", "{} failed: {}", operation, e);
            None
        }
        Err(_) => {
            log::error!(target: "dotnet", "{} panicked", operation);
            None
        }
    }
}
