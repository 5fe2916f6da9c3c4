//! # void_dotnet - .NET Managed Scripting
//!
//! Hosts the .NET runtime inside the engine and lets managed code define
//! engine classes, following the Unreal Engine model of script classes that
//! derive from native ones.
//!
//! ## Overview
//!
//! The runtime is started through `hostfxr`, the hosting library shipped with
//! every .NET installation. A managed loader assembly (`Void.Plugins`) receives
//! a table of native callbacks and hands back its plugin lifecycle functions.
//! Managed classes are described by flat descriptors; the bridge computes
//! their field layout and registers them with the engine's class registry.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │  DotNetSettings │────▶│     HostFxr     │
//! │ (dotnet.toml)   │     │  (libloading)   │
//! └─────────────────┘     └────────┬────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  DotNetModule   │────▶│ RuntimeSession  │
//! │  (lifecycle)    │     │ (entry point)   │
//! └────────┬────────┘     └────────┬────────┘
//!          │                       │ NativeDelegateTable
//!          │                       ▼
//!          │              ┌─────────────────┐
//!          │              │  Managed code   │
//!          │              │ (Void.Plugins)  │
//!          │              └────────┬────────┘
//!          │                       │ register_managed_class
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ EngineClassHost │◀────│   ClassBridge   │
//! │ (ClassRegistry) │     │ (layout, once)  │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use void_dotnet::{DotNetModule, DotNetSettings, EngineClassHost};
//!
//! let settings = DotNetSettings::load()?;
//! let classes = Arc::new(EngineClassHost::new());
//!
//! let mut module = DotNetModule::new(settings, classes);
//! module.load_runtime()?;
//! module.reload_plugins()?;
//! module.shutdown();
//! ```
//!
//! ## Managed Side
//!
//! The loader exposes one `[UnmanagedCallersOnly]` entry point:
//!
//! ```csharp
//! public static class Loader
//! {
//!     [UnmanagedCallersOnly]
//!     public static unsafe void Init(char* pluginsPath, int length,
//!                                    NativeDelegates* native, ManagedDelegates* managed)
//!     {
//!         managed->Load = &LoadPlugins;
//!         managed->Unload = &UnloadPlugins;
//!         managed->Reload = &ReloadPlugins;
//!     }
//! }
//! ```

mod error;
mod ffi;
mod hostfxr;
mod runtime;
mod delegates;
mod layout;
mod host;
mod class_bridge;
mod settings;
mod commands;
mod module;

pub use error::{BridgeError, DotNetError, Result, SettingsError};
pub use ffi::*;
pub use hostfxr::{HostFxr, HostFxrExports, RuntimeContext, HOSTFXR_LIBRARY_NAME};
pub use runtime::RuntimeSession;
pub use delegates::{
    bind_class_bridge, bound_class_bridge, unbind_class_bridge, ManagedVerbosity, MANAGED_LOG_TARGET,
    NATIVE_DELEGATES,
};
pub use layout::{compute_layout, plan_layout, ClassLayout};
pub use host::{ClassConstructionParams, ClassHost, EngineClassHost};
pub use class_bridge::ClassBridge;
pub use settings::{DotNetSettings, ENTRY_METHOD, ENTRY_TYPE, LOADER_ASSEMBLY_NAME, MINIMAL_DOTNET_VERSION};
pub use commands::{DotNetCommand, UnknownCommand};
pub use module::DotNetModule;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{BridgeError, DotNetError, Result, SettingsError};
    pub use crate::hostfxr::HostFxr;
    pub use crate::runtime::RuntimeSession;
    pub use crate::host::{ClassHost, EngineClassHost};
    pub use crate::class_bridge::ClassBridge;
    pub use crate::settings::DotNetSettings;
    pub use crate::commands::DotNetCommand;
    pub use crate::module::DotNetModule;
}
