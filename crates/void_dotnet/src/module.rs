//! .NET module lifecycle
//!
//! Startup: settings → hostfxr → bridge binding → runtime → plugins.
//! Teardown runs the other way: runtime → bridge binding → hostfxr.

use std::sync::Arc;

use crate::class_bridge::ClassBridge;
use crate::commands::DotNetCommand;
use crate::delegates;
use crate::error::{DotNetError, Result};
use crate::ffi::ManagedDelegateTable;
use crate::host::ClassHost;
use crate::hostfxr::HostFxr;
use crate::runtime::RuntimeSession;
use crate::settings::DotNetSettings;

/// Owns the hosting library, the runtime session and the managed delegates
pub struct DotNetModule {
    settings: DotNetSettings,
    host: HostFxr,
    runtime: RuntimeSession,
    /// Written by managed code, the address must not change while loaded
    managed: Box<ManagedDelegateTable>,
    class_host: Arc<dyn ClassHost>,
    bridge: Option<Arc<ClassBridge>>,
}

impl DotNetModule {
    pub fn new(settings: DotNetSettings, class_host: Arc<dyn ClassHost>) -> Self {
        Self::with_host(settings, class_host, HostFxr::new())
    }

    /// Use `host` instead of loading hostfxr from the installation
    pub fn with_host(settings: DotNetSettings, class_host: Arc<dyn ClassHost>, host: HostFxr) -> Self {
        Self {
            settings,
            host,
            runtime: RuntimeSession::new(),
            managed: Box::default(),
            class_host,
            bridge: None,
        }
    }

    pub fn settings(&self) -> &DotNetSettings {
        &self.settings
    }

    pub fn host(&self) -> &HostFxr {
        &self.host
    }

    pub fn managed_delegates(&self) -> &ManagedDelegateTable {
        &self.managed
    }

    pub fn is_runtime_loaded(&self) -> bool {
        self.runtime.is_active()
    }

    /// Load the runtime, errors are logged
    pub fn startup(&mut self) {
        if let Err(e) = self.load_runtime() {
            log::error!(target: "dotnet", "Failed to start .NET module: {}", e);
        }
    }

    /// Unload everything. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.unload_runtime() {
            log::error!(target: "dotnet", "Failed to unload .NET runtime: {}", e);
        }
        self.host.unload();
    }

    fn load_host(&mut self) -> Result<()> {
        if self.host.is_active() {
            log::warn!(target: "dotnet", "hostfxr is already loaded");
            return Ok(());
        }

        self.host.load(self.settings.hostfxr_library_path())?;
        log::info!(target: "dotnet", "hostfxr is loaded for .NET {}", self.settings.dotnet_version);
        Ok(())
    }

    /// Start the runtime and, if configured, load the managed plugins
    pub fn load_runtime(&mut self) -> Result<()> {
        if self.runtime.is_active() {
            log::warn!(target: "dotnet", ".NET runtime is already loaded");
            return Ok(());
        }

        self.settings.validate()?;
        if !self.host.is_active() {
            self.load_host()?;
        }

        // Managed code may register classes from its entry point
        let bridge = Arc::new(ClassBridge::new(self.class_host.clone()));
        delegates::bind_class_bridge(bridge.clone());
        self.bridge = Some(bridge);

        if let Err(e) = self.runtime.load(&self.host, &self.settings, &mut self.managed) {
            self.release_bridge();
            self.managed.clear();
            return Err(e);
        }

        log::info!(target: "dotnet", ".NET runtime is loaded");

        if self.settings.auto_load_plugins {
            self.load_plugins()?;
        }
        Ok(())
    }

    /// Close the runtime and release the bridge binding
    pub fn unload_runtime(&mut self) -> Result<()> {
        if !self.runtime.is_active() {
            log::warn!(target: "dotnet", ".NET runtime was not loaded");
            return Ok(());
        }

        let closed = self.runtime.unload(&self.host);
        self.managed.clear();
        self.release_bridge();
        closed?;

        log::info!(target: "dotnet", ".NET runtime is unloaded");
        Ok(())
    }

    fn release_bridge(&mut self) {
        if self.bridge.take().is_some() {
            delegates::unbind_class_bridge();
        }
    }

    fn require_runtime(&self) -> Result<()> {
        if self.runtime.is_active() {
            Ok(())
        } else {
            Err(DotNetError::RuntimeNotActive)
        }
    }

    pub fn load_plugins(&mut self) -> Result<()> {
        self.require_runtime()?;
        self.managed.call_load()?;
        self.construct_new_classes();
        Ok(())
    }

    pub fn unload_plugins(&mut self) -> Result<()> {
        self.require_runtime()?;
        self.managed.call_unload()
    }

    pub fn reload_plugins(&mut self) -> Result<()> {
        self.require_runtime()?;
        self.managed.call_reload()?;
        self.construct_new_classes();
        Ok(())
    }

    fn construct_new_classes(&self) {
        let constructed = self.class_host.process_newly_loaded();
        if constructed > 0 {
            log::info!(target: "dotnet", "Constructed {} managed classes", constructed);
        }
    }

    /// Run an operator command, errors are logged
    pub fn execute(&mut self, command: DotNetCommand) {
        let result = match command {
            DotNetCommand::LoadRuntime => self.load_runtime(),
            DotNetCommand::UnloadRuntime => self.unload_runtime(),
            DotNetCommand::LoadManagedPlugins => self.load_plugins(),
            DotNetCommand::UnloadManagedPlugins => self.unload_plugins(),
            DotNetCommand::ReloadManagedPlugins => self.reload_plugins(),
        };

        if let Err(e) = result {
            log::error!(target: "dotnet", "{} failed: {}", command, e);
        }
    }
}

impl Drop for DotNetModule {
    fn drop(&mut self) {
        self.shutdown();
    }
}
