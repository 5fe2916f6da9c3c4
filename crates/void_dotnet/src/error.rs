//! Error types for .NET hosting

use std::path::PathBuf;
use thiserror::Error;

/// Result type for .NET hosting operations
pub type Result<T> = std::result::Result<T, DotNetError>;

/// Errors that can occur while hosting the .NET runtime
#[derive(Debug, Error)]
pub enum DotNetError {
    /// Failed to load the hosting library
    #[error("Failed to load library '{path}': {message}")]
    LoadError {
        path: PathBuf,
        message: String,
    },

    /// Hosting library does not export a required symbol
    #[error("Symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound {
        library: String,
        symbol: String,
    },

    /// Hosting library is not loaded
    #[error("hostfxr is not loaded")]
    HostNotActive,

    /// No runtime context is initialized
    #[error("The .NET runtime is not loaded")]
    RuntimeNotActive,

    /// A runtime context already exists
    #[error("The .NET runtime is already loaded")]
    RuntimeAlreadyLoaded,

    /// A hosting call returned a failure code
    #[error("{operation} failed with code {code:#010x}")]
    HostCall {
        operation: &'static str,
        code: i32,
    },

    /// The managed entry point resolved to null
    #[error("Entry point '{type_name}::{method}' resolved to null")]
    NullEntryPoint {
        type_name: String,
        method: String,
    },

    /// A path cannot be passed to the hosting library
    #[error("Invalid path '{0}'")]
    InvalidPath(PathBuf),

    /// Managed code did not provide a delegate
    #[error("Managed delegate '{0}' was not provided")]
    ManagedDelegateMissing(&'static str),

    /// Settings error
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Class registration error
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl DotNetError {
    /// Create a load error
    pub fn load_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        DotNetError::LoadError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a symbol not found error
    pub fn symbol_not_found(library: impl Into<String>, symbol: impl Into<String>) -> Self {
        DotNetError::SymbolNotFound {
            library: library.into(),
            symbol: symbol.into(),
        }
    }

    /// Check a hosting result code, negative values are failures
    pub fn check(operation: &'static str, code: i32) -> Result<()> {
        if code < 0 {
            Err(DotNetError::HostCall { operation, code })
        } else {
            Ok(())
        }
    }
}

/// Settings validation errors
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No usable installation was found
    #[error("No .NET installation found under '{0}'")]
    NoInstallation(PathBuf),

    /// The hosting library of the selected version is missing
    #[error("hostfxr not found at '{0}'")]
    HostFxrMissing(PathBuf),

    /// The managed loader assembly is missing
    #[error("Loader assembly not found at '{0}'")]
    LoaderAssemblyMissing(PathBuf),

    /// The managed loader runtime config is missing
    #[error("Loader runtime config not found at '{0}'")]
    LoaderConfigMissing(PathBuf),

    /// The managed plugins directory could not be created
    #[error("Failed to create managed plugins directory '{path}': {source}")]
    PluginsDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Managed class registration errors
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The parent class named by a descriptor does not exist
    #[error("Parent class '{parent}' of '{class}' not found")]
    ParentClassNotFound {
        class: String,
        parent: String,
    },

    /// A property cannot be laid out
    #[error("Property '{property}' has invalid size {size}")]
    InvalidPropertySize {
        property: String,
        size: i32,
    },

    /// A descriptor pointer was null
    #[error("Null class descriptor")]
    NullDescriptor,

    /// A descriptor string was null or not valid UTF-16
    #[error("Invalid {field} in class descriptor")]
    InvalidName {
        field: &'static str,
    },

    /// A singleton was requested before the class was registered
    #[error("Class '{0}' has not been registered yet")]
    NotInitialized(String),

    /// The descriptor has no registration info block
    #[error("Class descriptor has no registration info")]
    NullRegistrationInfo,

    /// The descriptor lacks one of its accessors
    #[error("Class '{0}' does not provide its register accessors")]
    MissingAccessor(String),

    /// A managed accessor returned no class object
    #[error("Accessor of class '{0}' returned null")]
    NullClass(String),

    /// The object allocator refused the class object
    #[error("Failed to allocate class object for '{0}'")]
    AllocationFailed(String),

    /// No class bridge is bound to the native delegates
    #[error("No class bridge is bound")]
    NoClassHost,

    /// Host class registry rejected the registration
    #[error(transparent)]
    Registry(#[from] void_core::ClassRegistryError),
}
