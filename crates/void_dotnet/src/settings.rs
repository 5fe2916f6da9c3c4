//! .NET hosting settings
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Environment variables: `VOID_DOTNET_ROOT`, `VOID_DOTNET_VERSION`,
//!    `VOID_DOTNET_ALLOW_PREVIEW`, `VOID_PROJECT_DIR`
//! 2. Config file: `$VOID_DOTNET_CONFIG`, `dotnet.toml` or `config/dotnet.toml`
//! 3. Defaults: the system-wide .NET installation if present, otherwise the
//!    runtime shipped with the project under `Binaries/Runtime`
//!
//! # Example Config File
//!
//! ```toml
//! dotnet_location = "/usr/share/dotnet"
//! dotnet_version = "8.0.1"
//! allow_preview = false
//! project_dir = "/home/dev/MyGame"
//! auto_load_plugins = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use void_core::Version;

use crate::error::{Result, SettingsError};
use crate::hostfxr::HOSTFXR_LIBRARY_NAME;

/// Oldest major version the loader runs on
pub const MINIMAL_DOTNET_VERSION: u8 = 6;

/// Name of the managed plugin loader assembly
pub const LOADER_ASSEMBLY_NAME: &str = "Void.Plugins";

/// Assembly-qualified type of the loader entry point
pub const ENTRY_TYPE: &str = "Void.Plugins.Loader, Void.Plugins";

/// Loader entry point method
pub const ENTRY_METHOD: &str = "Init";

/// System-wide installation directory
#[cfg(target_os = "windows")]
const DEFAULT_DOTNET_INSTALL_DIR: &str = "C:/Program Files/dotnet/";
#[cfg(target_os = "macos")]
const DEFAULT_DOTNET_INSTALL_DIR: &str = "/usr/local/share/dotnet/";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_DOTNET_INSTALL_DIR: &str = "/usr/share/dotnet/";

const CONFIG_FILES: &[&str] = &["dotnet.toml", "config/dotnet.toml"];

/// Settings for locating the runtime and the managed plugins
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DotNetSettings {
    /// Root of the .NET installation
    pub dotnet_location: PathBuf,
    /// Selected `host/fxr` version
    pub dotnet_version: String,
    /// Accept preview runtimes
    pub allow_preview: bool,
    /// Project root, managed plugins live under `Binaries/Managed`
    pub project_dir: PathBuf,
    /// Load managed plugins right after the runtime
    pub auto_load_plugins: bool,
    /// File the settings were read from
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for DotNetSettings {
    fn default() -> Self {
        let project_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            dotnet_location: default_install_dir(&project_dir),
            dotnet_version: String::new(),
            allow_preview: false,
            project_dir,
            auto_load_plugins: true,
            config_path: None,
        }
    }
}

/// The system-wide installation if present, else the embedded runtime
fn default_install_dir(project_dir: &Path) -> PathBuf {
    let system = Path::new(DEFAULT_DOTNET_INSTALL_DIR);
    if system.is_dir() {
        system.to_path_buf()
    } else {
        project_dir.join("Binaries/Runtime")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl DotNetSettings {
    /// Load settings from all sources
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os("VOID_DOTNET_CONFIG").map(PathBuf::from);
        let candidates = explicit
            .into_iter()
            .chain(CONFIG_FILES.iter().map(PathBuf::from));

        let mut settings = Self::default();
        for path in candidates {
            if path.is_file() {
                settings = Self::load_from_file(&path)?;
                log::info!(target: "dotnet", "Loaded .NET settings from {}", path.display());
                break;
            }
        }

        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.refresh_version();
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut settings = Self::from_toml(&content)?;
        settings.config_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `VOID_*` overrides, `lookup` returns the value of a variable
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("VOID_DOTNET_ROOT").filter(|v| !v.is_empty()) {
            self.dotnet_location = PathBuf::from(root);
            log::info!(target: "dotnet", ".NET location from env: {}", self.dotnet_location.display());
        }

        if let Some(version) = lookup("VOID_DOTNET_VERSION").filter(|v| !v.is_empty()) {
            self.dotnet_version = version;
        }

        if let Some(preview) = lookup("VOID_DOTNET_ALLOW_PREVIEW") {
            self.allow_preview = parse_flag(&preview);
        }

        if let Some(project) = lookup("VOID_PROJECT_DIR").filter(|v| !v.is_empty()) {
            self.project_dir = PathBuf::from(project);
        }
    }

    pub fn project_path(&self) -> &Path {
        &self.project_dir
    }

    /// `<InstallRoot>/host/fxr`
    pub fn hostfxr_dir(&self) -> PathBuf {
        self.dotnet_location.join("host").join("fxr")
    }

    /// `<InstallRoot>/host/fxr/<Version>/<library>`
    pub fn hostfxr_library_path(&self) -> PathBuf {
        self.hostfxr_dir().join(&self.dotnet_version).join(HOSTFXR_LIBRARY_NAME)
    }

    /// `<ProjectDir>/Binaries/Managed`
    pub fn managed_plugins_path(&self) -> PathBuf {
        self.project_dir.join("Binaries").join("Managed")
    }

    pub fn loader_assembly_path(&self) -> PathBuf {
        self.managed_plugins_path().join(format!("{}.dll", LOADER_ASSEMBLY_NAME))
    }

    pub fn loader_config_path(&self) -> PathBuf {
        self.managed_plugins_path()
            .join(format!("{}.runtimeconfig.json", LOADER_ASSEMBLY_NAME))
    }

    pub fn entry_type(&self) -> &'static str {
        ENTRY_TYPE
    }

    pub fn entry_method(&self) -> &'static str {
        ENTRY_METHOD
    }

    /// Installed `host/fxr` versions usable by the loader, oldest first
    pub fn available_installations(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.hostfxr_dir()) else {
            return Vec::new();
        };

        let mut found: Vec<(Version, String)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| Version::try_parse(&name).map(|version| (version, name)))
            .filter(|(version, _)| version.major >= MINIMAL_DOTNET_VERSION)
            .filter(|(version, _)| self.allow_preview || !version.is_preview)
            .collect();

        // Releases sort after previews of the same numbers
        found.sort_by_key(|(version, _)| (version.packed(), !version.is_preview));
        found.into_iter().map(|(_, name)| name).collect()
    }

    /// Select the newest installation when the current choice is unusable.
    ///
    /// Returns `true` if the version changed.
    pub fn refresh_version(&mut self) -> bool {
        let current = Version::try_parse(&self.dotnet_version);
        let unusable = self.dotnet_version.is_empty()
            || !self.hostfxr_library_path().is_file()
            || (!self.allow_preview && current.map(|v| v.is_preview).unwrap_or(false));

        if !unusable {
            return false;
        }

        let newest = self.available_installations().pop().unwrap_or_default();
        if newest == self.dotnet_version {
            return false;
        }

        log::info!(target: "dotnet", "Selected .NET version '{}'", newest);
        self.dotnet_version = newest;
        true
    }

    /// Check that everything needed to load the runtime is in place.
    ///
    /// A missing managed plugins directory is created.
    pub fn validate(&self) -> std::result::Result<(), SettingsError> {
        let plugins = self.managed_plugins_path();
        if !plugins.is_dir() {
            log::warn!(target: "dotnet", "Failed to locate directory for managed plugins");
            match std::fs::create_dir_all(&plugins) {
                Ok(()) => log::info!(target: "dotnet", "Managed plugins directory created: {}", plugins.display()),
                Err(source) => {
                    log::error!(target: "dotnet", "Failed to create managed plugins directory: {}", plugins.display());
                    return Err(SettingsError::PluginsDirectory { path: plugins, source });
                }
            }
        }

        if self.dotnet_version.is_empty() {
            log::error!(target: "dotnet", "No .NET version selected");
            return Err(SettingsError::NoInstallation(self.hostfxr_dir()));
        }

        let hostfxr = self.hostfxr_library_path();
        if !hostfxr.is_file() {
            log::error!(target: "dotnet", "Failed to locate .NET host");
            return Err(SettingsError::HostFxrMissing(hostfxr));
        }

        let assembly = self.loader_assembly_path();
        if !assembly.is_file() {
            log::error!(target: "dotnet", "Failed to locate plugin loader");
            return Err(SettingsError::LoaderAssemblyMissing(assembly));
        }

        let config = self.loader_config_path();
        if !config.is_file() {
            log::error!(target: "dotnet", "Failed to locate plugin loader config");
            return Err(SettingsError::LoaderConfigMissing(config));
        }

        Ok(())
    }
}
