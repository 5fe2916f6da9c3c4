//! Console commands exposed by the .NET module

use std::fmt;
use std::str::FromStr;

/// Operator commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DotNetCommand {
    LoadRuntime,
    UnloadRuntime,
    LoadManagedPlugins,
    UnloadManagedPlugins,
    ReloadManagedPlugins,
}

impl DotNetCommand {
    pub const ALL: [DotNetCommand; 5] = [
        DotNetCommand::LoadRuntime,
        DotNetCommand::UnloadRuntime,
        DotNetCommand::LoadManagedPlugins,
        DotNetCommand::UnloadManagedPlugins,
        DotNetCommand::ReloadManagedPlugins,
    ];

    /// Console name
    pub fn name(self) -> &'static str {
        match self {
            DotNetCommand::LoadRuntime => "DotNet.LoadRuntime",
            DotNetCommand::UnloadRuntime => "DotNet.UnloadRuntime",
            DotNetCommand::LoadManagedPlugins => "DotNet.LoadManagedPlugins",
            DotNetCommand::UnloadManagedPlugins => "DotNet.UnloadManagedPlugins",
            DotNetCommand::ReloadManagedPlugins => "DotNet.ReloadManagedPlugins",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            DotNetCommand::LoadRuntime => "Load the .NET runtime",
            DotNetCommand::UnloadRuntime => "Unload the .NET runtime",
            DotNetCommand::LoadManagedPlugins => "Load managed plugins",
            DotNetCommand::UnloadManagedPlugins => "Unload managed plugins",
            DotNetCommand::ReloadManagedPlugins => "Reload managed plugins",
        }
    }
}

impl fmt::Display for DotNetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown command name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for DotNetCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|command| command.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}
