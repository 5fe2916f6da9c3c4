//! Void .NET Host
//!
//! Starts the .NET module with the engine's root classes and runs operator
//! commands read from stdin, one per line.
//!
//! Usage:
//!   void-dotnet-host
//!
//! Commands:
//!   DotNet.LoadRuntime, DotNet.UnloadRuntime, DotNet.LoadManagedPlugins,
//!   DotNet.UnloadManagedPlugins, DotNet.ReloadManagedPlugins, help, quit

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use void_core::ClassObjectParams;
use void_dotnet::{DotNetCommand, DotNetModule, DotNetSettings, EngineClassHost};

const CORE_PACKAGE: &str = "/Script/CoreUObject";

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = match DotNetSettings::load() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load .NET settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let classes = Arc::new(EngineClassHost::new());
    let object = ClassObjectParams {
        name: "Object".into(),
        properties_size: 40,
        min_alignment: 8,
        ..Default::default()
    };
    if let Err(e) = classes.register_native_class(object, None, CORE_PACKAGE) {
        log::error!("Failed to register root class: {}", e);
        return ExitCode::FAILURE;
    }

    let mut module = DotNetModule::new(settings, classes);
    module.startup();

    let stdin = io::stdin();
    prompt();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };

        match line.trim() {
            "" => {}
            "quit" | "exit" => break,
            "help" => {
                for command in DotNetCommand::ALL {
                    println!("  {:<30} {}", command.name(), command.description());
                }
            }
            input => match input.parse::<DotNetCommand>() {
                Ok(command) => module.execute(command),
                Err(e) => log::warn!("{}", e),
            },
        }
        prompt();
    }

    module.shutdown();
    ExitCode::SUCCESS
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}
