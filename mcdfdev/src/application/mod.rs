pub mod handlers;

use crate::presentation::cli::{Cli, Commands, RegistryCommands};
use mcdf_core::error::Result;

pub fn run(cli: Cli) -> Result<()> {
    let settings = handlers::load_settings(cli.config.as_deref())?;
    match cli.command {
        Commands::Inspect { archive } => handlers::handle_inspect(archive),
        Commands::Extract { archive, dest } => handlers::handle_extract(archive, dest),
        Commands::Pack {
            out,
            appearance,
            shape,
            overrides,
            description,
            level,
            files,
        } => handlers::handle_pack(
            out,
            appearance,
            shape,
            overrides,
            description,
            level.unwrap_or(settings.compression_level),
            files,
        ),
        Commands::Registry(cmd) => match cmd {
            RegistryCommands::List { registry } => {
                handlers::handle_registry_list(registry.unwrap_or(settings.registry_path))
            }
            RegistryCommands::Add {
                name,
                home_zone,
                archive,
                registry,
            } => handlers::handle_registry_add(
                registry.unwrap_or(settings.registry_path),
                name,
                home_zone,
                archive,
            ),
            RegistryCommands::Remove {
                name,
                home_zone,
                registry,
            } => handlers::handle_registry_remove(
                registry.unwrap_or(settings.registry_path),
                name,
                home_zone,
            ),
        },
    }
}
