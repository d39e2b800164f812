//! Command-line front end for the netfence engine

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use netfence_core::settings::FirewallBackend;
use netfence_core::{FenceContext, SettingsLoader};
use std::path::PathBuf;
use tokio::runtime::Handle;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

#[derive(Parser, Debug)]
#[command(
    name = "netfence",
    about = "Block network access for an installed application",
    version
)]
struct Args {
    /// Settings file (TOML), merged over user and built-in settings
    #[arg(long, short = 'c', global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Only log firewall changes instead of making them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Block the application's executables and domains
    Enable {
        /// Install directory of the application
        #[arg(long, value_name = "DIR")]
        root: PathBuf,

        /// Keep running and block processes started under the install tree
        #[arg(long)]
        watch: bool,

        /// Remove all blocks again when the watch is interrupted
        #[arg(long, requires = "watch")]
        cleanup_on_exit: bool,
    },

    /// Remove every rule and hosts entry netfence created
    Disable,

    /// Report the current blocking state
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or edit the persisted configuration record
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Block processes started under a directory until interrupted
    Watch {
        #[arg(long, value_name = "DIR")]
        root: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the record as JSON
    Show,
    /// Record the selected application version
    SetVersion { name: String, path: String },
    /// Record whether network access is blocked
    SetBlocked {
        #[arg(action = clap::ArgAction::Set)]
        blocked: bool,
    },
    /// Record the license server port
    SetPort { port: String },
    /// Record the UI language
    SetLanguage { language: String },
    /// Delete the record, reverting every field to its default
    Reset,
    /// Print where the record is stored
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Settings come first so `common.verbose` can raise the log level
    let settings = SettingsLoader::load_with_priority(args.config.clone());

    let verbose = args.verbose
        || settings
            .as_ref()
            .is_ok_and(|settings| settings.common.verbose);
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let mut settings = settings.context("Failed to load settings")?;
    if args.dry_run {
        settings.firewall.backend = FirewallBackend::DryRun;
    }

    let ctx = FenceContext::new(settings, Handle::current());

    match args.command {
        Command::Enable {
            root,
            watch,
            cleanup_on_exit,
        } => commands::enable(&ctx, &root, watch, cleanup_on_exit).await,
        Command::Disable => commands::disable(&ctx).await,
        Command::Status { json } => commands::status(&ctx, json).await,
        Command::Config(cmd) => run_config(&ctx, cmd),
        Command::Watch { root } => commands::watch(&ctx, &root).await,
    }
}

fn run_config(ctx: &FenceContext, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => commands::config_show(ctx),
        ConfigCommand::SetVersion { name, path } => {
            commands::config_update(ctx, |store| store.update_selected_version(&name, &path))
        }
        ConfigCommand::SetBlocked { blocked } => {
            commands::config_update(ctx, |store| store.update_network_blocked(blocked))
        }
        ConfigCommand::SetPort { port } => {
            commands::config_update(ctx, |store| store.update_license_port(&port))
        }
        ConfigCommand::SetLanguage { language } => {
            commands::config_update(ctx, |store| store.update_language(&language))
        }
        ConfigCommand::Reset => commands::config_reset(ctx),
        ConfigCommand::Path => {
            println!("{}", ctx.record_path().display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_cleanup_requires_watch() {
        let err = Args::try_parse_from(["netfence", "enable", "--root", "/opt/app", "--cleanup-on-exit"]);
        assert!(err.is_err());

        let args = Args::try_parse_from([
            "netfence",
            "enable",
            "--root",
            "/opt/app",
            "--watch",
            "--cleanup-on-exit",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::Enable {
                watch: true,
                cleanup_on_exit: true,
                ..
            }
        ));
    }

    #[test]
    fn test_set_blocked_takes_a_value() {
        let args = Args::try_parse_from(["netfence", "config", "set-blocked", "false"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Config(ConfigCommand::SetBlocked { blocked: false })
        ));

        let args = Args::try_parse_from(["netfence", "--dry-run", "status", "--json"]).unwrap();
        assert!(args.dry_run);
        assert!(matches!(args.command, Command::Status { json: true }));
    }
}
