use std::path::PathBuf;

use clap::{Parser, Subcommand};

use otapkg_cli::commands::install::{run_install, InstallOptions};
use otapkg_cli::commands::{list, notify, remove};
use otapkg_cli::config::{default_config_path, load_config};
use otapkg_installer::request::InstallSource;

#[derive(Parser)]
#[command(name = "otapkg", about = "over-the-air suite package installer")]
struct Cli {
    /// Path to the config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a suite from a descriptor URL
    Install {
        url: String,
        /// Overwrite an installed version without asking
        #[arg(long)]
        force: bool,
        /// Discard the previous version's data without asking
        #[arg(long)]
        discard_data: bool,
        /// Answer yes to every question
        #[arg(short, long)]
        yes: bool,
    },
    /// Install a suite directly from an archive URL
    InstallArchive {
        url: String,
        /// Display name shown before the manifest is available
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        discard_data: bool,
        #[arg(short, long)]
        yes: bool,
    },
    /// Remove an installed suite
    Remove { name: String, vendor: String },
    /// List installed suites
    List,
    /// Retry queued provider notifications
    FlushNotifications,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = load_config(&cli.config.unwrap_or_else(default_config_path))?;

    match cli.command {
        Commands::Install {
            url,
            force,
            discard_data,
            yes,
        } => {
            run_install(
                &cfg,
                InstallSource::Descriptor(url),
                InstallOptions {
                    force,
                    discard_data,
                    assume_yes: yes,
                    name: None,
                },
            )
            .await?;
        }
        Commands::InstallArchive {
            url,
            name,
            force,
            discard_data,
            yes,
        } => {
            run_install(
                &cfg,
                InstallSource::Archive(url),
                InstallOptions {
                    force,
                    discard_data,
                    assume_yes: yes,
                    name,
                },
            )
            .await?;
        }
        Commands::Remove { name, vendor } => {
            remove::run_remove(&cfg, &name, &vendor).await?;
        }
        Commands::List => {
            list::run_list(&cfg)?;
        }
        Commands::FlushNotifications => {
            notify::run_flush(&cfg).await?;
        }
    }
    Ok(())
}
