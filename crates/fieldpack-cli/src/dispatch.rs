use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fieldpack_core::CancelToken;
use fieldpack_resolver::ApplicableUpgradesResult;
use fieldpack_service::{is_legacy_client, ServiceConfig, UpdateService};

use crate::completion::write_completions;
use crate::render;

#[derive(Parser, Debug)]
#[command(name = "fieldpack")]
#[command(about = "Software update distribution engine", long_about = None)]
pub struct Cli {
    /// Root directory holding one folder per app.
    #[arg(long, global = true)]
    pub storage_root: Option<PathBuf>,
    /// TOML config file with the app folder mapping.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Include pre-release artifacts.
    #[arg(long, global = true)]
    pub prerelease: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report whether a client already holds the latest artifact.
    Check {
        app: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        checksum: Option<String>,
    },
    /// List the ordered upgrades a client would receive.
    Upgrades {
        app: String,
        version: String,
        #[arg(long)]
        json: bool,
    },
    /// Build (or reuse) the upgrade package archive for a client.
    Package {
        app: String,
        version: String,
        #[arg(long)]
        installer_version: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the path of the latest plain update artifact.
    Update {
        app: String,
        /// Updater version token as reported by the client; absent or
        /// pre-2.0 tokens select the legacy combined archive.
        #[arg(long)]
        updater_version: Option<String>,
    },
    /// Inspect the storage root and configured apps.
    Doctor,
    /// Generate shell completions.
    Completions { shell: clap_complete::Shell },
}

fn load_service(cli: &Cli) -> Result<(UpdateService, PathBuf)> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    // The command line flag wins over the config file.
    if cli.storage_root.is_some() {
        config.storage_root = cli.storage_root.clone();
    }
    let root = config
        .storage_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((UpdateService::from_config(root.clone(), &config), root))
}

pub fn format_check_line(app: &str, up_to_date: bool) -> String {
    if up_to_date {
        format!("{app}: up to date")
    } else {
        format!("{app}: update available")
    }
}

pub fn format_upgrade_lines(result: &ApplicableUpgradesResult) -> Vec<String> {
    if result.is_up_to_date() {
        return vec!["up to date".to_string()];
    }
    let mut lines = vec![format!("target version: {}", result.target_version)];
    for upgrade in &result.upgrades {
        lines.push(format!(
            "- {} -> {} ({} bytes)",
            upgrade.id,
            upgrade.target_version,
            upgrade.total_file_size()
        ));
    }
    lines.push(format!("estimated size: {} bytes", result.estimated_size));
    lines
}

fn upgrades_json(result: &ApplicableUpgradesResult) -> serde_json::Value {
    serde_json::json!({
        "targetVersion": result.target_version,
        "upToDate": result.is_up_to_date(),
        "estimatedSize": result.estimated_size,
        "upgrades": result.upgrades,
    })
}

pub fn run_cli(cli: Cli) -> Result<()> {
    let prerelease = cli.prerelease;
    match &cli.command {
        Commands::Check {
            app,
            version,
            checksum,
        } => {
            let (service, _) = load_service(&cli)?;
            let current = service.check_version(
                app,
                version.as_deref(),
                None,
                checksum.as_deref(),
                prerelease,
            )?;
            render::status(
                if current { "ok" } else { "stale" },
                &format_check_line(app, current),
            );
        }
        Commands::Upgrades { app, version, json } => {
            let (service, _) = load_service(&cli)?;
            let result = service.list_applicable_upgrades(app, version, prerelease)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&upgrades_json(&result))?);
            } else {
                for line in format_upgrade_lines(&result) {
                    println!("{line}");
                }
            }
        }
        Commands::Package {
            app,
            version,
            installer_version,
            output,
        } => {
            let (service, _) = load_service(&cli)?;
            let cancel = CancelToken::new();
            let spinner = render::spinner(&format!("packaging {app}"));
            let built = service.fetch_upgrade_package(
                app,
                version,
                prerelease,
                installer_version.as_deref(),
                &cancel,
            );
            spinner.finish_and_clear();
            match built? {
                None => render::status("ok", &format_check_line(app, true)),
                Some(archive) => {
                    let final_path = match output {
                        Some(dest) => {
                            fs::copy(&archive, dest).with_context(|| {
                                format!("failed to copy package to {}", dest.display())
                            })?;
                            dest.clone()
                        }
                        None => archive,
                    };
                    render::status("built", &final_path.display().to_string());
                }
            }
        }
        Commands::Update {
            app,
            updater_version,
        } => {
            let (service, _) = load_service(&cli)?;
            let cancel = CancelToken::new();
            let legacy = is_legacy_client(updater_version.as_deref());
            let path = service.fetch_plain_update(app, prerelease, legacy, &cancel)?;
            println!("{}", path.display());
        }
        Commands::Doctor => {
            let (service, root) = load_service(&cli)?;
            println!("storage root: {}", root.display());
            let updater = service.builder().resolver().newest_stable_updater()?;
            match updater {
                Some(record) => println!("updater: {}", record.path.display()),
                None => println!("updater: not found"),
            }
        }
        Commands::Completions { shell } => {
            write_completions(*shell, &mut std::io::stdout())?;
        }
    }

    Ok(())
}
