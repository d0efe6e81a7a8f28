//! CLI command definitions and argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use otapush_core::session::{BOOT_PATH, MBR_PATH, ROOT_PATH};
use otapush_core::{probe_scheme, ConfigDir, Target, UpdateError, UpdateSession};
use tracing::{error, info, trace, warn};

use crate::config::{CliOverrides, Config};
use crate::ExitCode;

/// otapush - push images to embedded devices
#[derive(Parser, Debug)]
#[command(name = "otapush")]
#[command(version, about = "otapush - push root, boot and MBR images to embedded devices")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (protocol-level tracing)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Target host, optionally with port
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Scheme: auto, http or https
    #[arg(long, global = true)]
    pub scheme: Option<String>,

    /// "self-signed" or a comma-separated list of certificate files
    #[arg(long, global = true)]
    pub tls: Option<String>,

    /// Basic auth user name
    #[arg(long = "user", global = true)]
    pub username: Option<String>,

    /// Basic auth password
    #[arg(long, env = "OTAPUSH_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,
}

impl Cli {
    /// Configuration values given on the command line
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            host: self.host.clone(),
            scheme: self.scheme.clone(),
            tls: self.tls.clone(),
            username: self.username.clone(),
        }
    }

    /// Execute the CLI command with a pre-loaded configuration, CLI
    /// arguments take precedence
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let config = config.with_overrides(&self.overrides());
        let lookup = Config::host_lookup(self.config.as_deref());
        let target = match config.to_target(self.password.as_deref()) {
            Ok(target) => target,
            Err(e) => {
                eprintln!("Error: {e}");
                return Ok(ExitCode::InvalidInput);
            }
        };

        match self.command {
            Commands::Probe => probe(&target).await,
            Commands::Features(args) => args.execute(&target, &lookup).await,
            Commands::Update(args) => args.execute(&target, &lookup).await,
            Commands::Switch => {
                let session = match connect(&target, &lookup).await {
                    Ok(session) => session,
                    Err(code) => return Ok(code),
                };
                Ok(finish(session.switch_partitions().await, "partitions switched"))
            }
            Commands::Reboot => {
                let session = match connect(&target, &lookup).await {
                    Ok(session) => session,
                    Err(code) => return Ok(code),
                };
                Ok(finish(session.reboot().await, "reboot triggered"))
            }
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report whether the target redirects to HTTPS
    Probe,
    /// List the target's update features
    Features(FeaturesArgs),
    /// Upload images, then optionally switch partitions and reboot
    Update(UpdateArgs),
    /// Boot from the partition written last
    Switch,
    /// Reboot the target
    Reboot,
}

/// Arguments for the features command
#[derive(Parser, Debug)]
pub struct FeaturesArgs {
    /// Only check for this feature; exits with UNSUPPORTED when missing
    #[arg(long)]
    pub feature: Option<String>,
}

impl FeaturesArgs {
    pub async fn execute(self, target: &Target, lookup: &ConfigDir) -> anyhow::Result<ExitCode> {
        let session = match connect(target, lookup).await {
            Ok(session) => session,
            Err(code) => return Ok(code),
        };

        let features = match session.features().await {
            Ok(features) => features,
            Err(e) => return Ok(report(&e)),
        };

        match self.feature {
            Some(wanted) => {
                let supported = features.is_some_and(|list| list.iter().any(|f| *f == wanted));
                println!("{wanted}: {}", if supported { "supported" } else { "not supported" });
                Ok(if supported {
                    ExitCode::Success
                } else {
                    ExitCode::Unsupported
                })
            }
            None => {
                match features {
                    Some(list) if !list.is_empty() => {
                        for feature in list {
                            println!("{feature}");
                        }
                    }
                    Some(_) => println!("(no features)"),
                    None => println!("(target has no features endpoint)"),
                }
                Ok(ExitCode::Success)
            }
        }
    }
}

/// Arguments for the update command
#[derive(Parser, Debug)]
pub struct UpdateArgs {
    /// Root file system image
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Boot partition image
    #[arg(long)]
    pub boot: Option<PathBuf>,

    /// Master boot record
    #[arg(long)]
    pub mbr: Option<PathBuf>,

    /// Switch partitions after uploading
    #[arg(long)]
    pub switch: bool,

    /// Reboot after uploading
    #[arg(long)]
    pub reboot: bool,

    /// Continue when the target has no handler for an image
    #[arg(long)]
    pub skip_unsupported: bool,

    /// Abort unless the target advertises this feature (repeatable)
    #[arg(long = "require-feature")]
    pub require_features: Vec<String>,
}

impl UpdateArgs {
    fn is_empty(&self) -> bool {
        self.root.is_none()
            && self.boot.is_none()
            && self.mbr.is_none()
            && !self.switch
            && !self.reboot
    }

    /// Images to upload, in the order they are sent.
    fn images(&self) -> Vec<(&'static str, &PathBuf)> {
        [
            (ROOT_PATH, self.root.as_ref()),
            (BOOT_PATH, self.boot.as_ref()),
            (MBR_PATH, self.mbr.as_ref()),
        ]
        .into_iter()
        .filter_map(|(path, file)| file.map(|file| (path, file)))
        .collect()
    }

    pub async fn execute(self, target: &Target, lookup: &ConfigDir) -> anyhow::Result<ExitCode> {
        if self.is_empty() {
            eprintln!("Error: nothing to do, pass --root, --boot, --mbr, --switch or --reboot");
            return Ok(ExitCode::InvalidInput);
        }

        let mut session = match connect(target, lookup).await {
            Ok(session) => session,
            Err(code) => return Ok(code),
        };
        session.set_progress_callback(|progress| {
            trace!(path = %progress.path, sent = progress.sent, "upload progress");
        });

        for feature in &self.require_features {
            match session.target_supports(feature).await {
                Ok(true) => {}
                Ok(false) => {
                    eprintln!("Error: target does not support feature {feature:?}");
                    return Ok(ExitCode::Unsupported);
                }
                Err(e) => return Ok(report(&e)),
            }
        }

        for (path, file) in self.images() {
            let reader = match tokio::fs::File::open(file).await {
                Ok(reader) => reader,
                Err(e) => {
                    eprintln!("Error: opening {}: {e}", file.display());
                    return Ok(ExitCode::InvalidInput);
                }
            };

            match session.stream_to(path, reader).await {
                Ok(stats) => println!("{path}: {stats}"),
                Err(e) if e.is_handler_not_implemented() && self.skip_unsupported => {
                    warn!(path, "target has no handler, skipping");
                }
                Err(e) => return Ok(report(&e)),
            }
        }

        if self.switch {
            if let Err(e) = session.switch_partitions().await {
                return Ok(report(&e));
            }
            println!("partitions switched");
        }
        if self.reboot {
            if let Err(e) = session.reboot().await {
                return Ok(report(&e));
            }
            println!("reboot triggered");
        }
        Ok(ExitCode::Success)
    }
}

async fn probe(target: &Target) -> anyhow::Result<ExitCode> {
    match probe_scheme(&target.host).await {
        Ok(scheme) => {
            println!("{scheme}");
            Ok(ExitCode::Success)
        }
        Err(e) => Ok(report(&e)),
    }
}

async fn connect(target: &Target, lookup: &ConfigDir) -> Result<UpdateSession, ExitCode> {
    match UpdateSession::connect(target, lookup).await {
        Ok(connected) => {
            info!(
                host = connected.session.base_url().host_str().unwrap_or_default(),
                scheme = %connected.scheme,
                matched_certificate = connected.matched_certificate,
                "connected"
            );
            Ok(connected.session)
        }
        Err(e) => Err(report(&e)),
    }
}

fn finish(result: Result<(), UpdateError>, done: &str) -> ExitCode {
    match result {
        Ok(()) => {
            println!("{done}");
            ExitCode::Success
        }
        Err(e) => report(&e),
    }
}

fn report(err: &UpdateError) -> ExitCode {
    let code = ExitCode::for_error(err);
    error!(error = %err, code = code.name(), "operation failed");
    eprintln!("Error: {err}");
    code
}
