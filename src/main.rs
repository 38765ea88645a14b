//! Snapshot Installer
//!
//! Restores a site snapshot package (files + table dumps) into a deployment directory, one short
//! step per invocation.

// snapshotinstaller/src/main.rs
mod archive;
mod config;
mod database;
mod errors;
mod fs;
mod install;
mod restore;
mod session;
mod sitecfg;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use database::MySqlDatabase;
use install::{Directive, InstallContext, OverrideInput, Step, StepRequest};
use session::{FileSession, MemorySession, OverrideStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snapshotinstaller")]
#[command(version, about = "Resumable snapshot installer")]
struct Cli {
    /// Path to config.json
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Session id keeping overrides and the temp directory between invocations
    #[arg(long, env = "SI_SESSION")]
    session: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one step and print the resulting directive as JSON
    Step {
        /// Step identifier (check, configuration, extract, files, tables, finalize, done, cleanup)
        step: Option<String>,

        #[arg(long, default_value_t = 0)]
        chunk: usize,

        /// Stop on the check page even when all checks pass
        #[arg(long)]
        preview: bool,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Follow reintake directives until a status page is reached
    Drive {
        step: Option<String>,

        /// Continue past successful status pages
        #[arg(long)]
        yes: bool,

        #[arg(long, default_value_t = 200)]
        max_invocations: usize,
    },
}

#[derive(clap::Args, Debug, Default)]
struct OverrideArgs {
    #[arg(long)]
    db_host: Option<String>,
    #[arg(long)]
    db_port: Option<String>,
    #[arg(long)]
    db_user: Option<String>,
    #[arg(long)]
    db_password: Option<String>,
    #[arg(long)]
    db_name: Option<String>,
    #[arg(long)]
    db_prefix: Option<String>,
    #[arg(long)]
    site_url: Option<String>,
}

impl OverrideArgs {
    /// `None` when no override flag was given at all.
    fn into_input(self) -> Option<OverrideInput> {
        let input = OverrideInput {
            host: self.db_host,
            port: self.db_port,
            user: self.db_user,
            password: self.db_password,
            name: self.db_name,
            table_prefix: self.db_prefix,
            site_url: self.site_url,
        };
        (input != OverrideInput::default()).then_some(input)
    }
}

// The step futures hold non-Send trait objects, so everything stays on one thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run_app(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the last directive was successful.
async fn run_app(cli: Cli) -> Result<bool> {
    let mut app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;
    if cli.session.is_some() {
        app_config.session_id = cli.session;
    }

    match cli.command {
        Command::Step {
            step,
            chunk,
            preview,
            overrides,
        } => {
            let request = StepRequest {
                step: Step::parse(step.as_deref()),
                chunk,
                preview,
                overrides: overrides.into_input(),
            };
            let overrides = match &app_config.session_id {
                Some(id) => file_session(&app_config, id)?,
                None => OverrideStore::disabled(),
            };
            let directive = invoke(&app_config, overrides, &request).await;
            print_directive(&directive)?;
            Ok(directive.is_ok())
        }
        Command::Drive {
            step,
            yes,
            max_invocations,
        } => drive(&app_config, Step::parse(step.as_deref()), yes, max_invocations).await,
    }
}

fn file_session(app_config: &AppConfig, id: &str) -> Result<OverrideStore> {
    let dir = &app_config.temp_root;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create session directory {}", dir.display()))?;
    Ok(OverrideStore::open(Box::new(FileSession::new(dir, id))))
}

async fn invoke(app_config: &AppConfig, overrides: OverrideStore, request: &StepRequest) -> Directive {
    let mut ctx = InstallContext::new(
        app_config.clone(),
        overrides,
        Box::new(MySqlDatabase::new()),
    );
    install::route(request, &mut ctx).await
}

/// Plays the caller's reload loop: a fresh context per invocation, session shared across them.
async fn drive(app_config: &AppConfig, start: Step, yes: bool, max_invocations: usize) -> Result<bool> {
    let memory = Arc::new(MemorySession::default());
    let mut request = StepRequest::new(start, 0);

    for invocation in 1..=max_invocations {
        let overrides = match &app_config.session_id {
            Some(id) => file_session(app_config, id)?,
            None => OverrideStore::open(Box::new(Arc::clone(&memory))),
        };
        let directive = invoke(app_config, overrides, &request).await;
        print_directive(&directive)?;

        match directive {
            Directive::Reintake { step, chunk, progress } => {
                if let Some(progress) = progress {
                    info!("[{}%] {}", progress.percentage, progress.action);
                }
                request = StepRequest::new(step, chunk);
            }
            Directive::RenderStatus(report) => match report.next {
                Some(next) if yes && report.ok && report.step != Step::Cleanup => {
                    info!("Step {} done, continuing with {}", report.step, next);
                    request = StepRequest::new(next, 0);
                }
                _ => {
                    info!("Stopped on {} after {} invocations", report.step, invocation);
                    return Ok(report.ok);
                }
            },
        }
    }

    warn!("Gave up after {} invocations", max_invocations);
    Ok(false)
}

fn print_directive(directive: &Directive) -> Result<()> {
    let json = serde_json::to_string_pretty(directive).context("Failed to serialize directive")?;
    println!("{}", json);
    Ok(())
}
