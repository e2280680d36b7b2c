//! `fieldsync` operator CLI.
//!
//! ```bash
//! AI_API_ENDPOINT=http://localhost:8000/generate fieldsync generate --element hero --field title
//! fieldsync watch
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fieldsync_lib::{init_logging, ChangeCallback, Document, GenerationRequest, SyncConfig, SyncFacade};
use log::info;

#[derive(Parser, Debug)]
#[command(
    name = "fieldsync",
    version,
    about = "Sync editor fields with an asynchronous content generation service"
)]
struct Cli {
    /// Job submission endpoint.
    ///
    /// Environment variable: `AI_API_ENDPOINT`
    #[arg(long, env = "AI_API_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Result stream endpoint; derived from `--endpoint` when omitted.
    ///
    /// Environment variable: `AI_STREAM_ENDPOINT`
    #[arg(long, env = "AI_STREAM_ENDPOINT", global = true)]
    stream_endpoint: Option<String>,

    /// Path of the JSON record store.
    ///
    /// Environment variable: `AI_DATA_PATH`
    #[arg(long, env = "AI_DATA_PATH", global = true)]
    data: Option<PathBuf>,

    /// Business context sent with every job.
    ///
    /// Environment variable: `BUSINESS_DESCRIPTION`
    #[arg(long, env = "BUSINESS_DESCRIPTION", global = true)]
    business: Option<String>,

    /// Submit bare element ids instead of per-field ids.
    #[arg(long, global = true)]
    unscoped_ids: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the store and print each observed change until Ctrl-C.
    Watch,
    /// Generate one field and print the stored record.
    Generate {
        #[arg(long)]
        element: String,
        #[arg(long)]
        field: String,
        #[arg(long, default_value = "text")]
        field_type: String,
        #[arg(long)]
        current: Option<String>,
        #[arg(long)]
        context: Option<String>,
    },
    /// Validate the store, repairing it if needed.
    Validate,
    /// Delete old backups.
    Cleanup {
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Print the current document.
    Show,
    /// Probe the generation service.
    Check,
}

impl Cli {
    fn sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::from_env();
        if let Some(endpoint) = &self.endpoint {
            config.generate_endpoint = Some(endpoint.clone());
        }
        if let Some(endpoint) = &self.stream_endpoint {
            config.stream_endpoint = Some(endpoint.clone());
        }
        if let Some(path) = &self.data {
            config.data_path = path.clone();
        }
        if let Some(business) = &self.business {
            config.business_description = business.clone();
        }
        if self.unscoped_ids {
            config.scope_request_ids = false;
        }
        config
    }
}

fn print_changes() -> ChangeCallback {
    Arc::new(|document: &Document| {
        println!(
            "{} record(s), latest {}",
            document.record_count(),
            document.latest_timestamp().unwrap_or("-")
        );
    })
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = cli.sync_config();
    let facade = SyncFacade::from_config(&config, print_changes())?;

    match cli.command {
        Command::Watch => {
            facade.start_watching().await?;
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("shutting down");
            facade.stop_watching().await?;
        }
        Command::Generate {
            element,
            field,
            field_type,
            current,
            context,
        } => {
            let mut request = GenerationRequest::new(element, field, field_type);
            request.current_value = current;
            request.prompt_context = context;
            let record = facade.request_generation(request).await?;
            print_json(&record)?;
        }
        Command::Validate => {
            let report = facade.validate_store().await?;
            print_json(&report)?;
            if !report.is_valid && !report.repaired {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Cleanup { keep } => {
            let removed = facade
                .cleanup_backups(keep.unwrap_or(config.backup_keep))
                .await?;
            println!("removed {removed} backup(s)");
        }
        Command::Show => print_json(&facade.read_document().await?)?,
        Command::Check => {
            if !facade.check_connection().await {
                println!("generation service unreachable");
                return Ok(ExitCode::FAILURE);
            }
            println!("generation service reachable");
        }
    }

    Ok(ExitCode::SUCCESS)
}
