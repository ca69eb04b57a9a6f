//! querygate binary
//!
//! - `serve`: JSON-lines gateway on stdin/stdout
//! - `inspect`: dry-run analysis of one statement

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use querygate::{inspect, protocol, ApprovalPolicy, Gateway, GatewayConfig, Inspection, PrincipalId};
use querygate_db::SqliteBackend;
use querygate_logging::{init_logging, LogConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "querygate", about = "Mediated SQL gateway", version)]
struct Cli {
    /// Mirror logs on stderr (warnings only otherwise)
    #[arg(short = 'v', long, global = true, env = "QUERYGATE_VERBOSE")]
    verbose: bool,

    /// Do not write a log file under the querygate home directory
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve JSON-lines requests on stdin, one response per line on stdout
    Serve {
        /// Gateway configuration (TOML)
        #[arg(short, long, env = "QUERYGATE_CONFIG")]
        config: PathBuf,

        /// Override `database.url`
        #[arg(long, env = "QUERYGATE_DATABASE_URL")]
        database_url: Option<String>,
    },

    /// Show how a statement would be handled, without executing it
    Inspect {
        #[arg(short, long, env = "QUERYGATE_CONFIG")]
        config: PathBuf,

        /// Principal issuing the statement
        #[arg(long)]
        principal: i64,

        /// Treat the caller as trusted
        #[arg(long)]
        trusted: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        sql: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LogConfig {
        app_name: "querygate",
        verbose: cli.verbose,
        log_to_file: !cli.no_log_file,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", e);
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
        .and_then(|rt| rt.block_on(run_command(cli.command)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

async fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Serve {
            config,
            database_url,
        } => serve(&config, database_url).await,
        Commands::Inspect {
            config,
            principal,
            trusted,
            json,
            sql,
        } => {
            let config = load_config(&config)?;
            let registry = config.registry().context("Invalid table definitions")?;
            let policy = ApprovalPolicy::new(config.policy.clone());
            let report = inspect(&sql, PrincipalId(principal), trusted, &registry, &policy)
                .map_err(|e| anyhow::anyhow!("{} ({})", e, e.code()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_inspection(&report);
            }
            Ok(())
        }
    }
}

async fn serve(config_path: &Path, database_url: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(url) = database_url {
        config.database.url = url;
    }

    let backend = SqliteBackend::open_from_url(&config.database.url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.url))?;
    if let Some(init) = &config.database.init_sql {
        let script = std::fs::read_to_string(init)
            .with_context(|| format!("Failed to read init script {}", init.display()))?;
        backend
            .execute_batch(&script)
            .await
            .with_context(|| format!("Init script {} failed", init.display()))?;
        info!(script = %init.display(), "Database initialized");
    }

    let gateway = Gateway::from_config(Arc::new(backend), &config)
        .context("Failed to build gateway")?;
    info!(tables = gateway.registry().len(), "Gateway ready, reading requests from stdin");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let handled = protocol::serve(&gateway, stdin, tokio::io::stdout())
        .await
        .context("Request stream failed")?;
    info!("Served {} requests", handled);
    Ok(())
}

fn load_config(path: &Path) -> Result<GatewayConfig> {
    GatewayConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn print_inspection(report: &Inspection) {
    println!("Kind:        {}", report.kind);
    println!("Tables:      {}", report.tables.join(", "));
    println!("WHERE:       {}", if report.has_where { "yes" } else { "no" });
    println!("Effective:   {}", report.effective_sql);
    match &report.approval_reason {
        Some(reason) => println!("Decision:    approval required ({})", reason),
        None => println!("Decision:    execute"),
    }
    match (&report.undo_sql, &report.not_undoable) {
        (Some(sql), _) => println!("Undo:        {}", sql),
        (None, Some(reason)) => println!("Undo:        not undoable ({})", reason),
        (None, None) => println!("Undo:        -"),
    }
}
