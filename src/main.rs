use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sqlglot_playground::engine::SqlglotEngine;
use sqlglot_playground::translate::is_error_block;
use sqlglot_playground::{server, Config, DialectId, ErrorLevel, ServiceStatus, TranslationService};

#[derive(Parser, Debug)]
#[command(name = "sqlglot-playground", version, about = "Live SQL dialect playground backed by sqlglot")]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the playground page
    Serve(ServeArgs),
    /// Translate a file (or stdin) once and print the result
    Translate(TranslateArgs),
    /// List the dialects sqlglot supports
    Dialects,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// TOML config file
    #[arg(long, short, global = true, env = "PLAYGROUND_CONFIG")]
    config: Option<PathBuf>,

    /// Python interpreter hosting sqlglot
    #[arg(long, global = true, env = "PLAYGROUND_PYTHON")]
    python: Option<String>,

    /// Do not pip-install sqlglot before starting
    #[arg(long, global = true)]
    no_install: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "PLAYGROUND_BIND")]
    bind: Option<SocketAddr>,

    /// Quiet period before the strict re-translation, 300 to 600 ms
    #[arg(long)]
    debounce_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    /// Source dialect (empty for generic SQL)
    #[arg(long, short, default_value = "")]
    from: String,

    /// Target dialect (empty for generic SQL)
    #[arg(long, short, default_value = "")]
    to: String,

    /// Skip what cannot be parsed instead of failing
    #[arg(long)]
    lenient: bool,

    /// Input file, stdin if omitted
    input: Option<PathBuf>,
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sqlglot_playground=info,sqlglot_worker=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(engine: &EngineArgs) -> Result<Config> {
    let mut config = Config::load(engine.config.as_deref())?;
    if let Some(python) = &engine.python {
        config.engine.python = python.clone();
    }
    if engine.no_install {
        config.engine.install = false;
    }
    Ok(config)
}

async fn ready_service(config: &Config) -> Result<TranslationService<SqlglotEngine>> {
    let service = TranslationService::new(SqlglotEngine::new(config.engine.clone()));
    if let ServiceStatus::Failed { reason } = service.initialize().await {
        bail!("translation engine failed to start: {reason}");
    }
    Ok(service)
}

async fn translate(config: &Config, args: TranslateArgs) -> Result<()> {
    let sql = match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut sql = String::new();
            std::io::stdin()
                .read_to_string(&mut sql)
                .context("failed to read stdin")?;
            sql
        }
    };
    let service = ready_service(config).await?;
    let level = if args.lenient {
        ErrorLevel::Ignore
    } else {
        ErrorLevel::Strict
    };
    let rendered = service
        .translate(&sql, &DialectId::new(args.from), &DialectId::new(args.to), level)
        .await?;
    print!("{rendered}");
    if is_error_block(&rendered) {
        bail!("translation failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();
    let mut config = load_config(&cli.engine)?;

    match cli.command {
        Command::Serve(args) => {
            if let Some(bind) = args.bind {
                config.bind = bind;
            }
            if let Some(debounce_ms) = args.debounce_ms {
                config.debounce_ms = debounce_ms;
            }
            config.validate()?;
            info!(python = %config.engine.python, install = config.engine.install, "starting playground");
            let service = Arc::new(TranslationService::new(SqlglotEngine::new(
                config.engine.clone(),
            )));
            server::serve(config.bind, service, config.debounce()).await
        }
        Command::Translate(args) => translate(&config, args).await,
        Command::Dialects => {
            let service = ready_service(&config).await?;
            for dialect in service.catalog().iter() {
                println!("{dialect}");
            }
            Ok(())
        }
    }
}
