mod args;
mod commands;

use clap::Parser;
use docsync::Result;
use tracing::Level;

#[derive(clap::Parser, Clone, Debug)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    command: Command,

    /// Set this flag to enable logging to stderr as JSON. Logs are in a text format by default.
    #[arg(long, default_value_t = false, global = true)]
    log_json: bool,
}

#[derive(clap::Subcommand, Clone, Debug)]
enum Command {
    CheckFile(commands::check_file::Args),
    Completion(commands::completion::Args),
    GetDoc(commands::get_doc::Args),
    Upsert(commands::upsert::Args),
}

#[derive(Eq, PartialEq)]
enum LogMode {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load `.env` before parsing so it can supply `DOCSYNC_*` variables.
    // A missing file is fine.
    let dotenv_res = dotenvy::dotenv();

    let args = Args::parse();

    init_logging(args.log_json)?;

    match dotenv_res {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {},
        Err(e) => tracing::warn!(err = %e, "Error loading .env file"),
    }

    if tracing::enabled!(Level::DEBUG) {
        tracing::debug!(args = ?args.clone(), "parsed CLI args");
    }

    match args.command {
        Command::CheckFile(cmd_args) => commands::check_file::main(cmd_args).await?,
        Command::Completion(cmd_args) => commands::completion::main(cmd_args).await?,
        Command::GetDoc(cmd_args) => commands::get_doc::main(cmd_args).await?,
        Command::Upsert(cmd_args) => commands::upsert::main(cmd_args).await?,
    };

    Ok(())
}

fn init_logging(log_json: bool) -> Result<()> {
    use tracing_bunyan_formatter::{
        BunyanFormattingLayer,
        JsonStorageLayer,
    };
    use tracing_subscriber::{
        EnvFilter,
        filter::LevelFilter,
        fmt,
        prelude::*,
    };

    let log_mode = if log_json { LogMode::Json } else { LogMode::Pretty };

    tracing_subscriber::Registry::default()
        .with(if log_mode == LogMode::Pretty {
                  Some(fmt::Layer::new()
                           .event_format(fmt::format()
                                             .pretty()
                                             .with_timer(fmt::time::UtcTime::<_>::
                                                             rfc_3339())
                                             .with_target(true)
                                             .with_source_location(true))
                           .with_writer(std::io::stderr))
              } else {
                  None
              })
        .with(if log_mode == LogMode::Json {
                  Some(JsonStorageLayer
                           .and_then(BunyanFormattingLayer::new(
                               env!("CARGO_CRATE_NAME").to_string(),
                               std::io::stderr)))
              } else {
                  None
              })
        // Global filter
        .with(EnvFilter::builder()
                  .with_default_directive(LevelFilter::INFO.into())
                  .parse(std::env::var("RUST_LOG")
                             .unwrap_or(format!("warn,{crate_}=info,docsync_store=info",
                                                crate_ = env!("CARGO_CRATE_NAME"))))?)
        .try_init()?;

    Ok(())
}
