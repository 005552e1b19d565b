use clap::Parser;
use opex_etl::args::{Args, Command};
use opex_etl::{commands, Config, Result};
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().opex_home().path();
    let token = args.common().sharepoint_token();

    let _: () = match args.command() {
        Command::Init(init_args) => {
            commands::init(home, init_args.project(), init_args.library())
                .await?
                .print()
        }

        Command::Run(run_args) => {
            let config = Config::load(home).await?;
            commands::run(config, args.common().log_level(), token, run_args.period())
                .await?
                .print()
        }

        Command::Download(download_args) => {
            let config = Config::load(home).await?;
            commands::download(
                config,
                download_args.job(),
                download_args.exec_id(),
                download_args.period(),
                token,
            )
            .await?
            .print()
        }

        Command::Upload(upload_args) => {
            let config = Config::load(home).await?;
            commands::upload(
                config,
                upload_args.file(),
                upload_args.sheets(),
                upload_args.exec_id(),
            )
            .await?
            .print()
        }

        Command::Reshape(reshape_args) => {
            let config = Config::load(home).await?;
            commands::reshape(
                config,
                reshape_args.file(),
                reshape_args.sheet(),
                reshape_args.output(),
            )
            .await?
            .print()
        }
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for the library and binary only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
