use clap::Parser;
use neural::cli::{commands, output::OutputMode, Cli, Commands};
use neural::config::{AppConfig, LoggingConfig};
use neural::error::Result;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("\x1b[31m✗ {}\x1b[0m", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_from(&cli.config)?;
    init_logging(&config.logging);
    let mode = OutputMode::from_json_flag(cli.json);

    match &cli.command {
        Commands::Account => commands::show_account(&config, mode).await,
        Commands::Assets { class } => commands::list_assets(&config, class.as_deref(), mode).await,
        Commands::Download {
            symbols,
            dataset_type,
            resolution,
            start,
            end,
            name,
            dir,
        } => {
            commands::download(
                &config,
                symbols,
                *dataset_type,
                resolution,
                *start,
                *end,
                name,
                dir.as_deref(),
            )
            .await
        }
        Commands::Train(args) => {
            let data_dir = args.dir.clone().unwrap_or_else(|| config.data.dir.clone());
            let args = args.clone();
            // training is CPU bound and never awaits
            tokio::task::spawn_blocking(move || commands::train(&data_dir, &args))
                .await
                .map_err(|e| anyhow::anyhow!("training task failed: {}", e))??;
            Ok(())
        }
        Commands::Trade {
            agent_dir,
            dry_run,
            max_intervals,
        } => commands::trade(&config, agent_dir, *dry_run, *max_intervals).await,
    }
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // File logging only when NEURAL_LOG_DIR is set and writable;
    // `tracing_appender::rolling::daily` panics if it cannot create the file.
    let file_layer = std::env::var("NEURAL_LOG_DIR").ok().and_then(|log_dir| {
        let writable = std::fs::create_dir_all(&log_dir).is_ok()
            && std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(std::path::Path::new(&log_dir).join("neural.log"))
                .is_ok();
        if !writable {
            eprintln!(
                "Warning: Could not write to log directory {}, file logging disabled",
                log_dir
            );
            return None;
        }

        let file_appender = tracing_appender::rolling::daily(&log_dir, "neural.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Keep the guard alive for the life of the process
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let (json_layer, console_layer) = if logging.json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();
}
