use std::time::Duration;

use clap::Parser;
use dlive_api::{BroadcastRef, MetadataClient};
use dvod_engine::{
    DownloadError, DownloadSession, EngineConfig, Orchestrator, RetryPolicy, create_client,
};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod error;
mod progress;
mod util;

use cli::CliArgs;
use error::AppError;
use util::{format_bytes, format_duration};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    if args.recent {
        return list_recent(&args).await;
    }

    let broadcast = BroadcastRef::parse(&args.target)?;
    let config = EngineConfig {
        prefetch_concurrency: args.concurrency.clamp(1, 4),
        segment_fetch_timeout: Duration::from_secs(args.segment_timeout),
        segment_retry: RetryPolicy {
            max_attempts: args.retries.max(1),
            ..RetryPolicy::default()
        },
        ..EngineConfig::default()
    };
    let (orchestrator, event_rx) = Orchestrator::new(config)?;

    let mut session = orchestrator.start(broadcast).await?;
    if args.list {
        print_variants(&session);
        return Ok(());
    }

    // Progress rendering happens on its own task; the bar is hidden in
    // verbose mode so it does not interleave with debug logs.
    let renderer = progress::spawn(event_rx, !args.verbose);

    let trigger = orchestrator.cancel_trigger();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling download");
            trigger.cancel();
        }
    });

    let result = orchestrator
        .download(&mut session, args.quality, &args.out_dir, args.filename.as_deref())
        .await;
    // Closing the orchestrator ends the event channel and with it the renderer.
    drop(orchestrator);
    let _ = renderer.await;

    match result {
        Ok(path) => {
            println!("Saved to {}", path.display());
            Ok(())
        }
        Err(DownloadError::Cancelled) => {
            eprintln!("Download cancelled, no file was written.");
            Err(AppError::Download(DownloadError::Cancelled))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_variants(session: &DownloadSession) {
    let metadata = &session.metadata;
    let mut header = format!("{} - {}", metadata.owner_display_name, metadata.title);
    if metadata.duration_seconds > 0 {
        header += &format!(" ({})", format_duration(metadata.duration_seconds));
    }
    println!("{header}");
    for variant in &session.variants {
        let mut line = format!("{}. {}", variant.index, variant.label);
        if let Some(resolution) = &variant.resolution {
            line += &format!(" ({resolution})");
        }
        if let Some(bandwidth) = variant.bandwidth {
            line += &format!(" @ {} kbps", bandwidth / 1000);
            if metadata.duration_seconds > 0 {
                let estimated = bandwidth * metadata.duration_seconds / 8;
                line += &format!(" · ~{}", format_bytes(estimated));
            }
        }
        println!("{line}");
    }
}

async fn list_recent(args: &CliArgs) -> Result<(), AppError> {
    let client = create_client(&EngineConfig::default())?;
    let api = MetadataClient::new(client);
    let broadcasts = api
        .list_recent_broadcasts(&args.target, args.recent_count)
        .await?;
    println!("Recent broadcasts for {}:", args.target);
    for broadcast in broadcasts {
        let duration = broadcast
            .duration_seconds
            .map(format_duration)
            .unwrap_or_else(|| "--:--:--".to_string());
        println!("{}  {}  {}", broadcast.permlink, duration, broadcast.title);
    }
    Ok(())
}
