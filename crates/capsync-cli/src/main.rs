//! capsync CLI: prepare captured images and drive the durable upload queue.
//!
//! Configuration comes from `CAPSYNC_*` environment variables (a `.env` file is
//! honored). Intents live under `CAPSYNC_DATA_DIR` and survive restarts. Only
//! `run` and the `--wait` variants transfer anything; the other commands just
//! inspect or edit the queue.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use capsync_cli::{init_tracing, is_drained, output_path, read_source_image, EventTally, Host};
use capsync_core::{Config, NewIntent};
use capsync_processing::ImagePreprocessor;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "capsync", about = "Resilient capture upload pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preprocess an image and write the upload-ready JPEG
    Prepare {
        /// Path to the captured image
        file: PathBuf,
        /// Output path (defaults to the input directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Preprocess an image and queue it for an existing capture
    Enqueue {
        /// Path to the captured image
        file: PathBuf,
        /// Server-side capture id the image belongs to
        #[arg(long)]
        capture_id: String,
        /// Queue the file as-is, skipping preprocessing
        #[arg(long)]
        raw: bool,
    },
    /// Stage a capture draft, create the capture and queue its image
    Submit {
        /// Path to the captured image
        file: PathBuf,
        #[arg(long)]
        node_id: String,
        #[arg(long)]
        node_name: Option<String>,
        #[arg(long)]
        checkin_token: String,
        /// Keep running until the queue is drained
        #[arg(long)]
        wait: bool,
    },
    /// Print the queue snapshot
    Status,
    /// Make a pending or failed intent eligible immediately
    Retry {
        /// Capture id
        capture_id: String,
    },
    /// Stop tracking an intent and delete its record
    Remove {
        /// Capture id
        capture_id: String,
    },
    /// Upload due intents until the queue is drained (or forever with --watch)
    Run {
        /// Keep running until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Inspect or discard the active capture draft
    Draft {
        #[command(subcommand)]
        sub: DraftCommands,
    },
}

#[derive(Subcommand)]
enum DraftCommands {
    /// Print the active draft (without its payload)
    Show,
    /// Discard the active draft
    Clear,
    /// Submit the active draft left by an interrupted `submit`
    Submit {
        /// Keep running until the queue is drained
        #[arg(long)]
        wait: bool,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Prepare { file, out } => {
            let asset = ImagePreprocessor::new(config.preprocess.clone())
                .preprocess(&read_source_image(&file)?)?;
            let target = output_path(&file, out, &asset.file_name);
            std::fs::write(&target, &asset.payload)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            print_json(&json!({
                "output": target,
                "file_name": asset.file_name,
                "mime_type": asset.mime_type,
                "width": asset.width,
                "height": asset.height,
                "size": asset.size,
                "original_size": asset.original_size,
            }))?;
        }
        Commands::Enqueue {
            file,
            capture_id,
            raw,
        } => {
            let source = read_source_image(&file)?;
            let intent = if raw {
                NewIntent {
                    capture_id,
                    mime_type: source
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    payload: source.data,
                    file_name: source.file_name,
                    created_at: None,
                }
            } else {
                let asset =
                    ImagePreprocessor::new(config.preprocess.clone()).preprocess(&source)?;
                NewIntent::from_asset(capture_id, &asset)
            };

            let host = Host::start(config).await?;
            let outcome = host.queue.enqueue(intent).await?;
            print_json(&json!({ "outcome": format!("{:?}", outcome) }))?;
            print_json(&host.queue.snapshot())?;
            host.shutdown().await;
        }
        Commands::Submit {
            file,
            node_id,
            node_name,
            checkin_token,
            wait,
        } => {
            let asset = ImagePreprocessor::new(config.preprocess.clone())
                .preprocess(&read_source_image(&file)?)?;
            let host = Host::start(config).await?;
            let submitter = host.submitter();
            submitter
                .stage(&asset, &node_id, node_name, &checkin_token)
                .await;
            let submitted = submitter.submit_draft().await?;
            print_json(&submitted.capture)?;
            finish(&host, wait).await?;
        }
        Commands::Status => {
            let host = Host::start(config).await?;
            print_json(&host.queue.snapshot())?;
            host.shutdown().await;
        }
        Commands::Retry { capture_id } => {
            let host = Host::start(config).await?;
            if !host.queue.retry_now(&capture_id).await {
                anyhow::bail!("No upload intent for capture {}", capture_id);
            }
            print_json(&host.queue.snapshot())?;
            host.shutdown().await;
        }
        Commands::Remove { capture_id } => {
            let host = Host::start(config).await?;
            let removed = host.queue.remove(&capture_id).await;
            print_json(&json!({ "capture_id": capture_id, "removed": removed }))?;
            host.shutdown().await;
        }
        Commands::Run { watch } => {
            let host = Host::start(config).await?;
            if watch {
                let verifier = host.auto_verifier().map(|v| v.spawn());
                host.go_online();
                tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted, stopping");
                if let Some(task) = verifier {
                    task.abort();
                }
                print_json(&host.queue.snapshot())?;
                host.shutdown().await;
            } else {
                finish(&host, true).await?;
            }
        }
        Commands::Draft { sub } => match sub {
            DraftCommands::Show => {
                let host = Host::start(config).await?;
                match host.submitter().resume().await? {
                    Some(draft) => print_json(&json!({
                        "node_id": draft.node_id,
                        "node_name": draft.node_name,
                        "captured_at": draft.captured_at,
                        "file_name": draft.file_name,
                        "mime_type": draft.mime_type,
                        "size": draft.size,
                    }))?,
                    None => print_json(&json!(null))?,
                }
                host.shutdown().await;
            }
            DraftCommands::Clear => {
                let host = Host::start(config).await?;
                host.submitter().discard().await?;
                host.shutdown().await;
            }
            DraftCommands::Submit { wait } => {
                let host = Host::start(config).await?;
                let submitted = host.submitter().submit_draft().await?;
                print_json(&submitted.capture)?;
                finish(&host, wait).await?;
            }
        },
    }

    Ok(())
}

/// Optionally drive the queue until it is drained, then shut it down.
async fn finish(host: &Host, wait: bool) -> anyhow::Result<()> {
    if !wait {
        host.shutdown().await;
        return Ok(());
    }

    let mut events = host.events.subscribe();
    let verifier = host.auto_verifier().map(|v| v.spawn());
    let mut tally = EventTally::default();
    host.go_online();

    tokio::select! {
        drained = host.queue.wait_for(is_drained) => {
            drained?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping");
        }
    }

    if let Some(task) = verifier {
        let grace = Duration::from_secs(host.config.http_timeout_secs);
        if !tally.settle_verifications(&mut events, grace).await {
            tracing::warn!(
                uploaded = tally.uploaded,
                verified = tally.verified,
                "Not every upload was auto-verified"
            );
        }
        task.abort();
    } else {
        tally.absorb(&mut events);
    }

    tracing::info!(uploaded = tally.uploaded, "Upload queue drained");
    print_json(&host.queue.snapshot())?;
    host.shutdown().await;
    Ok(())
}
