//! Uploads files to a ChunkVault store.
//!
//! Files are fingerprinted, queued and uploaded with bounded concurrency.
//! Ctrl-C pauses everything; running the same command again resumes from
//! the chunks the store already has.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chunkvault_client::{
    AddOptions, HttpTransport, QueueConfig, QueueEvent, TaskStatus, UploadQueue,
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "chunkvault", version, about = "Resumable chunked uploader")]
struct Args {
    /// Store base URL.
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    server: String,

    /// Owner identity sent with every request.
    #[arg(long)]
    owner: String,

    /// Destination folder id.
    #[arg(long)]
    folder: Option<String>,

    /// Uploads running at the same time.
    #[arg(long, default_value_t = 3)]
    concurrency: usize,

    /// MIME type recorded for every file.
    #[arg(long)]
    mime_type: Option<String>,

    /// Files to upload.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(run(args))?;

    println!(
        "{} uploaded, {} failed, {} paused",
        summary.uploaded, summary.failed, summary.paused
    );
    Ok(if summary.failed > 0 || summary.paused > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[derive(Debug, Default)]
struct Summary {
    uploaded: usize,
    failed: usize,
    paused: usize,
}

async fn run(args: Args) -> anyhow::Result<Summary> {
    let transport = Arc::new(
        HttpTransport::new(&args.server, &args.owner).context("creating HTTP client")?,
    );
    let queue = UploadQueue::new(
        transport,
        QueueConfig {
            max_concurrent: args.concurrency,
            ..QueueConfig::default()
        },
    );
    let mut events = queue
        .take_events()
        .context("queue event stream unavailable")?;

    let mut names = HashMap::new();
    for path in &args.files {
        let options = AddOptions {
            destination_folder_id: args.folder.clone(),
            mime_type: args.mime_type.clone(),
            ..AddOptions::default()
        };
        let task_id = queue
            .add_file(path, options)
            .await
            .with_context(|| format!("fingerprinting {}", path.display()))?;
        names.insert(task_id, path.display().to_string());
        drain(&mut events, &names);
    }

    let idle = queue.wait_idle();
    tokio::pin!(idle);
    loop {
        tokio::select! {
            Some(event) = events.recv() => report(&names, event),
            _ = &mut idle => break,
            _ = tokio::signal::ctrl_c() => {
                for task in queue.tasks() {
                    if matches!(task.status, TaskStatus::Waiting | TaskStatus::Uploading) {
                        let _ = queue.pause(&task.id);
                    }
                }
                eprintln!("interrupted; run again to resume");
                break;
            }
        }
    }
    drain(&mut events, &names);

    let mut summary = Summary::default();
    for task in queue.tasks() {
        match task.status {
            TaskStatus::Success => summary.uploaded += 1,
            TaskStatus::Error => summary.failed += 1,
            _ => summary.paused += 1,
        }
    }
    Ok(summary)
}

fn drain(events: &mut mpsc::UnboundedReceiver<QueueEvent>, names: &HashMap<String, String>) {
    while let Ok(event) = events.try_recv() {
        report(names, event);
    }
}

fn report(names: &HashMap<String, String>, event: QueueEvent) {
    let name = |id: &str| names.get(id).map(String::as_str).unwrap_or("?").to_string();
    match event {
        QueueEvent::Progress {
            task_id,
            uploaded,
            total,
            bytes_per_second,
        } => {
            println!(
                "{}: {uploaded}/{total} chunks, {}",
                name(&task_id),
                format_rate(bytes_per_second)
            );
        }
        QueueEvent::Completed { task_id, file_id } => {
            println!("{}: done (file {file_id})", name(&task_id));
        }
        QueueEvent::Failed { task_id, error } => {
            eprintln!("{}: failed: {error}", name(&task_id));
        }
        QueueEvent::StatusChanged { task_id, status } => {
            tracing::debug!(task = %name(&task_id), ?status, "status changed");
        }
        QueueEvent::TaskAdded { .. } | QueueEvent::Removed { .. } => {}
    }
}

fn format_rate(bytes_per_second: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_second.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
