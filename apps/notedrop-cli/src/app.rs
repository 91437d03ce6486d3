//! Command execution: wires the HTTP store, resume state and uploader.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use notedrop_protocol::UploadMetadata;
use notedrop_store_client::HttpStore;
use notedrop_uploader::{
    CancelOutcome, ResumeStore, SessionRegistry, UploadError, UploadEvent, UploadOutcome,
    UploadRequest, Uploader,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::Command;
use crate::config::Config;

/// Runs one CLI command to completion.
pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let store = HttpStore::new(&config.server_url, config.api_token.as_deref())?;
    let records = ResumeStore::new(config.resolved_state_path()?)?;
    let mut uploader = Uploader::new(Arc::new(store), Arc::new(records), config.upload.clone())?;
    let events = uploader.take_events();

    match command {
        Command::Upload {
            file,
            name,
            content_type,
            meta,
            destination_token,
        } => {
            let request = build_request(file, name, content_type, meta, destination_token);
            let registry = Arc::clone(uploader.registry());
            let renderer = events.map(|rx| tokio::spawn(render_events(rx)));
            let result = until_interrupted(&registry, uploader.upload(request)).await;
            finish(uploader, renderer, result).await
        }
        Command::Resume { session_id, file } => {
            let registry = Arc::clone(uploader.registry());
            let renderer = events.map(|rx| tokio::spawn(render_events(rx)));
            let result = until_interrupted(&registry, uploader.resume(&session_id, &file)).await;
            finish(uploader, renderer, result).await
        }
        Command::Cancel { session_id } => {
            match uploader.cancel(&session_id).await? {
                CancelOutcome::Signalled => println!("{session_id}: cancellation requested"),
                CancelOutcome::Released {
                    remote_released: true,
                } => println!("{session_id}: cancelled, server state released"),
                CancelOutcome::Released {
                    remote_released: false,
                } => println!("{session_id}: cancelled, server had already dropped the session"),
            }
            Ok(())
        }
        Command::Status { session_id } => {
            let info = uploader.inspect(&session_id).await?;
            let record = &info.record;
            println!("session:   {}", record.session_id);
            println!("file:      {} ({})", record.file_name, human_bytes(record.file_size));
            println!("source:    {}", record.source_path.display());
            println!("started:   {}", record.created_at.to_rfc3339());
            println!(
                "chunks:    {}/{} uploaded",
                info.uploaded_chunk_count, record.total_chunks
            );
            if !info.missing_chunks.is_empty() {
                println!("missing:   {:?}", info.missing_chunks);
            }
            match info.reason {
                None => println!("resumable: yes"),
                Some(reason) => println!("resumable: no ({reason})"),
            }
            Ok(())
        }
        Command::Pending => {
            let pending = uploader.pending();
            if pending.is_empty() {
                println!("no pending uploads");
            }
            for record in pending {
                println!(
                    "{}  {}  {}  {} chunks  {}",
                    record.session_id,
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    human_bytes(record.file_size),
                    record.total_chunks,
                    record.source_path.display()
                );
            }
            Ok(())
        }
    }
}

fn build_request(
    file: PathBuf,
    name: Option<String>,
    content_type: Option<String>,
    meta: Vec<(String, String)>,
    destination_token: Option<String>,
) -> UploadRequest {
    let metadata: UploadMetadata = meta
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    UploadRequest {
        file_name: name,
        content_type,
        metadata,
        destination_token,
        ..UploadRequest::new(file)
    }
}

/// Awaits `work`, turning the first Ctrl-C into a graceful cancellation.
///
/// Active sessions stop after their in-flight batch and sessions not yet
/// acquired start cancelled; `work` is still awaited so the backend is told
/// and the resume record dropped. A second Ctrl-C abandons the wait.
async fn until_interrupted<F>(
    registry: &SessionRegistry,
    work: F,
) -> Result<UploadOutcome, UploadError>
where
    F: Future<Output = Result<UploadOutcome, UploadError>>,
{
    tokio::pin!(work);
    tokio::select! {
        result = &mut work => return result,
        _ = tokio::signal::ctrl_c() => {}
    }

    let sessions = registry.active_ids();
    registry.cancel_all();
    info!(?sessions, "interrupt received, finishing the current batch");

    tokio::select! {
        result = &mut work => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(?sessions, "second interrupt, exiting without waiting for the backend");
            Err(UploadError::Cancelled)
        }
    }
}

/// Drains remaining events, then reports the outcome.
async fn finish(
    uploader: Uploader,
    renderer: Option<tokio::task::JoinHandle<()>>,
    result: Result<UploadOutcome, UploadError>,
) -> anyhow::Result<()> {
    // Dropping the uploader closes the event channel.
    drop(uploader);
    if let Some(handle) = renderer
        && let Err(e) = handle.await
    {
        warn!(error = %e, "event renderer stopped unexpectedly");
    }

    let outcome = result?;
    match &outcome.artifact.url {
        Some(url) => println!("{}  {}", outcome.artifact.id, url),
        None => println!("{}", outcome.artifact.id),
    }
    Ok(())
}

async fn render_events(mut rx: mpsc::Receiver<UploadEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            UploadEvent::Started {
                session_id,
                file_name,
                total_chunks,
                resumed,
            } => {
                info!(
                    session = %session_id,
                    file = %file_name,
                    chunks = total_chunks,
                    resumed,
                    "upload started"
                );
            }
            UploadEvent::StatusChanged { session_id, status } => {
                debug!(session = %session_id, %status, "status changed");
            }
            UploadEvent::Progress(p) => {
                info!(
                    session = %p.session_id,
                    chunk = p.current_chunk_index,
                    done = p.completed_chunks,
                    total = p.total_chunks,
                    rate = %format!("{}/s", human_bytes(p.bytes_per_second as u64)),
                    eta_secs = p.eta.map(|d| d.as_secs()),
                    "{:.0}%",
                    p.percent
                );
            }
            UploadEvent::ChunkRetry {
                session_id,
                chunk_index,
                attempt,
                delay,
                error,
            } => {
                warn!(
                    session = %session_id,
                    chunk = chunk_index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying chunk: {error}"
                );
            }
            UploadEvent::Completed {
                session_id,
                artifact,
            } => {
                info!(
                    session = %session_id,
                    artifact = %artifact.id,
                    size = artifact.size,
                    "upload complete"
                );
            }
            UploadEvent::Failed {
                session_id,
                error,
                failed_chunks,
                resumable,
            } => {
                error!(session = %session_id, ?failed_chunks, "upload failed: {error}");
                if resumable {
                    info!("resume later with: notedrop resume {session_id} <FILE>");
                }
            }
            UploadEvent::Cancelled { session_id } => {
                info!(session = %session_id, "upload cancelled");
            }
        }
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_scales_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(10 * 1024 * 1024), "10.0 MiB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn request_carries_flags_and_metadata() {
        let req = build_request(
            PathBuf::from("/tmp/notes.pdf"),
            Some("week3.pdf".into()),
            None,
            vec![("course".into(), "PHY101".into())],
            Some("folder-7".into()),
        );

        assert_eq!(req.source_path, PathBuf::from("/tmp/notes.pdf"));
        assert_eq!(req.file_name.as_deref(), Some("week3.pdf"));
        assert!(req.content_type.is_none());
        assert_eq!(req.metadata["course"], "PHY101");
        assert_eq!(req.destination_token.as_deref(), Some("folder-7"));
    }

    #[tokio::test]
    async fn finished_work_is_returned_without_interrupt() {
        let registry = SessionRegistry::new();
        let result = until_interrupted(&registry, async {
            Err(UploadError::NoResumeState("s-1".into()))
        })
        .await;
        assert!(matches!(result, Err(UploadError::NoResumeState(_))));
        assert!(!registry.shutdown_requested());
    }

    #[tokio::test]
    async fn interrupt_before_any_session_still_cancels_it() {
        let registry = SessionRegistry::new();
        registry.cancel_all();

        let lease = registry.acquire("s-1").unwrap();
        let result = until_interrupted(&registry, async move {
            lease.token().cancelled().await;
            Err(UploadError::Cancelled)
        })
        .await;

        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert!(registry.shutdown_requested());
    }
}
