use std::time::{Duration, Instant};
use anyhow::{bail, Context};
use courier::config::{init_config, TransportSection, DEFAULT_CONFIG_PATH};
use courier::core::UploadSessionManager;
use courier::{UploadEvent, UploadStatus};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("courier=info")),
        )
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = init_config(&path).with_context(|| format!("Can't load {}", path))?;
    if config.files.is_empty() {
        bail!("No files listed in {}", path);
    }

    let handle = UploadSessionManager::new(config.manager_config());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();

    let info = match &config.transport {
        TransportSection::Resumable(options) => manager.configure_resumable(options.clone()).await?,
        TransportSection::Direct(options) => manager.configure_direct(options.clone()).await?,
    };
    tracing::info!(transport = %info.kind(), endpoint = %config.endpoint, "Transport ready");

    let started = Instant::now();
    let accepted = manager
        .enqueue(config.new_files())
        .await?
        .into_iter()
        .filter(|result| result.is_ok())
        .count();
    if accepted == 0 {
        bail!("No file was accepted");
    }
    if !config.auto_proceed {
        manager.upload().await?;
    }

    loop {
        match events.recv().await {
            Some(UploadEvent::Progress { file_id, progress }) => {
                tracing::debug!(
                    %file_id,
                    uploaded = %format_bytes(progress.bytes_uploaded),
                    total = %format_bytes(progress.bytes_total),
                    "{:.1}%",
                    progress.percentage()
                );
            }
            Some(UploadEvent::Completed { successful, failed, .. }) => {
                tracing::info!(
                    successful = successful.len(),
                    failed = failed.len(),
                    elapsed = %format_duration(started.elapsed()),
                    "Batch finished"
                );
                break;
            }
            Some(_) => {}
            None => bail!("Upload manager stopped unexpectedly"),
        }
    }

    // Per-file results are published right after Completed; the query
    // round trip guarantees they are all buffered.
    let remaining = manager.files().await?;
    while let Ok(event) = events.try_recv() {
        match event {
            UploadEvent::Success { file, .. } => {
                tracing::info!(file = %file.name, size = %format_bytes(file.size), "Uploaded");
            }
            UploadEvent::Error { file, error } => {
                tracing::error!(file = %file.name, %error, "Upload failed");
            }
            _ => {}
        }
    }
    let failed = remaining.iter().filter(|file| file.status == UploadStatus::Failed).count();

    drop(manager);
    handle.shutdown().await?;

    if failed > 0 {
        bail!("{} of {} uploads failed", failed, accepted);
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    match (total / 3600, total % 3600 / 60, total % 60) {
        (0, 0, _) => format!("{:.1}s", elapsed.as_secs_f64()),
        (0, minutes, seconds) => format!("{}m{:02}s", minutes, seconds),
        (hours, minutes, seconds) => format!("{}h{:02}m{:02}s", hours, minutes, seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h01m01s");
    }
}
