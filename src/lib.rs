pub mod archive;
pub mod config;
pub mod csv_writer;
pub mod pipeline;
pub mod shutdown;
pub mod source;
pub mod state;
pub mod statistics;

use std::sync::Arc;

use anyhow::Result;

use archive::FileArchiveWriter;
use config::Config;
use csv_writer::CsvSink;
use pipeline::{ChannelRuntime, SharedTimeSnap, SEGMENT_QUEUE_DEPTH};
use shutdown::ShutdownHandle;
use source::{MulticastRtpSource, NtpCache};
use statistics::Statistics;

/// Starts every configured channel's pipeline and blocks until `shutdown`
/// fires (§6 "CLI surface": `run --config <path>`). One ingest thread and
/// one analytics thread are spawned per channel (§5).
pub async fn run(config: Config, shutdown: ShutdownHandle) -> Result<()> {
    let archive: Arc<dyn archive::ArchiveWriter> = Arc::new(FileArchiveWriter::new(config.storage.archive_dir.clone()));
    let csv = Arc::new(CsvSink::new(config.storage.csv_dir.clone()));
    let stats = Statistics::default();
    let ntp = NtpCache::new();

    tokio::spawn(ntp.clone().run(std::time::Duration::from_secs(config.ntp.refresh_seconds), shutdown.clone()));

    let mut ingest_handles = Vec::new();
    let mut analytics_handles = Vec::new();

    for channel_config in &config.channels {
        let channel_key = channel_config.meta.name.key();
        let runtime = Arc::new(ChannelRuntime {
            channel_key: channel_key.clone(),
            config: channel_config.clone(),
            receiver_location: config.receiver_location,
            archive: archive.clone(),
            csv: csv.clone(),
            stats: stats.channel(&channel_key),
            state_dir: config.storage.state_dir.clone(),
        });

        let source = MulticastRtpSource::bind(channel_config.source.multicast_addr, channel_config.source.interface)?;
        let shared_timesnap = Arc::new(SharedTimeSnap::new(runtime.load_timesnap()));
        let (segment_tx, segment_rx) = crossbeam_channel::bounded(SEGMENT_QUEUE_DEPTH);

        let ingest_runtime = runtime.clone();
        let ingest_timesnap = shared_timesnap.clone();
        let ingest_shutdown = shutdown.clone();
        ingest_handles.push(std::thread::spawn(move || {
            ingest_runtime.run_ingest(source, ingest_timesnap, segment_tx, ingest_shutdown);
        }));

        let analytics_runtime = runtime.clone();
        let analytics_timesnap = shared_timesnap.clone();
        analytics_handles.push(std::thread::spawn(move || {
            analytics_runtime.run_analytics(segment_rx, analytics_timesnap);
        }));

        log::info!("channel '{channel_key}' pipeline started");
    }

    shutdown.clone().wait_for_ctrl_c().await;

    for handle in ingest_handles {
        let _ = handle.join();
    }
    for handle in analytics_handles {
        let _ = handle.join();
    }

    Ok(())
}
