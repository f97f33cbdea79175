//! Raw archive writer (§6 "Outbound (archive writer)"): `Segment` is opaque
//! to the archive writer, which only needs to durably store and later
//! retrieve it by channel and first-sample RTP timestamp.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use codec::segment::Segment;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable storage for finalized minute segments. `Segment` is opaque past
/// this trait's boundary (§6); a writer need not understand I/Q samples to
/// store them.
pub trait ArchiveWriter: Send + Sync {
    fn write(&self, channel_key: &str, segment: &Segment) -> Result<(), ArchiveError>;
}

/// Reference implementation: one file per segment under
/// `<archive_dir>/<channel_key>/<first_sample_rtp>.json`. Real deployments
/// may prefer a columnar or sharded format; this one is chosen for the
/// round-trip being trivial to audit by hand.
pub struct FileArchiveWriter {
    root: PathBuf,
}

impl FileArchiveWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn segment_path(&self, channel_key: &str, first_sample_rtp: u32) -> PathBuf {
        self.root.join(channel_key).join(format!("{first_sample_rtp}.json"))
    }

    /// Reads a previously archived segment back, primarily for round-trip
    /// tests and offline inspection tooling.
    pub fn read(&self, channel_key: &str, first_sample_rtp: u32) -> Result<Segment, ArchiveError> {
        let path = self.segment_path(channel_key, first_sample_rtp);
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }
}

impl ArchiveWriter for FileArchiveWriter {
    fn write(&self, channel_key: &str, segment: &Segment) -> Result<(), ArchiveError> {
        segment.assert_valid();

        let path = self.segment_path(channel_key, segment.first_sample_rtp);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        serde_json::to_writer(BufWriter::new(File::create(&path)?), segment)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::channel::{ChannelMeta, ChannelName};
    use codec::rtp::Complex;

    fn channel() -> ChannelMeta {
        ChannelMeta {
            name: ChannelName::new("WWV 10 MHz"),
            center_frequency_hz: 10_000_000.0,
            sample_rate: 8_000,
            expected_stations: vec![],
            blocktime_ms: 20,
            max_gap_seconds: 60,
        }
    }

    fn segment() -> Segment {
        let channel = channel();
        let count = channel.ticks_per_minute() as usize;
        Segment {
            channel,
            first_sample_rtp: 12345,
            first_sample_utc: None,
            samples: vec![Complex { re: 0.0, im: 0.0 }; count],
            gaps: vec![],
        }
    }

    #[test]
    fn round_trips_a_segment_through_disk() {
        let dir = std::env::temp_dir().join("tsig-recorder-test-archive");
        let writer = FileArchiveWriter::new(&dir);
        let segment = segment();

        writer.write("wwv_10_mhz", &segment).unwrap();
        let loaded = writer.read("wwv_10_mhz", segment.first_sample_rtp).unwrap();

        assert_eq!(loaded.samples.len(), segment.samples.len());
        assert_eq!(loaded.first_sample_rtp, segment.first_sample_rtp);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    #[should_panic(expected = "segment length invariant")]
    fn refuses_to_write_a_malformed_segment() {
        let dir = std::env::temp_dir().join("tsig-recorder-test-archive-bad");
        let writer = FileArchiveWriter::new(&dir);
        let mut segment = segment();
        segment.samples.pop();

        let _ = writer.write("wwv_10_mhz", &segment);
        fs::remove_dir_all(&dir).ok();
    }
}
