//! Per-channel pipeline orchestration (§5): a dedicated ingest thread runs
//! packet reception -> resequence -> segment -> archive write, handing
//! finalized segments to a separate analytics thread over a bounded queue.

pub mod resequencer;
pub mod segmenter;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use codec::channel::{GeoPoint, Station};
use codec::discrimination::Discrimination;
use codec::segment::Segment;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use analytics::clock_offset::ClockOffsetEstimator;
use analytics::discriminator::{self, DiscriminatorInputs};
use analytics::timesnap_manager::TimeSnapManager;
use analytics::tone_detector::{self, ToneDetectorConfig};

use crate::archive::ArchiveWriter;
use crate::config::ChannelConfig;
use crate::csv_writer::CsvSink;
use crate::shutdown::ShutdownHandle;
use crate::source::PacketSource;
use crate::state::{self, ChannelState, FusionState};
use crate::statistics::Counts;

use self::resequencer::{Resequencer, ResequencerConfig, ResequencerEvent};
use self::segmenter::Segmenter;

/// TimeSnap state shared between the ingest thread (which applies pending
/// anchors at segment boundaries) and the analytics thread (which queues
/// tone-detection candidates) behind one per-channel mutex (§5 "Shared
/// mutable state").
pub struct SharedTimeSnap(Mutex<TimeSnapManager>);

impl SharedTimeSnap {
    pub fn new(manager: TimeSnapManager) -> Self {
        Self(Mutex::new(manager))
    }
}

/// Bounded channel capacity between ingest and analytics; chosen generously
/// since backpressure deliberately stalls ingest rather than drop segments
/// (§9 "backpressure is applied by letting the ingest thread block on a
/// bounded send").
pub const SEGMENT_QUEUE_DEPTH: usize = 4;

pub struct ChannelRuntime {
    pub channel_key: String,
    pub config: ChannelConfig,
    pub receiver_location: GeoPoint,
    pub archive: Arc<dyn ArchiveWriter>,
    pub csv: Arc<CsvSink>,
    pub stats: Arc<Counts>,
    pub state_dir: PathBuf,
}

impl ChannelRuntime {
    /// Loads the persisted TimeSnap if present and valid, falling back to a
    /// fresh wall-clock anchor on any corruption (§7 "state corruption ...
    /// reset that state, restart acquisition"). Called once at startup to
    /// seed the [`SharedTimeSnap`] both threads then share.
    pub fn load_timesnap(&self) -> TimeSnapManager {
        let channel_path = state::channel_state_path(&self.state_dir, &self.channel_key);
        match ChannelState::load(&channel_path) {
            Ok(state) => TimeSnapManager::from_persisted(state.time_snap, self.config.meta.sample_rate),
            Err(_) => TimeSnapManager::new(self.config.meta.sample_rate, Utc::now(), 0),
        }
    }

    /// Loads the persisted Kalman/fusion state, analogous to
    /// [`Self::load_timesnap`] but for the analytics thread's
    /// [`ClockOffsetEstimator`], which it owns exclusively (§9 "Kalman
    /// state is strictly owned by the analytics thread").
    fn load_clock_offset(&self) -> ClockOffsetEstimator {
        let channel_path = state::channel_state_path(&self.state_dir, &self.channel_key);
        let fusion_path = state::fusion_state_path(&self.state_dir);

        let kalman = ChannelState::load(&channel_path).map(|s| s.kalman).unwrap_or_default();
        let calibration = FusionState::load(&fusion_path).map(|s| s.calibration).unwrap_or_default();

        ClockOffsetEstimator::restore(self.receiver_location, kalman, calibration)
    }

    fn save_state(&self, timesnap: &TimeSnapManager, clock_offset: &ClockOffsetEstimator) {
        let channel_path = state::channel_state_path(&self.state_dir, &self.channel_key);
        let mut state = ChannelState::new(timesnap.current().clone());
        state.kalman = clock_offset.kalman_states().clone();
        if let Err(e) = state.save(&channel_path) {
            log::warn!("failed to persist channel state for {}: {e}", self.channel_key);
        }

        let fusion_path = state::fusion_state_path(&self.state_dir);
        let fusion = FusionState { schema_version: state::STATE_SCHEMA_VERSION, calibration: clock_offset.calibrations().clone() };
        if let Err(e) = fusion.save(&fusion_path) {
            log::warn!("failed to persist fusion state: {e}");
        }
    }

    /// Runs the ingest half: receive, resequence, segment, archive-write,
    /// and hand the finalized segment to the analytics thread. Blocks until
    /// `shutdown` is triggered, finalizing only complete in-flight segments
    /// (§5 "no segment is published partial").
    pub fn run_ingest(
        &self,
        mut source: impl PacketSource,
        shared_timesnap: Arc<SharedTimeSnap>,
        segment_tx: Sender<Segment>,
        shutdown: ShutdownHandle,
    ) {
        let mut resequencer = Resequencer::new(ResequencerConfig::from_channel(&self.config.meta));
        let mut segmenter = Segmenter::new(self.config.meta.clone());
        let max_gap = std::time::Duration::from_secs(self.config.meta.max_gap_seconds as u64);
        let mut last_packet_at = std::time::Instant::now();
        let mut watchdog_tripped = false;

        while !shutdown.is_triggered() {
            let packet = match source.recv() {
                Ok(packet) => packet,
                Err(crate::source::SourceError::Timeout) => {
                    // Wakes the loop to recheck shutdown and to notice a
                    // genuinely stalled source; the resequencer itself only
                    // checks its wait budget when a packet arrives (§5), so
                    // this is the only place a silent source gets surfaced
                    // before it eventually resumes.
                    if !watchdog_tripped && last_packet_at.elapsed() >= max_gap {
                        log::warn!(
                            "[{}] no packets for {:?}, exceeding max_gap_seconds={}",
                            self.channel_key,
                            last_packet_at.elapsed(),
                            self.config.meta.max_gap_seconds
                        );
                        self.stats.packets_dropped.add(1);
                        watchdog_tripped = true;
                    }
                    continue;
                }
                Err(e) => {
                    log::warn!("[{}] packet source error: {e}", self.channel_key);
                    self.stats.packets_dropped.add(1);
                    continue;
                }
            };
            self.stats.packets_received.add(1);
            last_packet_at = std::time::Instant::now();
            watchdog_tripped = false;

            for event in resequencer.push(packet) {
                self.absorb_event(event, &mut segmenter, &shared_timesnap, &segment_tx);
            }
        }

        log::info!("[{}] ingest thread shutting down", self.channel_key);
    }

    fn absorb_event(
        &self,
        event: ResequencerEvent,
        segmenter: &mut Segmenter,
        shared_timesnap: &Arc<SharedTimeSnap>,
        segment_tx: &Sender<Segment>,
    ) {
        if let ResequencerEvent::Gap { samples_lost, .. } = &event {
            self.stats.samples_gap_filled.add(*samples_lost);
        }

        for mut segment in segmenter.push(event) {
            let first_sample_utc = {
                let mut timesnap = shared_timesnap.0.lock();
                let boundary_estimate = timesnap.current().utc_at(segment.first_sample_rtp, self.config.meta.sample_rate);
                timesnap.apply_pending_at_boundary(boundary_estimate);
                timesnap.current().utc_at(segment.first_sample_rtp, self.config.meta.sample_rate)
            };
            segment.first_sample_utc = Some(first_sample_utc);

            if let Err(e) = self.archive.write(&self.channel_key, &segment) {
                log::error!("[{}] archive write failed: {e}", self.channel_key);
                continue;
            }
            self.stats.segments_published.add(1);

            // Bounded send deliberately backpressures ingest when analytics
            // falls behind (§9).
            if segment_tx.send(segment).is_err() {
                log::warn!("[{}] analytics thread gone, dropping segment", self.channel_key);
            }
        }
    }

    /// Runs the analytics half: tone detection, discrimination, and
    /// clock-offset estimation over each finalized segment, writing CSV
    /// rows as it goes. Exits when the channel closes (ingest thread gone).
    pub fn run_analytics(&self, segment_rx: Receiver<Segment>, shared_timesnap: Arc<SharedTimeSnap>) {
        let tone_cfg = ToneDetectorConfig::default();
        let mut clock_offset = self.load_clock_offset();

        while let Ok(segment) = segment_rx.recv() {
            let minute_utc = match segment.first_sample_utc {
                Some(utc) => utc,
                None => continue,
            };

            let detections = tone_detector::detect_tones(
                &segment.samples,
                segment.channel.sample_rate,
                segment.first_sample_rtp,
                &segment.channel.expected_stations,
                &tone_cfg,
            );

            for detection in &detections {
                self.stats.tone_detections.add(1);
                if let Err(e) = self.csv.write_tone_detection(&self.channel_key, minute_utc, detection) {
                    log::warn!("[{}] failed to write tone detection row: {e}", self.channel_key);
                    self.stats.analytics_skipped.add(1);
                }

                shared_timesnap.0.lock().consider_detection(detection, minute_utc);

                let onset_utc = shared_timesnap.0.lock().current().utc_at(detection.rtp_onset, segment.channel.sample_rate);
                let t_arrival_ms = (onset_utc - minute_utc).num_microseconds().unwrap_or(0) as f64 / 1000.0;
                let measurement = clock_offset.measurement_from_tone(detection, minute_utc, t_arrival_ms);
                let offset = clock_offset.update(&measurement);
                self.stats.clock_offset_rows.add(1);
                if let Err(e) = self.csv.write_clock_offset(&self.channel_key, &offset) {
                    log::warn!("[{}] failed to write clock offset row: {e}", self.channel_key);
                    self.stats.analytics_skipped.add(1);
                }
            }

            if let Some(discrimination) = self.discriminate(&segment, &detections, minute_utc) {
                self.stats.discrimination_rows.add(1);
                if let Err(e) = self.csv.write_discrimination(&self.channel_key, &discrimination) {
                    log::warn!("[{}] failed to write discrimination row: {e}", self.channel_key);
                    self.stats.analytics_skipped.add(1);
                }
            }

            let timesnap = shared_timesnap.0.lock();
            self.save_state(&timesnap, &clock_offset);
        }

        log::info!("[{}] analytics thread shutting down", self.channel_key);
    }

    fn discriminate(
        &self,
        segment: &Segment,
        detections: &[codec::tone::ToneDetection],
        minute_utc: chrono::DateTime<Utc>,
    ) -> Option<Discrimination> {
        if !segment.channel.expected_stations.contains(&Station::Wwv)
            && !segment.channel.expected_stations.contains(&Station::Wwvh)
        {
            return None;
        }

        let wwv_tone = detections.iter().find(|d| d.station == Station::Wwv);
        let wwvh_tone = detections.iter().find(|d| d.station == Station::Wwvh);

        let inputs = DiscriminatorInputs {
            segment_samples: &segment.samples,
            sample_rate: segment.channel.sample_rate,
            minute_utc,
            receiver_location: self.receiver_location,
            wwv_tone,
            wwvh_tone,
        };

        Some(discriminator::discriminate(&inputs))
    }
}
