//! Per-method, append-only daily CSV sinks (§6 "Outbound (per-minute
//! analytics)"): one file per `{channel}_{method}_{YYYYMMDD}.csv`, headers
//! written only when a file is first created.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use codec::discrimination::{ClockOffset, Discrimination};
use codec::tone::ToneDetection;
use csv::Writer;
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum CsvSinkError {
    #[error("csv I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv write error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Method {
    Discrimination,
    ClockOffset,
    ToneDetection,
}

impl Method {
    fn tag(&self) -> &'static str {
        match self {
            Method::Discrimination => "discrimination",
            Method::ClockOffset => "clock_offset",
            Method::ToneDetection => "tone_detection",
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct ToneDetectionRow<'a> {
    minute_utc: DateTime<Utc>,
    station: &'a str,
    tone_freq_hz: f64,
    rtp_onset: u32,
    sub_sample_refinement: f64,
    snr_db: f64,
    tone_power_db: f64,
    timing_error_ms: f64,
    confidence: f64,
}

#[derive(Debug, serde::Serialize)]
struct DiscriminationRow<'a> {
    minute_utc: DateTime<Utc>,
    dominant: &'a str,
    confidence: &'a str,
    total_weight: f64,
    cross_check_failures: usize,
}

#[derive(Debug, serde::Serialize)]
struct ClockOffsetRow<'a> {
    minute_utc: DateTime<Utc>,
    station: &'a str,
    d_clock_ms: f64,
    uncertainty_ms: f64,
    quality_grade: &'a str,
    mode_hint: &'a str,
    convergence_state: &'a str,
}

/// Opens (or creates with a header row) a `{channel}_{method}_{date}.csv`
/// writer per distinct day, keyed by `(channel_key, method, date)`.
pub struct CsvSink {
    dir: PathBuf,
    writers: Mutex<HashMap<(String, Method, chrono::NaiveDate), Writer<std::fs::File>>>,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), writers: Mutex::new(HashMap::new()) }
    }

    fn path_for(&self, channel_key: &str, method: Method, date: chrono::NaiveDate) -> PathBuf {
        self.dir.join(format!("{channel_key}_{}_{}.csv", method.tag(), date.format("%Y%m%d")))
    }

    fn with_writer<R>(
        &self,
        channel_key: &str,
        method: Method,
        minute_utc: DateTime<Utc>,
        write_row: impl FnOnce(&mut Writer<std::fs::File>) -> Result<R, csv::Error>,
    ) -> Result<R, CsvSinkError> {
        let date = minute_utc.date_naive();
        let mut writers = self.writers.lock();
        let key = (channel_key.to_string(), method, date);

        if !writers.contains_key(&key) {
            let path = self.path_for(channel_key, method, date);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // `csv::Writer` always emits a header on its first `serialize`
            // call; suppress it when reopening a file that already has one
            // (process restart mid-day) so the header isn't duplicated.
            let has_header_already = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let writer = csv::WriterBuilder::new()
                .has_headers(!has_header_already)
                .from_writer(file);
            writers.insert(key.clone(), writer);
        }

        let writer = writers.get_mut(&key).expect("just inserted");
        let result = write_row(writer)?;
        writer.flush()?;
        Ok(result)
    }

    pub fn write_tone_detection(
        &self,
        channel_key: &str,
        minute_utc: DateTime<Utc>,
        detection: &ToneDetection,
    ) -> Result<(), CsvSinkError> {
        self.with_writer(channel_key, Method::ToneDetection, minute_utc, |w| {
            w.serialize(ToneDetectionRow {
                minute_utc,
                station: station_str(detection.station),
                tone_freq_hz: detection.tone_freq_hz,
                rtp_onset: detection.rtp_onset,
                sub_sample_refinement: detection.sub_sample_refinement,
                snr_db: detection.snr_db,
                tone_power_db: detection.tone_power_db,
                timing_error_ms: detection.timing_error_ms,
                confidence: detection.confidence,
            })
        })
    }

    pub fn write_discrimination(
        &self,
        channel_key: &str,
        discrimination: &Discrimination,
    ) -> Result<(), CsvSinkError> {
        let total_weight: f64 = discrimination.votes.iter().map(|v| v.weight).sum();
        self.with_writer(channel_key, Method::Discrimination, discrimination.minute_utc, |w| {
            w.serialize(DiscriminationRow {
                minute_utc: discrimination.minute_utc,
                dominant: dominant_str(discrimination.dominant),
                confidence: confidence_str(discrimination.confidence),
                total_weight,
                cross_check_failures: discrimination.cross_checks.len(),
            })
        })
    }

    pub fn write_clock_offset(
        &self,
        channel_key: &str,
        offset: &ClockOffset,
    ) -> Result<(), CsvSinkError> {
        self.with_writer(channel_key, Method::ClockOffset, offset.minute_utc, |w| {
            w.serialize(ClockOffsetRow {
                minute_utc: offset.minute_utc,
                station: station_str(offset.station),
                d_clock_ms: offset.d_clock_ms,
                uncertainty_ms: offset.uncertainty_ms,
                quality_grade: quality_grade_str(offset.quality_grade),
                mode_hint: &offset.mode_hint,
                convergence_state: convergence_state_str(offset.convergence_state),
            })
        })
    }
}

fn station_str(s: codec::channel::Station) -> &'static str {
    use codec::channel::Station::*;
    match s {
        Wwv => "wwv",
        Wwvh => "wwvh",
        Chu => "chu",
    }
}

fn dominant_str(d: codec::discrimination::Dominant) -> &'static str {
    use codec::discrimination::Dominant::*;
    match d {
        Wwv => "wwv",
        Wwvh => "wwvh",
        Balanced => "balanced",
        Unknown => "unknown",
    }
}

fn confidence_str(c: codec::discrimination::Confidence) -> &'static str {
    use codec::discrimination::Confidence::*;
    match c {
        High => "high",
        Medium => "medium",
        Low => "low",
    }
}

fn quality_grade_str(g: codec::discrimination::QualityGrade) -> &'static str {
    use codec::discrimination::QualityGrade::*;
    match g {
        A => "a",
        B => "b",
        C => "c",
        D => "d",
        X => "x",
    }
}

fn convergence_state_str(s: codec::discrimination::ConvergenceState) -> &'static str {
    use codec::discrimination::ConvergenceState::*;
    match s {
        Acquiring => "acquiring",
        Converging => "converging",
        Locked => "locked",
        Reacquire => "reacquire",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::channel::Station;
    use codec::discrimination::{Confidence, Dominant};

    #[test]
    fn writes_a_tone_detection_row_without_error() {
        let dir = std::env::temp_dir().join("tsig-recorder-test-csv");
        let sink = CsvSink::new(&dir);
        let minute = Utc::now();

        let detection = ToneDetection {
            station: Station::Wwv,
            tone_freq_hz: 1000.0,
            rtp_onset: 0,
            sub_sample_refinement: 0.1,
            snr_db: 20.0,
            tone_power_db: -10.0,
            timing_error_ms: 0.5,
            confidence: 0.9,
        };

        sink.write_tone_detection("wwv_10_mhz", minute, &detection).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn writes_a_discrimination_row_without_error() {
        let dir = std::env::temp_dir().join("tsig-recorder-test-csv-2");
        let sink = CsvSink::new(&dir);

        let discrimination = Discrimination {
            minute_utc: Utc::now(),
            votes: vec![],
            dominant: Dominant::Unknown,
            confidence: Confidence::Low,
            cross_checks: vec![],
        };

        sink.write_discrimination("wwv_10_mhz", &discrimination).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
