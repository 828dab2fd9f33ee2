//! Latency accounting across the producer, stage, and receiver clocks
//!
//! Deltas are reported exactly as measured. A negative delta means the two
//! machines' clocks disagree; it is surfaced, never clamped to zero.

use serde::Serialize;

/// The three clocks of one frame, in fractional Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamps {
    /// When the producer generated the array
    pub produced: f64,
    /// When an earlier stage (e.g. pose inference) started, if known
    pub stage: Option<f64>,
    /// When the consumer finished decoding the array
    pub received: f64,
}

/// Pairwise deltas for one frame, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyReport {
    /// `received - produced`
    pub producer_to_receiver: f64,
    /// `received - stage`
    pub stage_to_receiver: Option<f64>,
    /// `produced - stage`
    pub stage_to_producer: Option<f64>,
}

impl LatencyReport {
    /// True when any delta is negative, i.e. the clocks are not synchronized.
    pub fn clock_skew_suspected(&self) -> bool {
        [Some(self.producer_to_receiver), self.stage_to_receiver, self.stage_to_producer]
            .into_iter()
            .flatten()
            .any(|delta| delta < 0.0)
    }
}

/// Running statistics of one delta.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DeltaStats {
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl DeltaStats {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }
}

/// Aggregate latency over every recorded frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LatencySummary {
    pub producer_to_receiver: DeltaStats,
    pub stage_to_receiver: DeltaStats,
    pub stage_to_producer: DeltaStats,
    /// Frames whose report had a negative delta
    pub skewed_frames: u64,
}

/// Computes per-frame latency and keeps aggregate statistics.
#[derive(Debug, Clone, Default)]
pub struct LatencyTracker {
    summary: LatencySummary,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the deltas for one frame without recording them.
    pub fn measure(timestamps: &Timestamps) -> LatencyReport {
        LatencyReport {
            producer_to_receiver: timestamps.received - timestamps.produced,
            stage_to_receiver: timestamps.stage.map(|stage| timestamps.received - stage),
            stage_to_producer: timestamps.stage.map(|stage| timestamps.produced - stage),
        }
    }

    /// Compute the deltas for one frame and fold them into the summary.
    pub fn record(&mut self, timestamps: &Timestamps) -> LatencyReport {
        let report = Self::measure(timestamps);

        self.summary.producer_to_receiver.push(report.producer_to_receiver);
        if let Some(delta) = report.stage_to_receiver {
            self.summary.stage_to_receiver.push(delta);
        }
        if let Some(delta) = report.stage_to_producer {
            self.summary.stage_to_producer.push(delta);
        }
        if report.clock_skew_suspected() {
            self.summary.skewed_frames += 1;
        }

        report
    }

    pub fn summary(&self) -> &LatencySummary {
        &self.summary
    }

    pub fn reset(&mut self) {
        self.summary = LatencySummary::default();
    }
}
