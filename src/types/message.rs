//! Message types exchanged between publishers and subscribers

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::NdArray;
use crate::clock::{self, ReferenceClock};
use crate::latency::Timestamps;
use crate::Result;

/// Which timestamp fields a deployment puts in message headers.
///
/// Chosen by configuration on both ends; a subscriber never guesses the schema
/// from the keys a header happens to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSchema {
    /// `time_send` + `time_start_pose_process` (pose tensors)
    #[default]
    Pose,
    /// `timeshot` string (raw or annotated video frames)
    Image,
}

/// Timestamp metadata carried in a message header.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    /// Unix timestamps of sending and of the start of pose inference.
    Pose { time_send: f64, time_start_pose_process: f64 },
    /// Formatted capture time in the reference offset.
    Image { timeshot: String },
}

impl Metadata {
    /// Pose metadata stamped with the current wall clock as send time.
    pub fn pose_now(time_start_pose_process: f64) -> Self {
        Metadata::Pose { time_send: clock::now_unix(), time_start_pose_process }
    }

    /// Image metadata stamped with the current time in the reference offset.
    pub fn image_now(clock: &ReferenceClock) -> Self {
        Metadata::Image { timeshot: clock.format_timeshot(&clock.now()) }
    }

    pub fn schema(&self) -> MetadataSchema {
        match self {
            Metadata::Pose { .. } => MetadataSchema::Pose,
            Metadata::Image { .. } => MetadataSchema::Image,
        }
    }
}

/// One decoded array with its production timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayMessage {
    pub array: NdArray,
    pub metadata: Metadata,
    /// Production time in Unix seconds.
    pub t_produced: f64,
    /// Earlier pipeline stage time, pose messages only.
    pub t_stage: Option<f64>,
}

impl ArrayMessage {
    /// Build a message, deriving the production and stage times from metadata.
    ///
    /// Image timeshots are parsed in `clock`'s reference offset.
    pub fn new(array: NdArray, metadata: Metadata, clock: &ReferenceClock) -> Result<Self> {
        let (t_produced, t_stage) = match &metadata {
            Metadata::Pose { time_send, time_start_pose_process } => {
                (*time_send, Some(*time_start_pose_process))
            }
            Metadata::Image { timeshot } => {
                (clock::unix_seconds(&clock.parse_timeshot(timeshot)?), None)
            }
        };
        Ok(Self { array, metadata, t_produced, t_stage })
    }
}

/// An array as delivered to a consumer, stamped with its receipt time.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedArray {
    pub message: ArrayMessage,
    /// Receipt time in the reference offset.
    pub received_at: DateTime<FixedOffset>,
    /// Receipt time in Unix seconds.
    pub t_received: f64,
}

impl ReceivedArray {
    /// Stamp a decoded message with its receipt time.
    pub fn new(message: ArrayMessage, received_at: DateTime<FixedOffset>) -> Self {
        let t_received = clock::unix_seconds(&received_at);
        Self { message, received_at, t_received }
    }

    pub fn array(&self) -> &NdArray {
        &self.message.array
    }

    /// The three clocks of this frame, ready for latency accounting.
    pub fn timestamps(&self) -> Timestamps {
        Timestamps {
            produced: self.message.t_produced,
            stage: self.message.t_stage,
            received: self.t_received,
        }
    }
}
