//! Array codec: JSON header frame plus raw payload frame
//!
//! # Message Layout
//!
//! Every array travels as two parts of one multipart message:
//!
//! ```text
//! part 1: {"dtype": "float32", "shape": [17, 3],
//!          "time_send": 1700000000.25, "time_start_pose_process": 1700000000.2}
//! part 2: 204 raw bytes (17 * 3 * 4), row-major, native byte order
//! ```
//!
//! Image deployments replace the two time keys with
//! `"timeshot": "2024-03-01 12:00:00.250"`.
//!
//! The header is the only way to know the payload's size and shape, so it is
//! always read first. Payloads are not compressed or padded, and no byte-order
//! negotiation takes place: both ends must share native endianness.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::clock::ReferenceClock;
use crate::types::{ArrayMessage, DType, Metadata, MetadataSchema, NdArray};
use crate::{Result, StreamError};

/// JSON header of one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireHeader {
    pub dtype: String,
    pub shape: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_send: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start_pose_process: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeshot: Option<String>,
}

impl WireHeader {
    fn metadata(self, schema: MetadataSchema) -> Result<(DType, Vec<usize>, Metadata)> {
        let dtype = self.dtype.parse::<DType>()?;
        let metadata = match schema {
            MetadataSchema::Pose => {
                let time_send = self.time_send.ok_or_else(|| missing_key("time_send"))?;
                let time_start_pose_process = self
                    .time_start_pose_process
                    .ok_or_else(|| missing_key("time_start_pose_process"))?;
                Metadata::Pose { time_send, time_start_pose_process }
            }
            MetadataSchema::Image => {
                let timeshot = self.timeshot.ok_or_else(|| missing_key("timeshot"))?;
                Metadata::Image { timeshot }
            }
        };
        Ok((dtype, self.shape, metadata))
    }
}

fn missing_key(key: &str) -> StreamError {
    StreamError::malformed(format!("header is missing required key '{key}'"))
}

/// Header and payload parts ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub header: Bytes,
    pub payload: Bytes,
}

/// Encodes arrays into header/payload pairs and back.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayCodec {
    schema: MetadataSchema,
    clock: ReferenceClock,
}

impl ArrayCodec {
    /// Create a codec for one metadata schema.
    ///
    /// `clock` interprets `timeshot` strings when decoding image messages.
    pub fn new(schema: MetadataSchema, clock: ReferenceClock) -> Self {
        Self { schema, clock }
    }

    pub fn schema(&self) -> MetadataSchema {
        self.schema
    }

    pub fn clock(&self) -> &ReferenceClock {
        &self.clock
    }

    /// Encode an array and its metadata.
    ///
    /// The payload shares the array's bytes; nothing is copied.
    pub fn encode(&self, array: &NdArray, metadata: &Metadata) -> Result<EncodedMessage> {
        if metadata.schema() != self.schema {
            return Err(StreamError::malformed(format!(
                "metadata schema {:?} does not match configured schema {:?}",
                metadata.schema(),
                self.schema
            )));
        }

        let header = match metadata {
            Metadata::Pose { time_send, time_start_pose_process } => {
                if !time_send.is_finite() || !time_start_pose_process.is_finite() {
                    return Err(StreamError::malformed("pose timestamps must be finite"));
                }
                WireHeader {
                    dtype: array.dtype().tag().to_string(),
                    shape: array.shape().to_vec(),
                    time_send: Some(*time_send),
                    time_start_pose_process: Some(*time_start_pose_process),
                    timeshot: None,
                }
            }
            Metadata::Image { timeshot } => WireHeader {
                dtype: array.dtype().tag().to_string(),
                shape: array.shape().to_vec(),
                time_send: None,
                time_start_pose_process: None,
                timeshot: Some(timeshot.clone()),
            },
        };

        Ok(EncodedMessage {
            header: Bytes::from(serde_json::to_vec(&header)?),
            payload: array.data().clone(),
        })
    }

    /// Decode a header/payload pair.
    ///
    /// Fails with `MalformedMessage` when the header is not valid JSON, lacks the
    /// configured schema's keys, names an unknown dtype, or when the payload
    /// length differs from the length implied by shape and dtype.
    pub fn decode(&self, header: &[u8], payload: Bytes) -> Result<ArrayMessage> {
        let header: WireHeader = serde_json::from_slice(header)?;
        let (dtype, shape, metadata) = header.metadata(self.schema)?;
        let array = NdArray::new(dtype, shape, payload)?;
        ArrayMessage::new(array, metadata, &self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pose_codec() -> ArrayCodec {
        ArrayCodec::new(MetadataSchema::Pose, ReferenceClock::default())
    }

    #[test]
    fn header_uses_numpy_keys() {
        let array = NdArray::from_elements(vec![2, 3], &[0.0f32; 6]).unwrap();
        let metadata = Metadata::Pose { time_send: 10.5, time_start_pose_process: 10.0 };

        let encoded = pose_codec().encode(&array, &metadata).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&encoded.header).unwrap();

        assert_eq!(json["dtype"], "float32");
        assert_eq!(json["shape"], serde_json::json!([2, 3]));
        assert_eq!(json["time_send"], 10.5);
        assert_eq!(json["time_start_pose_process"], 10.0);
        assert!(json.get("timeshot").is_none());
        assert_eq!(encoded.payload.len(), 24);
    }

    #[test]
    fn short_payload_is_malformed() {
        let header = br#"{"dtype":"uint8","shape":[4,4],"time_send":1.0,"time_start_pose_process":0.5}"#;
        let err = pose_codec().decode(header, Bytes::from(vec![0u8; 10])).unwrap_err();

        assert!(matches!(err, StreamError::MalformedMessage { .. }));
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn unknown_dtype_is_malformed() {
        let header = br#"{"dtype":"complex64","shape":[1],"time_send":1.0,"time_start_pose_process":0.5}"#;
        let err = pose_codec().decode(header, Bytes::from(vec![0u8; 8])).unwrap_err();
        assert!(matches!(err, StreamError::MalformedMessage { .. }));
    }

    #[test]
    fn schema_mismatch_is_malformed_not_guessed() {
        let image_header = br#"{"dtype":"uint8","shape":[1],"timeshot":"2024-03-01 12:00:00.250"}"#;
        let err = pose_codec().decode(image_header, Bytes::from(vec![7u8])).unwrap_err();

        assert!(err.to_string().contains("time_send"));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = pose_codec().decode(b"not json", Bytes::new()).unwrap_err();
        assert!(matches!(err, StreamError::MalformedMessage { .. }));
    }

    #[test]
    fn negative_dimension_is_malformed() {
        let header = br#"{"dtype":"uint8","shape":[-1],"time_send":1.0,"time_start_pose_process":0.5}"#;
        let err = pose_codec().decode(header, Bytes::new()).unwrap_err();
        assert!(matches!(err, StreamError::MalformedMessage { .. }));
    }

    #[test]
    fn image_messages_round_trip_their_timeshot() {
        let clock = ReferenceClock::default();
        let codec = ArrayCodec::new(MetadataSchema::Image, clock);
        let frame = NdArray::from_elements(vec![2, 2, 3], &[9u8; 12]).unwrap();
        let metadata = Metadata::Image { timeshot: "2024-03-01 12:00:00.250".to_string() };

        let encoded = codec.encode(&frame, &metadata).unwrap();
        let decoded = codec.decode(&encoded.header, encoded.payload).unwrap();

        assert_eq!(decoded.array, frame);
        assert_eq!(decoded.metadata, metadata);
        assert_eq!(decoded.t_stage, None);
    }

    #[test]
    fn encoding_foreign_schema_is_refused() {
        let frame = NdArray::from_elements(vec![1], &[1u8]).unwrap();
        let metadata = Metadata::Image { timeshot: "2024-03-01 12:00:00.250".to_string() };
        assert!(pose_codec().encode(&frame, &metadata).is_err());
    }

    #[test]
    fn non_finite_timestamps_are_refused() {
        let frame = NdArray::from_elements(vec![1], &[1u8]).unwrap();
        let metadata = Metadata::Pose { time_send: f64::NAN, time_start_pose_process: 0.0 };
        assert!(pose_codec().encode(&frame, &metadata).is_err());
    }

    fn array_strategy() -> impl Strategy<Value = NdArray> {
        (proptest::sample::select(DType::ALL.to_vec()), prop::collection::vec(0usize..5, 0..4))
            .prop_flat_map(|(dtype, shape)| {
                let len = shape.iter().product::<usize>() * dtype.size();
                prop::collection::vec(any::<u8>(), len).prop_map(move |bytes| {
                    NdArray::new(dtype, shape.clone(), bytes).expect("length matches shape")
                })
            })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode_bit_for_bit(
            array in array_strategy(),
            time_send in -1.0e12f64..1.0e12,
            time_start_pose_process in -1.0e12f64..1.0e12,
        ) {
            let codec = pose_codec();
            let metadata = Metadata::Pose { time_send, time_start_pose_process };

            let encoded = codec.encode(&array, &metadata).unwrap();
            let decoded = codec.decode(&encoded.header, encoded.payload).unwrap();

            prop_assert_eq!(&decoded.array, &array);
            prop_assert_eq!(decoded.t_produced.to_bits(), time_send.to_bits());
            prop_assert_eq!(decoded.t_stage.map(f64::to_bits), Some(time_start_pose_process.to_bits()));
        }
    }
}
