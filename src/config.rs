//! Stream configuration
//!
//! Both ends of a deployment read the same YAML document; every key is optional.
//!
//! ```yaml
//! host: 192.168.1.20
//! port: 1936
//! schema: image
//! recv_timeout_ms: 2000
//! thread_mode: both
//! update_rate:
//!   max: 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::clock::{DEFAULT_UTC_OFFSET_HOURS, ReferenceClock};
use crate::codec::ArrayCodec;
use crate::pipeline::ThreadMode;
use crate::transport::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT, Endpoint};
use crate::types::{MetadataSchema, UpdateRate};
use crate::{Result, StreamError};

/// Configuration shared by publishers, subscribers and pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Host subscribers connect to.
    pub host: String,
    pub port: u16,
    pub schema: MetadataSchema,
    /// Receive timeout; `None` waits forever.
    pub recv_timeout_ms: Option<u64>,
    /// Reference timezone for timeshots and receipt stamps.
    pub utc_offset_hours: i32,
    /// Messages queued per subscriber before the oldest are dropped.
    pub send_high_water_mark: usize,
    pub max_frame_bytes: usize,
    pub thread_mode: ThreadMode,
    pub update_rate: UpdateRate,
    /// Idle sleep of the display loop when no new frame is available.
    pub display_poll_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            schema: MetadataSchema::default(),
            recv_timeout_ms: None,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            send_high_water_mark: 16,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            thread_mode: ThreadMode::default(),
            update_rate: UpdateRate::default(),
            display_poll_ms: 1,
        }
    }
}

impl StreamConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| StreamError::io(format!("reading config {}", path.display()), e))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(StreamError::config("host must not be empty"));
        }
        if self.send_high_water_mark == 0 {
            return Err(StreamError::config("send_high_water_mark must be at least 1"));
        }
        if self.max_frame_bytes == 0 || self.max_frame_bytes > u32::MAX as usize {
            return Err(StreamError::config(format!(
                "max_frame_bytes must be between 1 and {}",
                u32::MAX
            )));
        }
        if self.recv_timeout_ms == Some(0) {
            return Err(StreamError::config("recv_timeout_ms must be positive when set"));
        }
        ReferenceClock::from_utc_offset_hours(self.utc_offset_hours)?;
        Ok(())
    }

    /// Endpoint a publisher binds (`tcp://*:<port>`).
    pub fn publisher_endpoint(&self) -> Endpoint {
        Endpoint::wildcard(self.port)
    }

    /// Endpoint a subscriber connects to (`tcp://<host>:<port>`).
    pub fn subscriber_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn clock(&self) -> Result<ReferenceClock> {
        ReferenceClock::from_utc_offset_hours(self.utc_offset_hours)
    }

    pub fn codec(&self) -> Result<ArrayCodec> {
        Ok(ArrayCodec::new(self.schema, self.clock()?))
    }

    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout_ms.map(Duration::from_millis)
    }

    pub fn display_poll(&self) -> Duration {
        Duration::from_millis(self.display_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = StreamConfig::from_yaml_str("{}").unwrap();

        assert_eq!(config, StreamConfig::default());
        assert_eq!(config.subscriber_endpoint().to_string(), "tcp://localhost:1936");
        assert_eq!(config.publisher_endpoint().bind_address(), "0.0.0.0:1936");
        assert_eq!(config.recv_timeout(), None);
        assert_eq!(config.thread_mode, ThreadMode::Both);
    }

    #[test]
    fn overrides_are_applied() {
        let yaml = r#"
host: 10.0.0.5
port: 7000
schema: image
recv_timeout_ms: 250
thread_mode: get
update_rate:
  max: 30
"#;
        let config = StreamConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.subscriber_endpoint().connect_address().unwrap(), "10.0.0.5:7000");
        assert_eq!(config.schema, MetadataSchema::Image);
        assert_eq!(config.recv_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.thread_mode, ThreadMode::Get);
        assert_eq!(config.update_rate, UpdateRate::Max(30));
        assert_eq!(config.codec().unwrap().schema(), MetadataSchema::Image);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for yaml in [
            "send_high_water_mark: 0",
            "recv_timeout_ms: 0",
            "utc_offset_hours: 40",
            "host: ''",
            "unknown_key: 1",
            "port: not-a-port",
        ] {
            let err = StreamConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, StreamError::Config { .. }), "{yaml}: {err}");
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = StreamConfig::from_file("/nonexistent/posewire.yaml").unwrap_err();
        assert!(matches!(err, StreamError::Io { .. }));
    }
}
