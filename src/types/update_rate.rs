//! Update rate control for frame feeds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Shortest throttle interval; finer rates are capped to it.
const MIN_THROTTLE_INTERVAL: Duration = Duration::from_nanos(1);

/// Update rate for frame feeds
///
/// In YAML this is either `native` or a map with a `max` key:
///
/// ```yaml
/// update_rate:
///   max: 30
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RateRepr", into = "RateRepr")]
pub enum UpdateRate {
    /// Every frame the publisher sends
    #[default]
    Native,

    /// Throttled to maximum Hz, keeping the latest frame of each interval
    Max(u32),
}

impl UpdateRate {
    /// Check if throttling is needed
    pub fn needs_throttle(self) -> bool {
        self.throttle_interval().is_some()
    }

    /// Get throttle interval if needed
    ///
    /// `Max(0)` is treated as unthrottled. The interval is never shorter than
    /// one nanosecond.
    pub fn throttle_interval(self) -> Option<Duration> {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => None,
            UpdateRate::Max(hz) => {
                Some(Duration::from_secs_f64(1.0 / f64::from(hz)).max(MIN_THROTTLE_INTERVAL))
            }
        }
    }
}

// Plain data enum so both `native` and `{max: n}` parse in YAML, which would
// otherwise require a `!max` tag for the data-carrying variant.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RateRepr {
    Named(String),
    Capped { max: u32 },
}

#[derive(Debug)]
struct UnknownRate(String);

impl fmt::Display for UnknownRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown update rate '{}', expected 'native' or {{max: <hz>}}", self.0)
    }
}

impl TryFrom<RateRepr> for UpdateRate {
    type Error = UnknownRate;

    fn try_from(repr: RateRepr) -> Result<Self, Self::Error> {
        match repr {
            RateRepr::Named(name) if name.eq_ignore_ascii_case("native") => Ok(UpdateRate::Native),
            RateRepr::Named(name) => Err(UnknownRate(name)),
            RateRepr::Capped { max } => Ok(UpdateRate::Max(max)),
        }
    }
}

impl From<UpdateRate> for RateRepr {
    fn from(rate: UpdateRate) -> Self {
        match rate {
            UpdateRate::Native => RateRepr::Named("native".to_string()),
            UpdateRate::Max(max) => RateRepr::Capped { max },
        }
    }
}
