//! Stream combinators for frame feeds

pub mod throttle;

pub use throttle::{Throttle, ThrottleExt};
