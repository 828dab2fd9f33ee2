//! Core types for array streaming.
//!
//! - [`DType`] names an element type and its size, using numpy's tags
//! - [`NdArray`] is a tightly packed, row-major array with shared payload bytes
//! - [`Element`] maps Rust primitives onto [`DType`]s for typed access
//! - [`Metadata`] and [`MetadataSchema`] describe header timestamps
//! - [`ArrayMessage`] and [`ReceivedArray`] carry arrays with their clocks
//!
//! ```rust
//! use posewire::types::{DType, NdArray};
//!
//! let pose = NdArray::from_elements(vec![2, 3], &[10.0f32, 20.0, 0.9, 30.0, 40.0, 0.2]).unwrap();
//! assert_eq!(pose.dtype(), DType::Float32);
//! assert_eq!(pose.get::<f32>(&[1, 0]).unwrap(), 30.0);
//! ```

mod array;
mod dtype;
mod message;
mod update_rate;

pub use array::{Element, NdArray, expected_byte_len};
pub use dtype::DType;
pub use message::{ArrayMessage, Metadata, MetadataSchema, ReceivedArray};
pub use update_rate::UpdateRate;
