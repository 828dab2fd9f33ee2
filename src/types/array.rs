//! N-dimensional array payloads

use bytes::Bytes;

use super::DType;
use crate::{Result, StreamError};

/// Trait for primitive types that can be stored in an [`NdArray`].
///
/// Values are stored in native byte order; no endianness conversion happens
/// anywhere in the crate.
pub trait Element: Copy + Send + Sync + 'static {
    /// Element type tag for this primitive.
    const DTYPE: DType;

    /// Append the native-endian bytes of `self` to `out`.
    fn write_ne(self, out: &mut Vec<u8>);

    /// Read one value from exactly `DTYPE.size()` native-endian bytes.
    fn read_ne(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = $dtype;

                fn write_ne(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                fn read_ne(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(buf)
                }
            }
        )*
    };
}

impl_element! {
    i8 => DType::Int8,
    u8 => DType::UInt8,
    i16 => DType::Int16,
    u16 => DType::UInt16,
    i32 => DType::Int32,
    u32 => DType::UInt32,
    i64 => DType::Int64,
    u64 => DType::UInt64,
    f32 => DType::Float32,
    f64 => DType::Float64,
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn write_ne(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn read_ne(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Number of payload bytes implied by `shape` for elements of `dtype`.
///
/// Fails with `MalformedMessage` when the product overflows `usize`.
pub fn expected_byte_len(dtype: DType, shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(dtype.size(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| StreamError::malformed(format!("shape {shape:?} overflows for {dtype}")))
}

/// Tightly packed, row-major array with its element type and shape.
///
/// The payload is shared (`Bytes`), so clones and decoded arrays never copy
/// pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl NdArray {
    /// Create an array from raw bytes, validating the length against the shape.
    pub fn new(dtype: DType, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = expected_byte_len(dtype, &shape)?;
        if data.len() != expected {
            return Err(StreamError::malformed(format!(
                "payload is {} bytes but shape {:?} of {} needs {}",
                data.len(),
                shape,
                dtype,
                expected
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    /// Create an array from typed values.
    pub fn from_elements<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self> {
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.size());
        for value in values {
            value.write_ne(&mut data);
        }
        Self::new(T::DTYPE, shape, data)
    }

    /// Create a zero-filled array.
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Result<Self> {
        let len = expected_byte_len(dtype, &shape)?;
        Self::new(dtype, shape, vec![0u8; len])
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Raw payload bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consume the array, returning its payload.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Copy the elements out as a typed vector.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_dtype::<T>()?;
        Ok(self.data.chunks_exact(self.dtype.size()).map(T::read_ne).collect())
    }

    /// Read one element by row-major multi-index.
    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T> {
        self.check_dtype::<T>()?;
        if index.len() != self.shape.len() {
            return Err(StreamError::TypeMismatch {
                details: format!(
                    "index of rank {} used on array of rank {}",
                    index.len(),
                    self.shape.len()
                ),
            });
        }

        let mut flat = 0usize;
        for (&i, &dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return Err(StreamError::TypeMismatch {
                    details: format!("index {index:?} out of bounds for shape {:?}", self.shape),
                });
            }
            flat = flat * dim + i;
        }

        let size = self.dtype.size();
        let start = flat * size;
        Ok(T::read_ne(&self.data[start..start + size]))
    }

    fn check_dtype<T: Element>(&self) -> Result<()> {
        if self.dtype != T::DTYPE {
            return Err(StreamError::TypeMismatch {
                details: format!("expected {}, array holds {}", T::DTYPE, self.dtype),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_values_survive_packing() {
        let values = [1.5f32, -2.25, 3.0, 0.0, 7.75, -0.5];
        let array = NdArray::from_elements(vec![2, 3], &values).unwrap();

        assert_eq!(array.dtype(), DType::Float32);
        assert_eq!(array.byte_len(), 24);
        assert_eq!(array.to_vec::<f32>().unwrap(), values);
        assert_eq!(array.get::<f32>(&[1, 1]).unwrap(), 7.75);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = NdArray::new(DType::UInt8, vec![4, 4], vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, StreamError::MalformedMessage { .. }));
    }

    #[test]
    fn overflowing_shape_is_rejected() {
        let err = expected_byte_len(DType::Float64, &[usize::MAX, 2]).unwrap_err();
        assert!(matches!(err, StreamError::MalformedMessage { .. }));
    }

    #[test]
    fn zero_sized_dimensions_are_valid() {
        let array = NdArray::new(DType::Int32, vec![0, 3], Vec::new()).unwrap();
        assert!(array.is_empty());
        assert_eq!(array.ndim(), 2);
    }

    #[test]
    fn wrong_element_type_is_refused() {
        let array = NdArray::from_elements(vec![3], &[1u8, 2, 3]).unwrap();
        assert!(matches!(array.to_vec::<f32>(), Err(StreamError::TypeMismatch { .. })));
        assert!(matches!(array.get::<u8>(&[3]), Err(StreamError::TypeMismatch { .. })));
    }

    #[test]
    fn bools_pack_as_single_bytes() {
        let array = NdArray::from_elements(vec![3], &[true, false, true]).unwrap();
        assert_eq!(array.data().as_ref(), &[1, 0, 1]);
        assert_eq!(array.to_vec::<bool>().unwrap(), vec![true, false, true]);
    }
}
