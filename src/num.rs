use bytemuck::{Pod, Zeroable};
use derive_more::Display;
use half::f16;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Element type of a storage buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataType {
    F16,
    F32,
    F64,
    U32,
    I32,
}

impl DataType {
    /// Returns the byte size of one element of this type.
    pub const fn size(self) -> usize {
        match self {
            DataType::F16 => 2,
            DataType::F32 => 4,
            DataType::F64 => 8,
            DataType::U32 => 4,
            DataType::I32 => 4,
        }
    }

    /// Byte size of `count` elements, or [`None`] on overflow.
    #[inline]
    pub const fn bytes(self, count: usize) -> Option<usize> {
        count.checked_mul(self.size())
    }
}

/// A plain-old-data element that can live in a storage buffer.
pub trait Scalar: Sized + Zeroable + Pod + Send + Sync {
    const DATA_TYPE: DataType;
}

macro_rules! impl_scalar {
    ($ty:ty, $data_type:expr) => {
        impl Scalar for $ty {
            const DATA_TYPE: DataType = $data_type;
        }
    };
}

impl_scalar!(f16, DataType::F16);
impl_scalar!(f32, DataType::F32);
impl_scalar!(f64, DataType::F64);
impl_scalar!(u32, DataType::U32);
impl_scalar!(i32, DataType::I32);

#[cfg(test)]
mod tests {
    use half::f16;

    use super::{DataType, Scalar};

    #[test]
    fn test_sizes_match_rust_types() {
        fn check<T: Scalar>() {
            assert_eq!(T::DATA_TYPE.size(), size_of::<T>(), "{}", T::DATA_TYPE);
        }
        check::<f16>();
        check::<f32>();
        check::<f64>();
        check::<u32>();
        check::<i32>();
        assert_eq!(DataType::F64.to_string(), "F64");
    }

    #[test]
    fn test_bytes_overflow() {
        assert_eq!(DataType::F16.bytes(5), Some(10));
        assert_eq!(DataType::U32.bytes(0), Some(0));
        assert_eq!(DataType::F64.bytes(usize::MAX / 8 + 1), None);
        assert_eq!(DataType::F64.bytes(usize::MAX / 8), Some(usize::MAX / 8 * 8));
    }
}
