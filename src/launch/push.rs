use derive_more::{Deref, Display, From};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One scalar kernel parameter.
#[derive(Debug, Display, Clone, Copy, PartialEq, From)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PushConstant {
    #[display("{_0}u32")]
    U32(u32),
    #[display("{_0}f32")]
    F32(f32),
    #[display("{_0}f64")]
    F64(f64),
}

impl PushConstant {
    /// Width in bytes of the packed value.
    pub const fn size(&self) -> usize {
        match self {
            PushConstant::U32(_) => 4,
            PushConstant::F32(_) => 4,
            PushConstant::F64(_) => 8,
        }
    }

    fn extend_bytes(&self, bytes: &mut Vec<u8>) {
        match self {
            PushConstant::U32(x) => bytes.extend_from_slice(&x.to_ne_bytes()),
            PushConstant::F32(x) => bytes.extend_from_slice(&x.to_ne_bytes()),
            PushConstant::F64(x) => bytes.extend_from_slice(&x.to_ne_bytes()),
        }
    }
}

/// The contiguous byte range uploaded as push constants.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deref)]
pub struct PushConstantBytes(Vec<u8>);

impl PushConstantBytes {
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// Packs values in order with no padding between them.
pub fn pack(values: &[PushConstant]) -> PushConstantBytes {
    let size = values.iter().map(PushConstant::size).sum();
    let mut bytes = Vec::with_capacity(size);
    values.iter().for_each(|value| value.extend_bytes(&mut bytes));
    PushConstantBytes(bytes)
}

/// Anything that lists kernel parameters in push-constant order.
///
/// Derive it for plain structs with `#[derive(PushConstants)]`.
pub trait PushConstants {
    fn push_constants(&self) -> Vec<PushConstant>;

    #[inline]
    fn pack(&self) -> PushConstantBytes {
        pack(&self.push_constants())
    }
}

impl PushConstants for () {
    #[inline]
    fn push_constants(&self) -> Vec<PushConstant> {
        vec![]
    }
}

impl PushConstants for PushConstant {
    #[inline]
    fn push_constants(&self) -> Vec<PushConstant> {
        vec![*self]
    }
}

impl PushConstants for [PushConstant] {
    #[inline]
    fn push_constants(&self) -> Vec<PushConstant> {
        self.to_vec()
    }
}

impl<const N: usize> PushConstants for [PushConstant; N] {
    #[inline]
    fn push_constants(&self) -> Vec<PushConstant> {
        self.to_vec()
    }
}

impl PushConstants for Vec<PushConstant> {
    #[inline]
    fn push_constants(&self) -> Vec<PushConstant> {
        self.clone()
    }
}

impl<T: PushConstants + ?Sized> PushConstants for &T {
    #[inline]
    fn push_constants(&self) -> Vec<PushConstant> {
        T::push_constants(self)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::{PushConstant, PushConstants, pack};

    #[test]
    fn test_pack_mixed() -> Result<(), Box<dyn Error>> {
        let values = [
            PushConstant::U32(5),
            PushConstant::F32(1.5),
            PushConstant::F64(2.25),
        ];
        let bytes = pack(&values);
        assert_eq!(bytes.len(), 16);

        assert_eq!(u32::from_ne_bytes(bytes[0..4].try_into()?), 5);
        assert_eq!(f32::from_ne_bytes(bytes[4..8].try_into()?), 1.5);
        assert_eq!(f64::from_ne_bytes(bytes[8..16].try_into()?), 2.25);

        // deterministic
        assert_eq!(bytes, values.pack());
        Ok(())
    }

    #[test]
    fn test_pack_empty() {
        assert!(pack(&[]).is_empty());
        assert!(().pack().is_empty());
    }

    #[test]
    fn test_from_scalars() {
        let values: Vec<PushConstant> = vec![3u32.into(), 0.5f32.into(), 1.0f64.into()];
        assert_eq!(values.push_constants().len(), 3);
        assert_eq!(values.pack().len(), 16);
        assert_eq!(values[1].to_string(), "0.5f32");
    }
}
