use std::{
    io::Read,
    path::{Path, PathBuf},
};

use derive_more::Deref;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel binary {path:?} not found")]
    KernelBinaryNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read kernel binary {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("kernel binary is empty")]
    EmptyKernel,
}

/// A kernel binary as a stream of 32-bit words.
#[derive(Debug, Clone, PartialEq, Eq, Deref)]
pub struct KernelBinary(Vec<u32>);

impl KernelBinary {
    /// Reads a whole kernel binary from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let path = path.as_ref();
        let mut file =
            std::fs::File::open(path).map_err(|source| KernelError::KernelBinaryNotFound {
                path: path.to_owned(),
                source,
            })?;
        let mut bytes = vec![];
        file.read_to_end(&mut bytes).map_err(|source| KernelError::Read {
            path: path.to_owned(),
            source,
        })?;
        log::debug!("loaded kernel {path:?}: {} bytes", bytes.len());
        Self::from_bytes(&bytes)
    }

    /// Zero-pads `bytes` to a whole number of words.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        if bytes.is_empty() {
            return Err(KernelError::EmptyKernel);
        }
        let mut words = vec![0u32; bytes.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words[..])[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(words))
    }

    /// Wraps an already word-aligned binary.
    pub fn from_words(words: Vec<u32>) -> Result<Self, KernelError> {
        match words.is_empty() {
            true => Err(KernelError::EmptyKernel),
            false => Ok(Self(words)),
        }
    }

    /// The padded binary as bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0[..])
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::{KernelBinary, KernelError};

    #[test]
    fn test_load_pads_to_words() -> Result<(), Box<dyn Error>> {
        let path = std::env::temp_dir().join(format!(
            "vklaunch-kernel-{}-{}.spv",
            std::process::id(),
            fastrand::u64(..)
        ));
        let data: Vec<u8> = (1..=13).collect();
        std::fs::write(&path, &data)?;
        let binary = KernelBinary::load(&path);
        std::fs::remove_file(&path)?;

        let binary = binary?;
        assert_eq!(binary.len(), 4);
        assert_eq!(binary.as_bytes().len(), 16);
        assert_eq!(&binary.as_bytes()[..13], &data[..]);
        assert_eq!(&binary.as_bytes()[13..], &[0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_aligned_is_unchanged() -> Result<(), Box<dyn Error>> {
        let data = [0x03, 0x02, 0x23, 0x07, 1, 2, 3, 4];
        let binary = KernelBinary::from_bytes(&data)?;
        assert_eq!(binary.as_bytes(), &data);
        Ok(())
    }

    #[test]
    fn test_missing_and_empty() {
        let path = std::env::temp_dir().join("vklaunch-kernel-does-not-exist.spv");
        assert!(matches!(
            KernelBinary::load(&path),
            Err(KernelError::KernelBinaryNotFound { .. })
        ));
        assert!(matches!(
            KernelBinary::from_bytes(&[]),
            Err(KernelError::EmptyKernel)
        ));
        assert!(matches!(
            KernelBinary::from_words(vec![]),
            Err(KernelError::EmptyKernel)
        ));
    }
}
