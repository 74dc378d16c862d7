//! Per-call integrity accumulators.
//!
//! A call owns one accumulator for its whole lifetime. Every fragment carries
//! the running digest over all argument bytes written so far, so `sum` never
//! resets the state.

use std::fmt;

use crate::error::{FragmentError, Result};

/// Checksum algorithm codes as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ChecksumType {
    /// No checksum; zero-length digest.
    None = 0,
    /// CRC-32 (IEEE).
    #[default]
    Crc32 = 1,
    /// 32-bit Farmhash fingerprint. Recognised on the wire only.
    Farmhash = 2,
    /// CRC-32C (Castagnoli).
    Crc32C = 3,
}

impl ChecksumType {
    /// The wire code for this checksum type.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a checksum type by wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Crc32),
            2 => Some(Self::Farmhash),
            3 => Some(Self::Crc32C),
            _ => None,
        }
    }

    /// Digest size in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Crc32 | Self::Farmhash | Self::Crc32C => 4,
        }
    }

    /// Create a fresh accumulator of this type.
    pub fn new_checksum(self) -> Result<Box<dyn Checksum>> {
        match self {
            Self::None => Ok(Box::new(NoChecksum)),
            Self::Crc32 => Ok(Box::new(Crc32Checksum::default())),
            Self::Crc32C => Ok(Box::new(Crc32CChecksum::default())),
            Self::Farmhash => Err(FragmentError::UnsupportedChecksum(self.code()).into()),
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Crc32 => "crc32",
            Self::Farmhash => "farmhash",
            Self::Crc32C => "crc32c",
        };
        f.write_str(name)
    }
}

/// Stateful digest over the argument bytes of one call.
pub trait Checksum: Send {
    /// Algorithm of this accumulator.
    fn type_code(&self) -> ChecksumType;

    /// Digest size in bytes.
    fn size(&self) -> usize {
        self.type_code().size()
    }

    /// Feed bytes into the accumulator.
    fn add(&mut self, bytes: &[u8]);

    /// Current digest, `size()` bytes long. Does not reset the state.
    fn sum(&self) -> Vec<u8>;
}

/// Accumulator for [`ChecksumType::None`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChecksum;

impl Checksum for NoChecksum {
    fn type_code(&self) -> ChecksumType {
        ChecksumType::None
    }

    fn add(&mut self, _bytes: &[u8]) {}

    fn sum(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Accumulator for [`ChecksumType::Crc32`].
#[derive(Default, Clone)]
pub struct Crc32Checksum {
    hasher: crc32fast::Hasher,
}

impl Checksum for Crc32Checksum {
    fn type_code(&self) -> ChecksumType {
        ChecksumType::Crc32
    }

    fn add(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    fn sum(&self) -> Vec<u8> {
        self.hasher.clone().finalize().to_be_bytes().to_vec()
    }
}

/// Accumulator for [`ChecksumType::Crc32C`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc32CChecksum {
    state: u32,
}

impl Checksum for Crc32CChecksum {
    fn type_code(&self) -> ChecksumType {
        ChecksumType::Crc32C
    }

    fn add(&mut self, bytes: &[u8]) {
        self.state = crc32c::crc32c_append(self.state, bytes);
    }

    fn sum(&self) -> Vec<u8> {
        self.state.to_be_bytes().to_vec()
    }
}
