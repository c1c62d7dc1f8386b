//! Image kind definitions and flag word constants

use crate::error::{MkImageError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Image type field of the flags word (bits 0..=3)
pub const IMG_TYPE_MASK: u32 = 0x0F;
pub const IMG_TYPE_SHIFT: u32 = 0;

/// Core id field of the flags word (bits 4..=7)
pub const BOOT_IMG_FLAGS_CORE_MASK: u32 = 0xF;
pub const BOOT_IMG_FLAGS_CORE_SHIFT: u32 = 4;

/// Hash selector field of the flags word (bits 8..=9)
pub const IMG_FLAG_HASH_MASK: u32 = 0x300;
pub const IMG_FLAG_HASH_SHA256: u32 = 0x000;
pub const IMG_FLAG_HASH_SHA384: u32 = 0x100;
pub const IMG_FLAG_HASH_SHA512: u32 = 0x200;

pub const IMG_FLAG_ENCRYPTED_MASK: u32 = 0x400;
pub const IMG_FLAG_ENCRYPTED_SHIFT: u32 = 0x0A;

pub const IMG_FLAG_BOOTFLAGS_MASK: u32 = 0xFFFF_0000;
pub const IMG_FLAG_BOOTFLAGS_SHIFT: u32 = 0x10;

/// Image kinds accepted in an image stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    /// Device configuration data (DDR init tables)
    Dcd,
    /// Application processor payload (ATF, U-Boot, ...)
    Ap,
    /// Cortex-M4 payload
    M4,
    /// System controller firmware
    Scfw,
    /// Secure enclave firmware
    Seco,
    /// Extra configuration data
    Scd,
}

/// Value of the image type field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImageTypeFlag {
    Csf = 0x01,
    Scd = 0x02,
    Exec = 0x03,
    Data = 0x04,
    DcdDdr = 0x05,
    Seco = 0x06,
}

/// Core the boot ROM hands an image to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Core {
    Sc = 1,
    Cm4_0 = 2,
    Cm4_1 = 3,
    Ca35 = 4,
    Seco = 6,
}

/// Digest algorithms the boot ROM can verify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum HashAlgorithm {
    Sha256,
    #[default]
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Digest width in bits
    pub fn bits(self) -> u32 {
        match self {
            Self::Sha256 => 256,
            Self::Sha384 => 384,
            Self::Sha512 => 512,
        }
    }

    /// Number of meaningful digest bytes
    pub fn digest_len(self) -> usize {
        self.bits() as usize / 8
    }

    /// Selector bits stored in the image flags word
    pub fn flag(self) -> u32 {
        match self {
            Self::Sha256 => IMG_FLAG_HASH_SHA256,
            Self::Sha384 => IMG_FLAG_HASH_SHA384,
            Self::Sha512 => IMG_FLAG_HASH_SHA512,
        }
    }

    /// Recover the algorithm from an image flags word
    pub fn from_flags(flags: u32) -> Result<Self> {
        match flags & IMG_FLAG_HASH_MASK {
            IMG_FLAG_HASH_SHA256 => Ok(Self::Sha256),
            IMG_FLAG_HASH_SHA384 => Ok(Self::Sha384),
            IMG_FLAG_HASH_SHA512 => Ok(Self::Sha512),
            other => Err(MkImageError::invalid_container_data(format!(
                "Invalid hash selector 0x{:x}",
                other
            ))),
        }
    }
}

impl TryFrom<u32> for HashAlgorithm {
    type Error = MkImageError;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            256 => Ok(Self::Sha256),
            384 => Ok(Self::Sha384),
            512 => Ok(Self::Sha512),
            _ => Err(MkImageError::UnsupportedHashAlgorithm { bits }),
        }
    }
}

impl ImageKind {
    /// Type flag and core affinity the boot ROM expects for this kind
    ///
    /// Returns `None` for kinds this ROM revision cannot boot.
    pub fn type_and_core(self) -> Option<(ImageTypeFlag, Core)> {
        match self {
            Self::Seco => Some((ImageTypeFlag::Seco, Core::Sc)),
            Self::Dcd => Some((ImageTypeFlag::DcdDdr, Core::Sc)),
            Self::Ap => Some((ImageTypeFlag::Exec, Core::Ca35)),
            Self::M4 => Some((ImageTypeFlag::Exec, Core::Cm4_0)),
            Self::Scfw => Some((ImageTypeFlag::Exec, Core::Sc)),
            Self::Scd => None,
        }
    }
}

/// Compose the type and core fields of an image flags word
pub fn image_flags(type_: ImageTypeFlag, core: Core) -> u32 {
    ((type_ as u32 & IMG_TYPE_MASK) << IMG_TYPE_SHIFT)
        | ((core as u32 & BOOT_IMG_FLAGS_CORE_MASK) << BOOT_IMG_FLAGS_CORE_SHIFT)
}

impl FromStr for ImageKind {
    type Err = MkImageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dcd" => Ok(Self::Dcd),
            "ap" => Ok(Self::Ap),
            "m4" => Ok(Self::M4),
            "scfw" => Ok(Self::Scfw),
            "seco" => Ok(Self::Seco),
            "scd" => Ok(Self::Scd),
            _ => Err(MkImageError::unsupported_image_kind(s)),
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dcd => "DCD",
            Self::Ap => "AP",
            Self::M4 => "M4",
            Self::Scfw => "SCFW",
            Self::Seco => "SECO",
            Self::Scd => "SCD",
        };
        write!(f, "{}", name)
    }
}

impl TryFrom<u32> for ImageTypeFlag {
    type Error = ();

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Csf),
            0x02 => Ok(Self::Scd),
            0x03 => Ok(Self::Exec),
            0x04 => Ok(Self::Data),
            0x05 => Ok(Self::DcdDdr),
            0x06 => Ok(Self::Seco),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ImageTypeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Csf => "csf",
            Self::Scd => "scd",
            Self::Exec => "executable",
            Self::Data => "data",
            Self::DcdDdr => "dcd_ddr",
            Self::Seco => "seco",
        };
        write!(f, "{}", name)
    }
}

impl TryFrom<u32> for Core {
    type Error = ();

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Sc),
            2 => Ok(Self::Cm4_0),
            3 => Ok(Self::Cm4_1),
            4 => Ok(Self::Ca35),
            6 => Ok(Self::Seco),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sc => "sc",
            Self::Cm4_0 => "cm4_0",
            Self::Cm4_1 => "cm4_1",
            Self::Ca35 => "ca35",
            Self::Seco => "seco",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha{}", self.bits())
    }
}
