//! Boot container header structures and their byte layout
//!
//! A container is a 16 byte header, followed by up to six 128 byte image
//! array entries and an opaque signature block. All fields are little endian
//! and written one by one; nothing here depends on host struct layout.

use crate::error::{MkImageError, Result};
use crate::image_types::{
    BOOT_IMG_FLAGS_CORE_MASK, BOOT_IMG_FLAGS_CORE_SHIFT, Core, HashAlgorithm,
    IMG_FLAG_BOOTFLAGS_MASK, IMG_FLAG_BOOTFLAGS_SHIFT, IMG_FLAG_ENCRYPTED_MASK, IMG_TYPE_MASK,
    IMG_TYPE_SHIFT, ImageTypeFlag,
};
use crate::writer::HeaderWriter;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Size of the fixed container header; the image array starts right after it
pub const CONTAINER_HEADER_SIZE: usize = 0x10;

/// Size of one image array entry
pub const IMG_ARRAY_ENTRY_SIZE: usize = 128;

pub const MAX_NUM_IMGS: usize = 6;
pub const MAX_NUM_OF_CONTAINER: usize = 2;

pub const HASH_MAX_LEN: usize = 64;
pub const IV_MAX_LEN: usize = 32;

/// Tag identifying the B0 container format
pub const CONTAINER_TAG: u8 = 0x87;
pub const CONTAINER_VERSION: u8 = 0x00;

/// Default alignment of a serialized container
pub const CONTAINER_ALIGNMENT: u32 = 0x400;
pub const CONTAINER_FLAGS_DEFAULT: u32 = 0x12;
pub const SW_VERSION_DEFAULT: u16 = 0xCAFE;

/// Round `value` up to a multiple of `quantum`; a zero quantum means no alignment
pub fn align_up(value: u64, quantum: u64) -> u64 {
    if quantum == 0 {
        value
    } else {
        value.div_ceil(quantum) * quantum
    }
}

/// One entry of a container's image array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImage {
    /// Absolute file offset while building; container relative once flattened
    pub offset: u32,
    pub size: u32,
    /// Load address
    pub dst: u64,
    /// Entry point
    pub entry: u64,
    pub flags: u32,
    pub meta: u32,
    pub hash: [u8; HASH_MAX_LEN],
    pub iv: [u8; IV_MAX_LEN],
}

impl Default for BootImage {
    fn default() -> Self {
        Self {
            offset: 0,
            size: 0,
            dst: 0,
            entry: 0,
            flags: 0,
            meta: 0,
            hash: [0; HASH_MAX_LEN],
            iv: [0; IV_MAX_LEN],
        }
    }
}

impl BootImage {
    pub fn image_type(&self) -> Option<ImageTypeFlag> {
        ImageTypeFlag::try_from((self.flags >> IMG_TYPE_SHIFT) & IMG_TYPE_MASK).ok()
    }

    pub fn core(&self) -> Option<Core> {
        Core::try_from((self.flags >> BOOT_IMG_FLAGS_CORE_SHIFT) & BOOT_IMG_FLAGS_CORE_MASK).ok()
    }

    pub fn hash_algorithm(&self) -> Result<HashAlgorithm> {
        HashAlgorithm::from_flags(self.flags)
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & IMG_FLAG_ENCRYPTED_MASK != 0
    }

    pub fn boot_flags(&self) -> u16 {
        ((self.flags & IMG_FLAG_BOOTFLAGS_MASK) >> IMG_FLAG_BOOTFLAGS_SHIFT) as u16
    }

    /// The meaningful prefix of the digest buffer
    pub fn digest(&self) -> &[u8] {
        match self.hash_algorithm() {
            Ok(alg) => &self.hash[..alg.digest_len()],
            Err(_) => &self.hash,
        }
    }

    /// Write this entry with `offset` in place of the stored offset
    pub fn encode_with_offset(&self, w: &mut HeaderWriter<'_>, offset: u32) -> Result<()> {
        w.put_u32(offset)?;
        w.put_u32(self.size)?;
        w.put_u64(self.dst)?;
        w.put_u64(self.entry)?;
        w.put_u32(self.flags)?;
        w.put_u32(self.meta)?;
        w.put_bytes(&self.hash)?;
        w.put_bytes(&self.iv)?;
        Ok(())
    }

    pub fn encode(&self, w: &mut HeaderWriter<'_>) -> Result<()> {
        self.encode_with_offset(w, self.offset)
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut image = Self {
            offset: reader.read_u32::<LittleEndian>()?,
            size: reader.read_u32::<LittleEndian>()?,
            dst: reader.read_u64::<LittleEndian>()?,
            entry: reader.read_u64::<LittleEndian>()?,
            flags: reader.read_u32::<LittleEndian>()?,
            meta: reader.read_u32::<LittleEndian>()?,
            ..Default::default()
        };
        reader.read_exact(&mut image.hash)?;
        reader.read_exact(&mut image.iv)?;
        Ok(image)
    }
}

/// In-memory container: header fields, image array and signature block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u8,
    pub tag: u8,
    pub flags: u32,
    pub sw_version: u16,
    pub fuse_version: u8,
    pub reserved: u16,
    pub images: Vec<BootImage>,
    /// Signature block produced by the signing tool, appended verbatim
    pub sig_block: Vec<u8>,
    /// Alignment quantum of the serialized container
    pub padding: u32,
}

impl Default for ContainerHeader {
    fn default() -> Self {
        Self {
            version: CONTAINER_VERSION,
            tag: CONTAINER_TAG,
            flags: 0,
            sw_version: 0,
            fuse_version: 0,
            reserved: 0,
            images: Vec::new(),
            sig_block: Vec::new(),
            padding: CONTAINER_ALIGNMENT,
        }
    }
}

impl ContainerHeader {
    pub fn new(sw_version: u16, padding: u32, fuse_version: u8) -> Self {
        Self {
            sw_version,
            padding,
            fuse_version,
            ..Default::default()
        }
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    /// Offset of the signature block from the container start
    pub fn sig_blk_offset(&self) -> usize {
        CONTAINER_HEADER_SIZE + self.num_images() * IMG_ARRAY_ENTRY_SIZE
    }

    /// Unaligned container length as stored in the length field
    pub fn length(&self) -> usize {
        self.sig_blk_offset() + self.sig_block.len()
    }

    /// Length of the serialized container including padding
    pub fn aligned_length(&self) -> usize {
        align_up(self.length() as u64, self.padding as u64) as usize
    }

    /// Write the fixed 16 byte header
    pub fn encode_header(&self, w: &mut HeaderWriter<'_>) -> Result<()> {
        let num_images = u8::try_from(self.num_images()).map_err(|_| MkImageError::FieldOverflow {
            field: "num_images",
            value: self.num_images() as u64,
        })?;
        w.put_u8(self.version)?;
        w.put_u16(to_u16("length", self.length())?)?;
        w.put_u8(self.tag)?;
        w.put_u32(self.flags)?;
        w.put_u16(self.sw_version)?;
        w.put_u8(self.fuse_version)?;
        w.put_u8(num_images)?;
        w.put_u16(to_u16("sig_blk_offset", self.sig_blk_offset())?)?;
        w.put_u16(self.reserved)?;
        Ok(())
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "Container: tag 0x{:02x} version {} flags 0x{:08x}\n\
             SW version: 0x{:04x} Fuse version: {}\n\
             Images: {} Length: {} bytes Signature block: {} bytes at 0x{:x}",
            self.tag,
            self.version,
            self.flags,
            self.sw_version,
            self.fuse_version,
            self.num_images(),
            self.length(),
            self.sig_block.len(),
            self.sig_blk_offset(),
        );
        for (i, img) in self.images.iter().enumerate() {
            out.push_str(&format!(
                "\n  [{}] type: {} core: {} offset: 0x{:08x} size: {} dst: 0x{:x} entry: 0x{:x} meta: 0x{:08x} hash: {}",
                i,
                img.image_type()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "unknown".into()),
                img.core()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".into()),
                img.offset,
                img.size,
                img.dst,
                img.entry,
                img.meta,
                img.hash_algorithm()
                    .map(|h| h.to_string())
                    .unwrap_or_else(|_| "invalid".into()),
            ));
        }
        out
    }
}

fn to_u16(field: &'static str, value: usize) -> Result<u16> {
    u16::try_from(value).map_err(|_| MkImageError::FieldOverflow {
        field,
        value: value as u64,
    })
}

/// A container re-read from a flattened header region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContainer {
    /// Position of the container within the parsed region
    pub start: usize,
    /// Length field as stored
    pub length: u16,
    /// Signature block offset as stored
    pub sig_blk_offset: u16,
    pub header: ContainerHeader,
}

impl ParsedContainer {
    /// Parse one container starting at the beginning of `data`
    pub fn from_bytes(data: &[u8], start: usize, padding: u32) -> Result<Self> {
        if data.len() < CONTAINER_HEADER_SIZE {
            return Err(MkImageError::invalid_container_data(format!(
                "Header data too short: {} bytes (expected at least {})",
                data.len(),
                CONTAINER_HEADER_SIZE
            )));
        }

        let mut cursor = Cursor::new(data);
        let version = cursor.read_u8()?;
        let length = cursor.read_u16::<LittleEndian>()?;
        let tag = cursor.read_u8()?;
        let flags = cursor.read_u32::<LittleEndian>()?;
        let sw_version = cursor.read_u16::<LittleEndian>()?;
        let fuse_version = cursor.read_u8()?;
        let num_images = cursor.read_u8()? as usize;
        let sig_blk_offset = cursor.read_u16::<LittleEndian>()?;
        let reserved = cursor.read_u16::<LittleEndian>()?;

        if tag != CONTAINER_TAG {
            return Err(MkImageError::invalid_container_data(format!(
                "Invalid tag 0x{:02x} (expected 0x{:02x})",
                tag, CONTAINER_TAG
            )));
        }
        if num_images > MAX_NUM_IMGS {
            return Err(MkImageError::invalid_container_data(format!(
                "Container claims {} images (max {})",
                num_images, MAX_NUM_IMGS
            )));
        }
        let array_end = CONTAINER_HEADER_SIZE + num_images * IMG_ARRAY_ENTRY_SIZE;
        if (sig_blk_offset as usize) < array_end || length < sig_blk_offset {
            return Err(MkImageError::invalid_container_data(format!(
                "Inconsistent lengths: length {} sig_blk_offset {} image array end {}",
                length, sig_blk_offset, array_end
            )));
        }
        if data.len() < length as usize {
            return Err(MkImageError::invalid_container_data(format!(
                "Container truncated: {} bytes available, length field says {}",
                data.len(),
                length
            )));
        }

        let images = (0..num_images)
            .map(|_| BootImage::decode(&mut cursor))
            .collect::<Result<Vec<_>>>()?;
        let sig_block = data[sig_blk_offset as usize..length as usize].to_vec();

        Ok(Self {
            start,
            length,
            sig_blk_offset,
            header: ContainerHeader {
                version,
                tag,
                flags,
                sw_version,
                fuse_version,
                reserved,
                images,
                sig_block,
                padding,
            },
        })
    }
}

/// Parse every container of a flattened header region
///
/// Containers follow each other at `alignment` boundaries; parsing stops at
/// the first position that does not carry the container tag.
pub fn parse_containers(data: &[u8], alignment: u32) -> Result<Vec<ParsedContainer>> {
    let mut containers = Vec::new();
    let mut pos = 0usize;

    while containers.len() < MAX_NUM_OF_CONTAINER && pos + CONTAINER_HEADER_SIZE <= data.len() {
        if data[pos + 3] != CONTAINER_TAG {
            break;
        }
        let parsed = ParsedContainer::from_bytes(&data[pos..], pos, alignment)?;
        let advance = align_up(parsed.length as u64, alignment as u64) as usize;
        containers.push(parsed);
        if advance == 0 {
            break;
        }
        pos += advance;
    }

    if containers.is_empty() {
        return Err(MkImageError::invalid_container_data(
            "No container header found",
        ));
    }
    Ok(containers)
}
