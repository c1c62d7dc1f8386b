//! Serializing containers into the header region of the boot image

use crate::container::ContainerHeader;
use crate::error::{MkImageError, Result};
use crate::writer::HeaderWriter;

/// Where one container landed in the flattened region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerLayout {
    /// Offset from the start of the flattened region
    pub start: usize,
    pub sig_blk_offset: usize,
    /// Unaligned length, signature block included
    pub length: usize,
    pub aligned_length: usize,
}

/// The flattened container headers, ready to be written at `base_offset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatHeader {
    pub bytes: Vec<u8>,
    pub layouts: Vec<ContainerLayout>,
    pub base_offset: u32,
}

impl FlatHeader {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Image offsets are stored relative to their container's position in the file
fn rebase_offset(offset: u32, container_start: usize, base_offset: u32) -> Result<u32> {
    let origin = container_start as u64 + base_offset as u64;
    (offset as u64)
        .checked_sub(origin)
        .map(|v| v as u32)
        .ok_or(MkImageError::OffsetUnderflow {
            offset,
            container_start: origin,
        })
}

/// Flatten `containers` into one aligned byte region
///
/// The containers are left untouched; the rebased image offsets only exist
/// in the returned bytes.
pub fn flatten_container_header(
    containers: &[ContainerHeader],
    base_offset: u32,
) -> Result<FlatHeader> {
    let mut layouts = Vec::with_capacity(containers.len());
    let mut total = 0usize;

    for (i, container) in containers.iter().enumerate() {
        let layout = ContainerLayout {
            start: total,
            sig_blk_offset: container.sig_blk_offset(),
            length: container.length(),
            aligned_length: container.aligned_length(),
        };

        // the signing tool needs both offsets to locate what it signs
        log::info!(
            "CST: CONTAINER {} offset: 0x{:x}",
            i,
            base_offset as usize + layout.start
        );
        log::info!(
            "CST: CONTAINER {}: Signature Block: offset is at 0x{:x}",
            i,
            base_offset as usize + layout.start + layout.sig_blk_offset
        );

        total += layout.aligned_length;
        layouts.push(layout);
    }

    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(total)
        .map_err(|_| MkImageError::Allocation { size: total })?;
    bytes.resize(total, 0);

    {
        let mut w = HeaderWriter::new(&mut bytes);
        for (container, layout) in containers.iter().zip(&layouts) {
            let start = w.position();
            container.encode_header(&mut w)?;

            for img in &container.images {
                let offset = rebase_offset(img.offset, start, base_offset)?;
                log::debug!("image offset 0x{:x} -> 0x{:x}", img.offset, offset);
                img.encode_with_offset(&mut w, offset)?;
            }

            w.put_bytes(&container.sig_block)?;
            w.pad_to(start + layout.aligned_length)?;
        }
    }

    Ok(FlatHeader {
        bytes,
        layouts,
        base_offset,
    })
}
