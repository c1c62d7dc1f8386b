//! Locating the DCD table referenced by the SCFW binary

use crate::error::{MkImageError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

/// Byte offset of the DCD pointer inside SCFW builds for QXP B0
pub const DCD_ENTRY_ADDR_IN_SCFW: u64 = 0x240;

/// Read the DCD address stored at `offset` inside the SCFW image at `path`
pub fn read_dcd_offset(path: &Path, offset: u64) -> Result<u32> {
    let mut file = File::open(path).map_err(|e| MkImageError::file_access("open", path, e))?;
    let size = file
        .metadata()
        .map_err(|e| MkImageError::file_access("stat", path, e))?
        .len();

    let needed = offset + 4;
    if size < needed {
        return Err(MkImageError::FileTooSmall {
            path: path.to_path_buf(),
            size,
            needed,
        });
    }

    file.seek(SeekFrom::Start(offset))
        .map_err(|e| MkImageError::file_access("read", path, e))?;
    let addr = file
        .read_u32::<LittleEndian>()
        .map_err(|e| MkImageError::file_access("read", path, e))?;

    log::debug!("DCD pointer in {}: 0x{:08x}", path.display(), addr);
    Ok(addr)
}
