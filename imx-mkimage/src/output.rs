//! Writing the final boot image
//!
//! The file is assembled in a temporary file beside the destination and only
//! renamed into place once everything has been written.

use crate::error::{MkImageError, Result};
use crate::flatten::FlatHeader;
use crate::stack::BuildPlan;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

fn check_layout(plan: &BuildPlan, flat: &FlatHeader) -> Result<()> {
    let reserved = plan.options.reserved_region as u64;
    for path in &plan.appended {
        let size = std::fs::metadata(path)
            .map_err(|e| MkImageError::file_access("stat", path, e))?
            .len();
        if size > reserved {
            return Err(MkImageError::layout_conflict(format!(
                "appended container {} ({} bytes) overruns the reserved region of {} bytes",
                path.display(),
                size,
                reserved
            )));
        }
    }

    let header_end = flat.base_offset as u64 + flat.len() as u64;
    if let Some(first) = plan.payloads.iter().map(|p| p.offset as u64).min() {
        if header_end > first {
            return Err(MkImageError::layout_conflict(format!(
                "container headers end at 0x{:x}, past the first image at 0x{:x}",
                header_end, first
            )));
        }
    }
    Ok(())
}

fn copy_at(out: &mut File, src: &Path, offset: u64) -> Result<u64> {
    let mut input = File::open(src).map_err(|e| MkImageError::file_access("open", src, e))?;
    out.seek(SeekFrom::Start(offset))?;
    io::copy(&mut input, out).map_err(|e| MkImageError::file_access("copy", src, e))
}

/// Assemble the boot image described by `plan` into `out`
///
/// Returns the size of the written file.
pub fn write_boot_image(plan: &BuildPlan, flat: &FlatHeader, out: &Path) -> Result<u64> {
    check_layout(plan, flat)?;

    let dir = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp =
        NamedTempFile::new_in(dir).map_err(|e| MkImageError::file_access("create", out, e))?;

    {
        let file = tmp.as_file_mut();

        for path in &plan.appended {
            log::info!("append container {}", path.display());
            copy_at(file, path, 0)?;
        }

        file.seek(SeekFrom::Start(flat.base_offset as u64))?;
        file.write_all(flat.as_bytes())
            .map_err(|e| MkImageError::file_access("write", out, e))?;
        log::debug!(
            "wrote {} header bytes at 0x{:x}",
            flat.len(),
            flat.base_offset
        );

        for payload in &plan.payloads {
            let copied = copy_at(file, &payload.path, payload.offset as u64)?;
            log::debug!(
                "{} {} -> 0x{:x} ({} bytes)",
                payload.kind,
                payload.path.display(),
                payload.offset,
                copied
            );
        }

        file.flush()
            .map_err(|e| MkImageError::file_access("write", out, e))?;
        file.sync_all()
            .map_err(|e| MkImageError::file_access("sync", out, e))?;
    }

    let size = tmp
        .as_file()
        .metadata()
        .map_err(|e| MkImageError::file_access("stat", out, e))?
        .len();
    tmp.persist(out)
        .map_err(|e| MkImageError::file_access("persist", out, e.error))?;
    Ok(size)
}
