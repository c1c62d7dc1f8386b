//! TOML description of an image stack
//!
//! ```toml
//! [layout]
//! reserved_region = 0x400
//!
//! [[stack]]
//! op = "container"
//!
//! [[stack]]
//! op = "image"
//! kind = "scfw"
//! file = "scfw_tcm.bin"
//! ```

use crate::container::SW_VERSION_DEFAULT;
use crate::error::{MkImageError, Result};
use crate::image_types::ImageKind;
use crate::stack::{Directive, ImageStack, LayoutOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Optional overrides of [`LayoutOptions`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    pub reserved_region: Option<u32>,
    pub first_image_offset: Option<u32>,
    pub image_padding: Option<u32>,
    pub container_alignment: Option<u32>,
    pub dcd_offset_in_scfw: Option<u64>,
}

impl LayoutConfig {
    pub fn to_options(&self) -> LayoutOptions {
        let d = LayoutOptions::default();
        LayoutOptions {
            reserved_region: self.reserved_region.unwrap_or(d.reserved_region),
            first_image_offset: self.first_image_offset.unwrap_or(d.first_image_offset),
            image_padding: self.image_padding.unwrap_or(d.image_padding),
            container_alignment: self.container_alignment.unwrap_or(d.container_alignment),
            dcd_offset_in_scfw: self.dcd_offset_in_scfw.unwrap_or(d.dcd_offset_in_scfw),
        }
    }
}

/// One `[[stack]]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StackEntry {
    /// `container`, `image`, `append` or `end`
    pub op: String,
    pub kind: Option<String>,
    pub file: Option<PathBuf>,
    pub entry: Option<u64>,
    pub dst: Option<u64>,
    /// Digest width in bits
    pub hash: Option<u32>,
    pub sw_version: Option<u16>,
    pub fuse_version: Option<u8>,
}

/// Top level of an image stack file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageStackConfig {
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub stack: Vec<StackEntry>,
}

impl ImageStackConfig {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| MkImageError::file_access("read", path, e))?;
        Self::parse(&content)
    }

    /// Convert into directives, resolving relative files against `base_dir`
    pub fn to_stack(&self, base_dir: &Path) -> Result<ImageStack> {
        self.stack
            .iter()
            .enumerate()
            .map(|(index, entry)| entry.to_directive(index, base_dir))
            .collect()
    }
}

impl StackEntry {
    fn file(&self, index: usize, base_dir: &Path) -> Result<PathBuf> {
        let file = self.file.as_ref().ok_or_else(|| MkImageError::InvalidStackEntry {
            index,
            reason: format!("'{}' needs a file", self.op),
        })?;
        Ok(if file.is_absolute() {
            file.clone()
        } else {
            base_dir.join(file)
        })
    }

    pub fn to_directive(&self, index: usize, base_dir: &Path) -> Result<Directive> {
        match self.op.as_str() {
            "container" => Ok(Directive::NewContainer {
                sw_version: self.sw_version.unwrap_or(SW_VERSION_DEFAULT),
                fuse_version: self.fuse_version.unwrap_or(0),
            }),
            "image" => {
                let kind: ImageKind = self
                    .kind
                    .as_deref()
                    .ok_or_else(|| MkImageError::InvalidStackEntry {
                        index,
                        reason: "'image' needs a kind".into(),
                    })?
                    .parse()?;
                let entry = self.entry.unwrap_or(0);
                let mut directive = Directive::image(kind, self.file(index, base_dir)?, entry);
                if let Directive::Image { dst, hash_bits, .. } = &mut directive {
                    *dst = self.dst;
                    if let Some(h) = self.hash {
                        *hash_bits = h;
                    }
                }
                Ok(directive)
            }
            "append" => Ok(Directive::Append {
                path: self.file(index, base_dir)?,
            }),
            "end" => Ok(Directive::End),
            other => Err(MkImageError::unrecognized_directive(other)),
        }
    }
}
