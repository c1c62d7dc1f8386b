//! Image stack interpretation
//!
//! The image stack is the ordered list of directives describing what goes
//! into the boot image. Interpreting it assigns every payload its absolute
//! file offset and registers it with the [`ContainerBuilder`].

use crate::builder::{
    ContainerBuilder, IMAGE_HASH_ALGO_DEFAULT, IMAGE_PADDING_DEFAULT, ImageRequest,
};
use crate::container::{CONTAINER_ALIGNMENT, SW_VERSION_DEFAULT, align_up};
use crate::dcd::DCD_ENTRY_ADDR_IN_SCFW;
use crate::error::{MkImageError, Result};
use crate::flatten::FlatHeader;
use crate::image_types::ImageKind;
use std::path::PathBuf;

/// Size of the leading file region reserved for an appended container
pub const RESERVED_REGION_DEFAULT: u32 = 0x400;

/// Absolute file offset of the first image payload
pub const FIRST_IMAGE_OFFSET: u32 = 0x6000;

/// One step of the image stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Start a new container
    NewContainer { sw_version: u16, fuse_version: u8 },
    /// Add an image to the active container
    Image {
        kind: ImageKind,
        path: PathBuf,
        /// Requested load address; the boot ROM rules decide the one stored
        dst: Option<u64>,
        entry: u64,
        hash_bits: u32,
    },
    /// Copy a prebuilt container into the reserved leading region
    Append { path: PathBuf },
    /// End of stack; later directives are ignored
    End,
}

impl Directive {
    pub fn new_container() -> Self {
        Self::NewContainer {
            sw_version: SW_VERSION_DEFAULT,
            fuse_version: 0,
        }
    }

    pub fn image(kind: ImageKind, path: impl Into<PathBuf>, entry: u64) -> Self {
        Self::Image {
            kind,
            path: path.into(),
            dst: None,
            entry,
            hash_bits: IMAGE_HASH_ALGO_DEFAULT.bits(),
        }
    }
}

/// Ordered sequence of directives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageStack(Vec<Directive>);

impl ImageStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, directive: Directive) -> &mut Self {
        self.0.push(directive);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Directive> {
        self.0.iter().take_while(|d| **d != Directive::End)
    }

    /// True when no directive precedes the end of stack
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl FromIterator<Directive> for ImageStack {
    fn from_iter<I: IntoIterator<Item = Directive>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// File layout parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    /// Leading region kept for an appended container; the headers start here
    pub reserved_region: u32,
    pub first_image_offset: u32,
    pub image_padding: u32,
    pub container_alignment: u32,
    pub dcd_offset_in_scfw: u64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            reserved_region: RESERVED_REGION_DEFAULT,
            first_image_offset: FIRST_IMAGE_OFFSET,
            image_padding: IMAGE_PADDING_DEFAULT,
            container_alignment: CONTAINER_ALIGNMENT,
            dcd_offset_in_scfw: DCD_ENTRY_ADDR_IN_SCFW,
        }
    }
}

/// A payload to copy into the output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub kind: ImageKind,
    pub path: PathBuf,
    /// Absolute file offset
    pub offset: u32,
    pub size: u32,
}

/// Result of interpreting an image stack
pub struct BuildPlan {
    pub builder: ContainerBuilder,
    pub payloads: Vec<Payload>,
    pub appended: Vec<PathBuf>,
    pub options: LayoutOptions,
}

impl BuildPlan {
    /// Flatten the container headers for the reserved region offset
    pub fn flatten(&self) -> Result<FlatHeader> {
        self.builder.flatten(self.options.reserved_region)
    }
}

/// Drives a [`ContainerBuilder`] through an image stack
#[derive(Debug, Clone, Default)]
pub struct StackInterpreter {
    options: LayoutOptions,
}

impl StackInterpreter {
    pub fn new(options: LayoutOptions) -> Self {
        Self { options }
    }

    pub fn run(&self, stack: &ImageStack) -> Result<BuildPlan> {
        if stack.is_empty() {
            return Err(MkImageError::EmptyImageStack);
        }
        let ignored = stack.0.len().saturating_sub(stack.iter().count() + 1);
        if ignored > 0 {
            log::warn!("ignoring {} directive(s) after end of stack", ignored);
        }

        let opts = self.options;
        let mut builder = ContainerBuilder::new().dcd_offset_in_scfw(opts.dcd_offset_in_scfw);
        let mut payloads = Vec::new();
        let mut appended = Vec::new();
        let mut file_off = opts.first_image_offset;
        let image_padding = opts.image_padding;

        for directive in stack.iter() {
            match directive {
                Directive::NewContainer {
                    sw_version,
                    fuse_version,
                } => {
                    builder.start_container(
                        *sw_version,
                        opts.container_alignment,
                        *fuse_version,
                    )?;
                }
                Directive::Image {
                    kind,
                    path,
                    dst,
                    entry,
                    hash_bits,
                } => {
                    let size = ContainerBuilder::payload_size(path)?;
                    let mut req = ImageRequest::new(*kind, path.clone())
                        .offset(file_off)
                        .size(size)
                        .entry(*entry)
                        .image_padding(image_padding)
                        .hash_bits(*hash_bits);
                    req.dst = *dst;
                    builder.add_image(&req)?;

                    payloads.push(Payload {
                        kind: *kind,
                        path: path.clone(),
                        offset: file_off,
                        size,
                    });

                    let next = file_off as u64 + align_up(size as u64, image_padding as u64);
                    file_off = u32::try_from(next).map_err(|_| MkImageError::FieldOverflow {
                        field: "offset",
                        value: next,
                    })?;
                }
                Directive::Append { path } => appended.push(path.clone()),
                Directive::End => break,
            }
        }

        Ok(BuildPlan {
            builder,
            payloads,
            appended,
            options: opts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_types::ImageTypeFlag;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn payload(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    fn scfw() -> NamedTempFile {
        let mut data = vec![0u8; 0x1100];
        data[0x240..0x244].copy_from_slice(&0x0010_0000u32.to_le_bytes());
        payload(&data)
    }

    #[test]
    fn test_empty_stack() {
        let interp = StackInterpreter::default();
        assert!(matches!(
            interp.run(&ImageStack::new()),
            Err(MkImageError::EmptyImageStack)
        ));
        let only_end: ImageStack = [Directive::End].into_iter().collect();
        assert!(matches!(
            interp.run(&only_end),
            Err(MkImageError::EmptyImageStack)
        ));
    }

    #[test]
    fn test_image_before_container() {
        let ap = payload(b"ap");
        let stack: ImageStack = [Directive::image(ImageKind::Ap, ap.path(), 0x8000_0000)]
            .into_iter()
            .collect();
        assert!(matches!(
            StackInterpreter::default().run(&stack),
            Err(MkImageError::NoActiveContainer)
        ));
    }

    #[test]
    fn test_offsets_advance_by_padding() {
        let fw = scfw();
        let ap = payload(&[0xAB; 0x10]);
        let m4 = payload(&[0xCD; 0x2001]);
        let stack: ImageStack = [
            Directive::new_container(),
            Directive::image(ImageKind::Scfw, fw.path(), 0),
            Directive::image(ImageKind::Ap, ap.path(), 0x8000_0000),
            Directive::image(ImageKind::M4, m4.path(), 0x34FE_0000),
        ]
        .into_iter()
        .collect();

        let plan = StackInterpreter::default().run(&stack).unwrap();
        let offsets: Vec<u32> = plan.payloads.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0x6000, 0x8000, 0x9000]);

        let images = &plan.builder.containers()[0].images;
        assert_eq!(images.len(), 4);
        assert_eq!(images[1].image_type(), Some(ImageTypeFlag::DcdDdr));
        assert_eq!(images[1].offset, 0x8000);
        assert_eq!(images[2].offset, 0x8000);
        assert_eq!(images[3].offset, 0x9000);
    }

    #[test]
    fn test_end_stops_interpretation() {
        let ap = payload(b"ap");
        let stack: ImageStack = [
            Directive::new_container(),
            Directive::image(ImageKind::Ap, ap.path(), 0x8000_0000),
            Directive::End,
            Directive::image(ImageKind::Ap, ap.path(), 0x8000_0000),
        ]
        .into_iter()
        .collect();

        let plan = StackInterpreter::default().run(&stack).unwrap();
        assert_eq!(plan.payloads.len(), 1);
        assert_eq!(plan.builder.containers()[0].num_images(), 1);
    }

    #[test]
    fn test_append_and_two_containers() {
        let seco = payload(b"seco");
        let ap = payload(b"ap");
        let stack: ImageStack = [
            Directive::Append {
                path: PathBuf::from("prebuilt.img"),
            },
            Directive::new_container(),
            Directive::image(ImageKind::Seco, seco.path(), 0),
            Directive::NewContainer {
                sw_version: 0x1234,
                fuse_version: 2,
            },
            Directive::image(ImageKind::Ap, ap.path(), 0x8000_0000),
        ]
        .into_iter()
        .collect();

        let plan = StackInterpreter::default().run(&stack).unwrap();
        assert_eq!(plan.appended, vec![PathBuf::from("prebuilt.img")]);
        let containers = plan.builder.containers();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[1].sw_version, 0x1234);
        assert_eq!(containers[1].fuse_version, 2);
        assert_eq!(containers[1].images[0].offset, 0x7000);

        let flat = plan.flatten().unwrap();
        assert_eq!(flat.len(), 0x800);
        assert_eq!(flat.base_offset, RESERVED_REGION_DEFAULT);
    }

    #[test]
    fn test_missing_payload() {
        let stack: ImageStack = [
            Directive::new_container(),
            Directive::image(ImageKind::Ap, "/nonexistent/u-boot.bin", 0),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            StackInterpreter::default().run(&stack),
            Err(MkImageError::FileAccess { action: "stat", .. })
        ));
    }
}
