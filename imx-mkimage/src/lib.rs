//! # imx-mkimage
//!
//! Boot container image builder for the i.MX8QXP B0.
//!
//! A boot image holds up to two containers. Each container is a 16 byte
//! header followed by an array of 128 byte image entries and an optional
//! signature block. The boot ROM reads the containers from offset 0x400 and
//! verifies every payload against the digest stored in its entry.
//!
//! ## Example
//!
//! ```no_run
//! use imx_mkimage::{ContainerBuilder, ImageKind, ImageRequest};
//!
//! let mut builder = ContainerBuilder::new();
//! builder.start_container(0xCAFE, 0x400, 0)?;
//! builder.add_image(
//!     &ImageRequest::new(ImageKind::Scfw, "scfw_tcm.bin")
//!         .offset(0x6000)
//!         .size(0x1_8000),
//! )?;
//! let flat = builder.flatten(0x400)?;
//! assert_eq!(flat.layouts[0].sig_blk_offset, 16 + 2 * 128);
//! # Ok::<(), imx_mkimage::MkImageError>(())
//! ```

pub mod builder;
pub mod cli;
pub mod config;
pub mod container;
pub mod dcd;
pub mod error;
pub mod flatten;
pub mod hash;
pub mod image_types;
pub mod output;
pub mod stack;
pub mod writer;

pub use builder::{ContainerBuilder, ImageRequest, encode_image_entries};
pub use config::ImageStackConfig;
pub use container::{BootImage, ContainerHeader, ParsedContainer, parse_containers};
pub use dcd::read_dcd_offset;
pub use error::{MkImageError, Result};
pub use flatten::{FlatHeader, flatten_container_header};
pub use hash::{DigestInterface, compute_digest, create_digest_backend};
pub use image_types::{Core, HashAlgorithm, ImageKind, ImageTypeFlag};
pub use output::write_boot_image;
pub use stack::{BuildPlan, Directive, ImageStack, LayoutOptions, StackInterpreter};

/// Current version of the imx-mkimage implementation
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
