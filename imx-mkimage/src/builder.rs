//! Container builder and image array entry encoding

use crate::container::{
    BootImage, CONTAINER_FLAGS_DEFAULT, ContainerHeader, MAX_NUM_IMGS, MAX_NUM_OF_CONTAINER,
    align_up,
};
use crate::dcd::{DCD_ENTRY_ADDR_IN_SCFW, read_dcd_offset};
use crate::error::{MkImageError, Result};
use crate::flatten::{FlatHeader, flatten_container_header};
use crate::hash::{DigestInterface, create_digest_backend, set_image_hash};
use crate::image_types::{Core, HashAlgorithm, ImageKind, ImageTypeFlag, image_flags};
use std::path::{Path, PathBuf};

/// Default alignment of image payloads in the output file
pub const IMAGE_PADDING_DEFAULT: u32 = 0x1000;

/// Digest used when an image does not ask for another one
pub const IMAGE_HASH_ALGO_DEFAULT: HashAlgorithm = HashAlgorithm::Sha384;

/// Load and entry address of the SCFW image, fixed by the boot ROM
pub const SCFW_LOAD_ADDR: u64 = 0x1FFE_0000;

/// Metadata word the boot ROM expects on application processor images
pub const AP_IMAGE_META: u32 = 0x0013_55FC;

/// Everything needed to register one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub kind: ImageKind,
    pub path: PathBuf,
    /// Absolute offset of the payload in the output file
    pub offset: u32,
    pub size: u32,
    /// Requested load address, checked against the one each kind derives
    pub dst: Option<u64>,
    pub entry: u64,
    pub image_padding: u32,
    /// Digest width in bits
    pub hash_bits: u32,
}

impl ImageRequest {
    pub fn new(kind: ImageKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            offset: 0,
            size: 0,
            dst: None,
            entry: 0,
            image_padding: IMAGE_PADDING_DEFAULT,
            hash_bits: IMAGE_HASH_ALGO_DEFAULT.bits(),
        }
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn dst(mut self, dst: u64) -> Self {
        self.dst = Some(dst);
        self
    }

    pub fn entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    pub fn image_padding(mut self, padding: u32) -> Self {
        self.image_padding = padding;
        self
    }

    pub fn hash_bits(mut self, bits: u32) -> Self {
        self.hash_bits = bits;
        self
    }
}

/// Encode the image array entries for one request
///
/// Returns one entry per request, except for SCFW which is followed by the
/// DCD entry whose address the SCFW binary carries.
pub fn encode_image_entries(
    req: &ImageRequest,
    digest: &dyn DigestInterface,
    dcd_offset_in_scfw: u64,
) -> Result<Vec<BootImage>> {
    let algorithm = HashAlgorithm::try_from(req.hash_bits)?;
    let (type_, core) = req
        .kind
        .type_and_core()
        .ok_or_else(|| MkImageError::unsupported_image_kind(req.kind.to_string()))?;

    let mut img = BootImage {
        offset: req.offset,
        size: req.size,
        flags: image_flags(type_, core),
        ..Default::default()
    };

    match req.kind {
        ImageKind::Dcd => {
            img.entry = req.entry;
            // no load address, the ROM only consumes the tables
            img.dst = req.entry.wrapping_sub(1);
        }
        ImageKind::Ap => {
            img.dst = req.entry;
            img.entry = req.entry;
            img.meta = AP_IMAGE_META;
        }
        ImageKind::M4 => {
            img.dst = req.entry;
            img.entry = req.entry;
        }
        ImageKind::Scfw => {
            img.dst = SCFW_LOAD_ADDR;
            img.entry = SCFW_LOAD_ADDR;
        }
        ImageKind::Seco | ImageKind::Scd => {}
    }
    if let Some(dst) = req.dst.filter(|&d| d != img.dst) {
        log::warn!(
            "{}: requested dst 0x{:x} ignored, the boot ROM loads it at 0x{:x}",
            req.kind,
            dst,
            img.dst
        );
    }
    set_image_hash(&mut img, digest, Some(&req.path), algorithm)?;

    let mut entries = vec![img];
    if req.kind == ImageKind::Scfw {
        entries.push(scfw_dcd_entry(req, digest, dcd_offset_in_scfw)?);
    }
    Ok(entries)
}

fn scfw_dcd_entry(
    req: &ImageRequest,
    digest: &dyn DigestInterface,
    dcd_offset_in_scfw: u64,
) -> Result<BootImage> {
    let end = req.offset as u64 + req.size as u64;
    let offset = align_up(end, req.image_padding as u64);
    let mut dcd = BootImage {
        offset: u32::try_from(offset).map_err(|_| MkImageError::FieldOverflow {
            field: "offset",
            value: offset,
        })?,
        flags: image_flags(ImageTypeFlag::DcdDdr, Core::Sc),
        ..Default::default()
    };
    set_image_hash(&mut dcd, digest, None, IMAGE_HASH_ALGO_DEFAULT)?;
    dcd.entry = read_dcd_offset(&req.path, dcd_offset_in_scfw)? as u64;
    dcd.dst = dcd.entry.wrapping_sub(1);
    Ok(dcd)
}

/// Builder owning the containers of one boot image
pub struct ContainerBuilder {
    containers: Vec<ContainerHeader>,
    container_flags: u32,
    dcd_offset_in_scfw: u64,
    digest: Box<dyn DigestInterface>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self {
            containers: Vec::with_capacity(MAX_NUM_OF_CONTAINER),
            container_flags: CONTAINER_FLAGS_DEFAULT,
            dcd_offset_in_scfw: DCD_ENTRY_ADDR_IN_SCFW,
            digest: create_digest_backend(),
        }
    }

    /// Use another digest backend
    pub fn with_digest_backend(mut self, digest: Box<dyn DigestInterface>) -> Self {
        self.digest = digest;
        self
    }

    /// Byte offset of the DCD pointer inside SCFW images
    pub fn dcd_offset_in_scfw(mut self, offset: u64) -> Self {
        self.dcd_offset_in_scfw = offset;
        self
    }

    /// Flags word of containers started from now on
    pub fn container_flags(mut self, flags: u32) -> Self {
        self.container_flags = flags;
        self
    }

    /// Start the next container, returning its index
    pub fn start_container(
        &mut self,
        sw_version: u16,
        alignment: u32,
        fuse_version: u8,
    ) -> Result<usize> {
        if self.containers.len() >= MAX_NUM_OF_CONTAINER {
            return Err(MkImageError::TooManyContainers {
                max: MAX_NUM_OF_CONTAINER,
            });
        }
        let mut container = ContainerHeader::new(sw_version, alignment, fuse_version);
        container.flags = self.container_flags;
        self.containers.push(container);

        let index = self.containers.len() - 1;
        log::info!("container {}: flags 0x{:x}", index, self.container_flags);
        Ok(index)
    }

    /// Append the entries for `req` to the active container
    ///
    /// Nothing is modified when this fails.
    pub fn add_image(&mut self, req: &ImageRequest) -> Result<usize> {
        let index = self
            .containers
            .len()
            .checked_sub(1)
            .ok_or(MkImageError::NoActiveContainer)?;
        let needed = if req.kind == ImageKind::Scfw { 2 } else { 1 };
        if self.containers[index].num_images() + needed > MAX_NUM_IMGS {
            return Err(MkImageError::TooManyImages {
                container: index,
                max: MAX_NUM_IMGS,
            });
        }

        let entries = encode_image_entries(req, self.digest.as_ref(), self.dcd_offset_in_scfw)?;
        log::info!("{} size = {}", req.kind, req.size);
        let added = entries.len();
        self.containers[index].images.extend(entries);
        Ok(added)
    }

    /// Attach the signature block produced by the signing tool
    pub fn set_signature_block(&mut self, container: usize, sig_block: Vec<u8>) -> Result<()> {
        let target = self
            .containers
            .get_mut(container)
            .ok_or(MkImageError::NoActiveContainer)?;
        target.sig_block = sig_block;
        Ok(())
    }

    pub fn containers(&self) -> &[ContainerHeader] {
        &self.containers
    }

    /// Serialize all containers for placement at `base_offset` in the file
    pub fn flatten(&self, base_offset: u32) -> Result<FlatHeader> {
        flatten_container_header(&self.containers, base_offset)
    }

    /// Read the payload size of `path`
    pub fn payload_size(path: &Path) -> Result<u32> {
        let size = std::fs::metadata(path)
            .map_err(|e| MkImageError::file_access("stat", path, e))?
            .len();
        u32::try_from(size).map_err(|_| MkImageError::FileTooLarge {
            path: path.to_path_buf(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{CONTAINER_ALIGNMENT, SW_VERSION_DEFAULT};
    use sha2::{Digest, Sha256, Sha384};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn payload(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    fn scfw_payload(dcd_addr: u32) -> NamedTempFile {
        let mut data = vec![0x5Au8; 0x800];
        data[0x240..0x244].copy_from_slice(&dcd_addr.to_le_bytes());
        payload(&data)
    }

    fn builder_with_container() -> ContainerBuilder {
        let mut builder = ContainerBuilder::new();
        builder
            .start_container(SW_VERSION_DEFAULT, CONTAINER_ALIGNMENT, 0)
            .unwrap();
        builder
    }

    #[test]
    fn test_start_container_limit() {
        let mut builder = ContainerBuilder::new();
        assert_eq!(builder.start_container(0xCAFE, 0x400, 0).unwrap(), 0);
        assert_eq!(builder.start_container(0xCAFE, 0x400, 1).unwrap(), 1);
        assert!(matches!(
            builder.start_container(0xCAFE, 0x400, 2),
            Err(MkImageError::TooManyContainers { max: 2 })
        ));
        assert_eq!(builder.containers().len(), 2);
        assert_eq!(builder.containers()[1].fuse_version, 1);
        assert_eq!(builder.containers()[1].flags, CONTAINER_FLAGS_DEFAULT);
    }

    #[test]
    fn test_add_image_requires_container() {
        let file = payload(b"ap");
        let mut builder = ContainerBuilder::new();
        let err = builder
            .add_image(&ImageRequest::new(ImageKind::Ap, file.path()))
            .unwrap_err();
        assert!(matches!(err, MkImageError::NoActiveContainer));
    }

    #[test]
    fn test_ap_entry() {
        let file = payload(b"u-boot");
        let mut builder = builder_with_container();
        let req = ImageRequest::new(ImageKind::Ap, file.path())
            .offset(0x6000)
            .size(6)
            .entry(0x8000_0000);
        assert_eq!(builder.add_image(&req).unwrap(), 1);

        let img = &builder.containers()[0].images[0];
        assert_eq!(img.offset, 0x6000);
        assert_eq!(img.size, 6);
        assert_eq!(img.dst, 0x8000_0000);
        assert_eq!(img.entry, 0x8000_0000);
        assert_eq!(img.meta, AP_IMAGE_META);
        assert_eq!(img.image_type(), Some(ImageTypeFlag::Exec));
        assert_eq!(img.core(), Some(Core::Ca35));
        assert_eq!(img.hash_algorithm().unwrap(), HashAlgorithm::Sha384);
        assert_eq!(img.digest(), &Sha384::digest(b"u-boot")[..]);
    }

    #[test]
    fn test_seco_and_m4_entries() {
        let seco = payload(b"ahab");
        let m4 = payload(b"m4 firmware");
        let mut builder = builder_with_container();
        builder
            .add_image(&ImageRequest::new(ImageKind::Seco, seco.path()).entry(0x1234))
            .unwrap();
        builder
            .add_image(
                &ImageRequest::new(ImageKind::M4, m4.path())
                    .entry(0x34FE_0000)
                    .hash_bits(256),
            )
            .unwrap();

        let images = &builder.containers()[0].images;
        assert_eq!(images[0].image_type(), Some(ImageTypeFlag::Seco));
        assert_eq!(images[0].core(), Some(Core::Sc));
        assert_eq!(images[0].dst, 0);
        assert_eq!(images[0].entry, 0);

        assert_eq!(images[1].core(), Some(Core::Cm4_0));
        assert_eq!(images[1].dst, 0x34FE_0000);
        assert_eq!(images[1].hash_algorithm().unwrap(), HashAlgorithm::Sha256);
        assert_eq!(images[1].digest(), &Sha256::digest(b"m4 firmware")[..]);
        assert!(images[1].hash[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_dcd_entry_sentinel_destination() {
        let file = payload(b"dcd tables");
        let mut builder = builder_with_container();
        builder
            .add_image(&ImageRequest::new(ImageKind::Dcd, file.path()).entry(0x0010_0000))
            .unwrap();
        let img = &builder.containers()[0].images[0];
        assert_eq!(img.entry, 0x0010_0000);
        assert_eq!(img.dst, 0x000F_FFFF);
        assert_eq!(img.image_type(), Some(ImageTypeFlag::DcdDdr));
    }

    #[test]
    fn test_scfw_adds_dcd_entry() {
        let file = scfw_payload(0x0011_2000);
        let mut builder = builder_with_container();
        let req = ImageRequest::new(ImageKind::Scfw, file.path())
            .offset(0x6000)
            .size(0x800);
        assert_eq!(builder.add_image(&req).unwrap(), 2);

        let images = &builder.containers()[0].images;
        assert_eq!(images.len(), 2);

        let scfw = &images[0];
        assert_eq!(scfw.dst, SCFW_LOAD_ADDR);
        assert_eq!(scfw.entry, SCFW_LOAD_ADDR);
        assert_eq!(scfw.core(), Some(Core::Sc));
        assert_eq!(scfw.image_type(), Some(ImageTypeFlag::Exec));

        let dcd = &images[1];
        assert_eq!(dcd.image_type(), Some(ImageTypeFlag::DcdDdr));
        assert_eq!(dcd.offset, 0x7000);
        assert_eq!(dcd.size, 0);
        assert_eq!(dcd.entry, 0x0011_2000);
        assert_eq!(dcd.dst, 0x0011_1FFF);
        assert_eq!(dcd.digest(), &Sha384::digest(b"")[..]);
    }

    #[test]
    fn test_scfw_needs_two_slots() {
        let ap = payload(b"ap");
        let scfw = scfw_payload(0x100);
        let mut builder = builder_with_container();
        for _ in 0..5 {
            builder
                .add_image(&ImageRequest::new(ImageKind::Ap, ap.path()))
                .unwrap();
        }
        let before = builder.containers()[0].clone();
        let err = builder
            .add_image(&ImageRequest::new(ImageKind::Scfw, scfw.path()))
            .unwrap_err();
        assert!(matches!(err, MkImageError::TooManyImages { container: 0, max: 6 }));
        assert_eq!(builder.containers()[0], before);
    }

    #[test]
    fn test_seventh_image_rejected() {
        let ap = payload(b"ap");
        let mut builder = builder_with_container();
        for _ in 0..6 {
            builder
                .add_image(&ImageRequest::new(ImageKind::Ap, ap.path()))
                .unwrap();
        }
        let err = builder
            .add_image(&ImageRequest::new(ImageKind::Ap, ap.path()))
            .unwrap_err();
        assert!(matches!(err, MkImageError::TooManyImages { .. }));
        assert_eq!(builder.containers()[0].num_images(), 6);
    }

    #[test]
    fn test_unsupported_hash_leaves_state() {
        let ap = payload(b"ap");
        let mut builder = builder_with_container();
        let before = builder.containers().to_vec();
        let err = builder
            .add_image(&ImageRequest::new(ImageKind::Ap, ap.path()).hash_bits(128))
            .unwrap_err();
        assert!(matches!(
            err,
            MkImageError::UnsupportedHashAlgorithm { bits: 128 }
        ));
        assert_eq!(builder.containers(), &before[..]);
    }

    #[test]
    fn test_scd_rejected() {
        let scd = payload(b"scd");
        let mut builder = builder_with_container();
        let err = builder
            .add_image(&ImageRequest::new(ImageKind::Scd, scd.path()))
            .unwrap_err();
        assert!(matches!(err, MkImageError::UnsupportedImageKind(_)));
        assert_eq!(builder.containers()[0].num_images(), 0);
    }

    #[test]
    fn test_scfw_after_other_images() {
        let seco = payload(b"ahab container");
        let scfw = scfw_payload(0x0011_0000);
        let ap = payload(b"bl31");
        let mut builder = builder_with_container();
        builder
            .add_image(
                &ImageRequest::new(ImageKind::Seco, seco.path())
                    .offset(0x6000)
                    .size(14),
            )
            .unwrap();
        builder
            .add_image(
                &ImageRequest::new(ImageKind::Scfw, scfw.path())
                    .offset(0x7000)
                    .size(0x800),
            )
            .unwrap();
        builder
            .add_image(
                &ImageRequest::new(ImageKind::Ap, ap.path())
                    .offset(0x8000)
                    .size(4)
                    .entry(0x8000_0000),
            )
            .unwrap();

        let images = &builder.containers()[0].images;
        let types: Vec<_> = images.iter().map(|i| i.image_type()).collect();
        assert_eq!(
            types,
            vec![
                Some(ImageTypeFlag::Seco),
                Some(ImageTypeFlag::Exec),
                Some(ImageTypeFlag::DcdDdr),
                Some(ImageTypeFlag::Exec),
            ]
        );
        assert_eq!(images[1].dst, SCFW_LOAD_ADDR);
        assert_eq!(images[2].offset, align_up(0x7000 + 0x800, 0x1000) as u32);
        assert_eq!(images[2].entry, 0x0011_0000);
        assert_eq!(images[3].core(), Some(Core::Ca35));
    }

    #[test]
    fn test_requested_dst_does_not_override_rules() {
        let scfw = scfw_payload(0x100);
        let mut builder = builder_with_container();
        builder
            .add_image(
                &ImageRequest::new(ImageKind::Scfw, scfw.path())
                    .size(0x800)
                    .dst(0x9000_0000),
            )
            .unwrap();
        assert_eq!(builder.containers()[0].images[0].dst, SCFW_LOAD_ADDR);
    }

    #[test]
    fn test_signature_block_in_flattened_header() {
        let ap = payload(b"ap");
        let mut builder = ContainerBuilder::new().container_flags(0x1);
        builder.start_container(0xCAFE, 0x400, 0).unwrap();
        builder
            .add_image(
                &ImageRequest::new(ImageKind::Ap, ap.path())
                    .offset(0x6000)
                    .size(2),
            )
            .unwrap();
        let sig: Vec<u8> = (0..0x40u8).collect();
        builder.set_signature_block(0, sig.clone()).unwrap();
        assert!(matches!(
            builder.set_signature_block(1, Vec::new()),
            Err(MkImageError::NoActiveContainer)
        ));

        let flat = builder.flatten(0x400).unwrap();
        let layout = flat.layouts[0];
        assert_eq!(layout.sig_blk_offset, 16 + 128);
        assert_eq!(layout.length, layout.sig_blk_offset + sig.len());
        assert_eq!(
            &flat.bytes[layout.sig_blk_offset..layout.length],
            sig.as_slice()
        );
        assert_eq!(
            u16::from_le_bytes([flat.bytes[1], flat.bytes[2]]) as usize,
            layout.length
        );
        assert_eq!(&flat.bytes[4..8], &1u32.to_le_bytes());
    }

    struct FixedDigest;

    impl DigestInterface for FixedDigest {
        fn digest(
            &self,
            algorithm: HashAlgorithm,
            reader: &mut dyn std::io::Read,
        ) -> Result<Vec<u8>> {
            let mut data = Vec::new();
            std::io::Read::read_to_end(reader, &mut data)?;
            let fill = data.first().copied().unwrap_or(0xEE);
            Ok(vec![fill; algorithm.digest_len()])
        }

        fn get_name(&self) -> &'static str {
            "fixed"
        }
    }

    #[test]
    fn test_custom_digest_backend() {
        let m4 = payload(b"seven b");
        let scfw = scfw_payload(0x100);
        let mut builder = ContainerBuilder::new().with_digest_backend(Box::new(FixedDigest));
        builder.start_container(0xCAFE, 0x400, 0).unwrap();
        builder
            .add_image(
                &ImageRequest::new(ImageKind::M4, m4.path())
                    .size(7)
                    .hash_bits(512),
            )
            .unwrap();
        builder
            .add_image(&ImageRequest::new(ImageKind::Scfw, scfw.path()).size(0x800))
            .unwrap();

        let images = &builder.containers()[0].images;
        assert_eq!(images[0].digest(), &[b's'; 64][..]);
        assert_eq!(images[1].digest(), &[0x5Au8; 48][..]);
        assert!(images[1].hash[48..].iter().all(|&b| b == 0));
        // empty input for the synthetic DCD entry
        assert_eq!(images[2].digest(), &[0xEEu8; 48][..]);
    }

    #[test]
    fn test_custom_dcd_offset() {
        let mut data = vec![0u8; 0x40];
        data[0x10..0x14].copy_from_slice(&0x2000u32.to_le_bytes());
        let file = payload(&data);
        let mut builder = ContainerBuilder::new().dcd_offset_in_scfw(0x10);
        builder.start_container(0xCAFE, 0x400, 0).unwrap();
        builder
            .add_image(&ImageRequest::new(ImageKind::Scfw, file.path()).size(0x40))
            .unwrap();
        assert_eq!(builder.containers()[0].images[1].entry, 0x2000);
    }
}
