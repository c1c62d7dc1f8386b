//! Image digest computation
//!
//! Backends implement [`DigestInterface`]; [`Sha2Digest`] is the default.

use crate::container::{BootImage, HASH_MAX_LEN};
use crate::error::{MkImageError, Result};
use crate::image_types::HashAlgorithm;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Interface every digest backend implements
pub trait DigestInterface {
    /// Hash everything `reader` yields
    ///
    /// Must return exactly `algorithm.digest_len()` bytes.
    fn digest(&self, algorithm: HashAlgorithm, reader: &mut dyn Read) -> Result<Vec<u8>>;

    /// Backend name used in error reports
    fn get_name(&self) -> &'static str;
}

/// RustCrypto SHA-2 backend
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha2Digest;

fn hash_stream<D: Digest>(reader: &mut dyn Read) -> std::io::Result<Vec<u8>> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

impl DigestInterface for Sha2Digest {
    fn digest(&self, algorithm: HashAlgorithm, reader: &mut dyn Read) -> Result<Vec<u8>> {
        let out = match algorithm {
            HashAlgorithm::Sha256 => hash_stream::<Sha256>(reader)?,
            HashAlgorithm::Sha384 => hash_stream::<Sha384>(reader)?,
            HashAlgorithm::Sha512 => hash_stream::<Sha512>(reader)?,
        };
        Ok(out)
    }

    fn get_name(&self) -> &'static str {
        "sha2"
    }
}

/// Create the default digest backend
pub fn create_digest_backend() -> Box<dyn DigestInterface> {
    Box::new(Sha2Digest)
}

/// Compute the digest of `source` into a zero-padded digest buffer
///
/// `None` hashes an empty input, used for entries without a payload of their own.
pub fn compute_digest(
    backend: &dyn DigestInterface,
    source: Option<&Path>,
    algorithm: HashAlgorithm,
) -> Result<[u8; HASH_MAX_LEN]> {
    let digest = match source {
        Some(path) => {
            let file = File::open(path).map_err(|e| MkImageError::file_access("open", path, e))?;
            let mut reader = BufReader::new(file);
            backend
                .digest(algorithm, &mut reader)
                .map_err(|e| match e {
                    MkImageError::Io(source) => MkImageError::file_access("read", path, source),
                    other => other,
                })?
        }
        None => backend.digest(algorithm, &mut std::io::empty())?,
    };

    if digest.len() != algorithm.digest_len() {
        return Err(MkImageError::digest_backend(
            backend.get_name(),
            format!(
                "produced {} bytes for {}, expected {}",
                digest.len(),
                algorithm,
                algorithm.digest_len()
            ),
        ));
    }

    let mut hash = [0u8; HASH_MAX_LEN];
    hash[..digest.len()].copy_from_slice(&digest);
    Ok(hash)
}

/// Hash `source` into `img` and record the algorithm in its flags word
pub fn set_image_hash(
    img: &mut BootImage,
    backend: &dyn DigestInterface,
    source: Option<&Path>,
    algorithm: HashAlgorithm,
) -> Result<()> {
    img.hash = compute_digest(backend, source, algorithm)?;
    img.flags |= algorithm.flag();
    Ok(())
}
