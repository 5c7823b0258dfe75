use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::InstallerError;

const CHUNK_SIZE: usize = 64 * 1024;

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn sha256_file(path: &Path) -> Result<String, InstallerError> {
    let file = File::open(path)
        .map_err(|err| InstallerError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut reader = BufReader::new(file);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|err| InstallerError::Filesystem(format!("read {}: {err}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digests and size of a copied stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyDigest {
    pub bytes: u64,
    pub md5: String,
    pub sha256: String,
}

/// Copies `reader` into `writer`, hashing with MD5 and SHA-256 on the way.
pub fn copy_hashing<R: Read + ?Sized, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> Result<CopyDigest, InstallerError> {
    let mut sha256 = Sha256::new();
    let mut md5 = md5::Context::new();
    let mut bytes = 0u64;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|err| InstallerError::TransferHttp(err.to_string()))?;
        if n == 0 {
            break;
        }
        sha256.update(&buffer[..n]);
        md5.consume(&buffer[..n]);
        writer
            .write_all(&buffer[..n])
            .map_err(|err| InstallerError::Filesystem(err.to_string()))?;
        bytes += n as u64;
    }
    writer
        .flush()
        .map_err(|err| InstallerError::Filesystem(err.to_string()))?;
    Ok(CopyDigest {
        bytes,
        md5: format!("{:x}", md5.compute()),
        sha256: hex::encode(sha256.finalize()),
    })
}
