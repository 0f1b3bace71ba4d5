use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Content identity of a result file. Equal bytes must give equal fingerprints.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprinter;

impl Fingerprinter for Sha256Fingerprinter {
    fn fingerprint(&self, path: &Path) -> io::Result<String> {
        sha256_file(path)
    }
}

/// Lowercase hex SHA-256 of a file, read in 8 KiB chunks.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let hash = hasher.finalize();
    Ok(hash.iter().map(|b| format!("{b:02x}")).collect())
}
