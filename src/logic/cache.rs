//! Package cache verification
//!
//! A package counts as cached when one of the cache directories holds its
//! file and the file matches the package's sha256 checksum, or its md5
//! checksum when no sha256 is known.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::logic::pkgset::{Package, PkgSet};

const READ_BUFFER: usize = 64 * 1024;

/// Hex digest of a file, `None` when the file does not exist.
pub fn file_digest<D: Digest>(path: &Path) -> io::Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut hasher = D::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(Some(hex::encode(hasher.finalize())))
}

fn matches_checksum(path: &Path, pkg: &Package) -> bool {
    let (actual, expected) = if let Some(sha256) = &pkg.sha256sum {
        (file_digest::<Sha256>(path), sha256)
    } else if let Some(md5) = &pkg.md5sum {
        (file_digest::<Md5>(path), md5)
    } else {
        return false;
    };

    match actual {
        Ok(Some(actual)) => actual.eq_ignore_ascii_case(expected),
        Ok(None) => false,
        Err(e) => {
            log::error!("Cannot read {}: {}", path.display(), e);
            false
        }
    }
}

/// Whether a correct copy of `pkg` sits in one of `cache_dirs`.
pub fn is_cached(pkg: &Package, cache_dirs: &[PathBuf]) -> bool {
    cache_dirs
        .iter()
        .any(|dir| matches_checksum(&dir.join(&pkg.filename), pkg))
}

/// The packages of `pkgs` that still have to be downloaded.
pub fn missing_from_cache(pkgs: &PkgSet, cache_dirs: &[PathBuf]) -> PkgSet {
    pkgs.iter()
        .filter(|pkg| {
            let cached = is_cached(pkg, cache_dirs);
            if cached {
                log::debug!("{} already cached", pkg.filename);
            }
            !cached
        })
        .cloned()
        .collect()
}
