//! SHA-512 checksums over acquisition outputs
//!
//! This module provides:
//! - Streamed SHA-512 hashing of files (fixed-size blocks, never the whole
//!   file in memory)
//! - Manifest generation for every image in an output directory
//! - Manifest parsing (GNU `sha512sum` format) and re-verification
//!
//! ## Example
//!
//! ```no_run
//! use optimager_core::checksum;
//! use std::path::Path;
//!
//! let dir = Path::new("/srv/discs/kb123");
//! let report = checksum::compute(dir, "iso", &dir.join("checksums.sha512"));
//! for entry in report.manifest.iter() {
//!     println!("{}  {}", entry.digest, entry.filename);
//! }
//! ```

use crate::error::{Error, Result};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

// ============================================================================
// Constants
// ============================================================================

/// Algorithm name recorded in metadata
pub const CHECKSUM_TYPE: &str = "SHA-512";

/// Bytes read per hashing step (1 MB)
pub const HASH_BLOCK_SIZE: usize = 1024 * 1024;

/// Length of a SHA-512 digest in hex characters
pub const SHA512_HEX_LENGTH: usize = 128;

// ============================================================================
// Manifest types
// ============================================================================

/// One file and its digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    /// File name relative to the manifest's directory
    pub filename: String,
    /// Lowercase hex SHA-512 digest
    pub digest: String,
}

/// Ordered list of file digests
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChecksumManifest {
    entries: Vec<ChecksumEntry>,
}

impl ChecksumManifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn push(&mut self, filename: impl Into<String>, digest: impl Into<String>) {
        self.entries.push(ChecksumEntry {
            filename: filename.into(),
            digest: digest.into(),
        });
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ChecksumEntry> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Digest recorded for `filename`
    pub fn get(&self, filename: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.filename == filename)
            .map(|e| e.digest.as_str())
    }

    /// Filename to digest, sorted by filename
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.filename.clone(), e.digest.clone()))
            .collect()
    }

    /// Manifest file contents: `<hex>  <filename>` per line
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}  {}\n", e.digest, e.filename))
            .collect()
    }
}

/// Result of [`compute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    /// Every file was hashed and the manifest was written
    pub wrote: bool,
    /// Digests that were computed
    pub manifest: ChecksumManifest,
}

// ============================================================================
// Hashing
// ============================================================================

/// SHA-512 of everything `reader` yields, as lowercase hex
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha512::new();
    let mut buffer = vec![0u8; HASH_BLOCK_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-512 of a file, as lowercase hex
pub fn hash_file(path: &Path) -> io::Result<String> {
    hash_reader(File::open(path)?)
}

/// Regular files in `dir` whose name ends in `.<extension>`, in listing order
///
/// The comparison is on the whole suffix, so compound extensions such as
/// `iso.raw` match the image names built from them.
pub fn matching_files(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    let suffix = format!(".{}", extension);
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.len() > suffix.len() && name.ends_with(&suffix) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Hash every `*.<extension>` file in `dir` and write the manifest
///
/// Failures never abort: an unreadable file is logged and skipped, and
/// `wrote` is cleared whenever any file or the manifest itself could not be
/// processed.
pub fn compute(dir: &Path, extension: &str, manifest_path: &Path) -> ChecksumReport {
    let mut manifest = ChecksumManifest::new();
    let mut wrote = true;

    let files = match matching_files(dir, extension) {
        Ok(files) => files,
        Err(e) => {
            tracing::error!("Cannot list {}: {}", dir.display(), e);
            return ChecksumReport {
                wrote: false,
                manifest,
            };
        }
    };

    for path in files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match hash_file(&path) {
            Ok(digest) => {
                tracing::debug!("{}  {}", digest, filename);
                manifest.push(filename, digest);
            }
            Err(e) => {
                tracing::error!("Cannot read {}: {}", path.display(), e);
                wrote = false;
            }
        }
    }

    if let Err(e) = std::fs::write(manifest_path, manifest.render()) {
        tracing::error!(
            "Error writing checksum file {}: {}",
            manifest_path.display(),
            e
        );
        wrote = false;
    }

    ChecksumReport { wrote, manifest }
}

// ============================================================================
// Manifest parsing and verification
// ============================================================================

/// Parse a GNU-format manifest (`<hex>  <name>` or `<hex> *<name>`)
///
/// Blank lines and `#` comments are ignored.
pub fn parse_manifest(content: &str) -> Result<ChecksumManifest> {
    let mut manifest = ChecksumManifest::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim_end();
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let (digest, filename) = parse_gnu_line(line).ok_or_else(|| {
            Error::InvalidManifest(format!("line {}: '{}'", number + 1, line))
        })?;
        manifest.push(filename, digest);
    }

    Ok(manifest)
}

fn parse_gnu_line(line: &str) -> Option<(String, String)> {
    let (digest, rest) = line.split_once(' ')?;
    let filename = rest
        .strip_prefix(' ')
        .or_else(|| rest.strip_prefix('*'))?;

    if digest.len() != SHA512_HEX_LENGTH || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if filename.is_empty() {
        return None;
    }

    Some((digest.to_lowercase(), filename.to_string()))
}

/// A file whose digest changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// File name
    pub filename: String,
    /// Digest in the manifest
    pub expected: String,
    /// Digest now
    pub actual: String,
}

/// Result of [`verify_manifest`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerificationReport {
    /// Files whose digest still matches
    pub matched: Vec<String>,
    /// Files whose digest changed
    pub mismatched: Vec<Mismatch>,
    /// Files listed but absent or unreadable
    pub missing: Vec<String>,
}

impl VerificationReport {
    /// Whether every listed file matched
    pub fn is_ok(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

/// Re-hash every file a manifest lists
///
/// Names are resolved relative to `dir`.
pub fn verify_manifest(dir: &Path, manifest_path: &Path) -> Result<VerificationReport> {
    let content = std::fs::read_to_string(manifest_path)?;
    let manifest = parse_manifest(&content)?;
    let mut report = VerificationReport::default();

    for entry in manifest.iter() {
        let path = dir.join(&entry.filename);
        match hash_file(&path) {
            Ok(actual) if actual == entry.digest => {
                tracing::info!("{}: OK", entry.filename);
                report.matched.push(entry.filename.clone());
            }
            Ok(actual) => {
                tracing::error!("{}: FAILED", entry.filename);
                report.mismatched.push(Mismatch {
                    filename: entry.filename.clone(),
                    expected: entry.digest.clone(),
                    actual,
                });
            }
            Err(e) => {
                tracing::error!("{}: cannot read ({})", entry.filename, e);
                report.missing.push(entry.filename.clone());
            }
        }
    }

    Ok(report)
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    const EMPTY_SHA512: &str = "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e";
    const ABC_SHA512: &str = "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f";

    #[test]
    fn test_hash_known_vectors() {
        assert_eq!(hash_reader(Cursor::new(b"")).unwrap(), EMPTY_SHA512);
        assert_eq!(hash_reader(Cursor::new(b"abc")).unwrap(), ABC_SHA512);
    }

    #[test]
    fn test_hash_spans_blocks() {
        let data = vec![0x5au8; HASH_BLOCK_SIZE * 2 + 17];
        let streamed = hash_reader(Cursor::new(&data)).unwrap();
        let direct = format!("{:x}", Sha512::digest(&data));
        assert_eq!(streamed, direct);
    }

    #[test]
    fn test_matching_files_is_case_sensitive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("disc.iso"), b"a").unwrap();
        fs::write(dir.path().join("disc.ISO"), b"b").unwrap();
        fs::write(dir.path().join("disc.map"), b"c").unwrap();
        fs::create_dir(dir.path().join("sub.iso")).unwrap();

        let files = matching_files(dir.path(), "iso").unwrap();
        assert_eq!(files, vec![dir.path().join("disc.iso")]);
    }

    #[test]
    fn test_matching_files_compound_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("disc.iso.raw"), b"a").unwrap();
        fs::write(dir.path().join("disc.raw"), b"b").unwrap();
        fs::write(dir.path().join(".iso.raw"), b"c").unwrap();

        let files = matching_files(dir.path(), "iso.raw").unwrap();
        assert_eq!(files, vec![dir.path().join("disc.iso.raw")]);

        let mut files = matching_files(dir.path(), "raw").unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![
                dir.path().join(".iso.raw"),
                dir.path().join("disc.iso.raw"),
                dir.path().join("disc.raw"),
            ]
        );
    }

    #[test]
    fn test_compute_writes_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("disc.iso"), b"abc").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let manifest_path = dir.path().join("checksums.sha512");

        let report = compute(dir.path(), "iso", &manifest_path);

        assert!(report.wrote);
        assert_eq!(report.manifest.len(), 1);
        assert_eq!(report.manifest.get("disc.iso"), Some(ABC_SHA512));
        assert_eq!(
            fs::read_to_string(&manifest_path).unwrap(),
            format!("{}  disc.iso\n", ABC_SHA512)
        );
    }

    #[test]
    fn test_compute_is_repeatable() {
        let dir = TempDir::new().unwrap();
        for name in ["a.iso", "b.iso", "c.iso"] {
            fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let manifest_path = dir.path().join("checksums.sha512");

        let first = compute(dir.path(), "iso", &manifest_path);
        let first_file = fs::read(&manifest_path).unwrap();
        let second = compute(dir.path(), "iso", &manifest_path);
        let second_file = fs::read(&manifest_path).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_file, second_file);
    }

    #[test]
    fn test_compute_empty_directory() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("checksums.sha512");

        let report = compute(dir.path(), "iso", &manifest_path);
        assert!(report.wrote);
        assert!(report.manifest.is_empty());
        assert_eq!(fs::read_to_string(&manifest_path).unwrap(), "");
    }

    #[test]
    fn test_compute_unwritable_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("disc.iso"), b"abc").unwrap();
        let manifest_path = dir.path().join("missing").join("checksums.sha512");

        let report = compute(dir.path(), "iso", &manifest_path);
        assert!(!report.wrote);
        assert_eq!(report.manifest.len(), 1);
    }

    #[test]
    fn test_compute_missing_directory() {
        let report = compute(
            Path::new("/nonexistent/optimager"),
            "iso",
            Path::new("/nonexistent/optimager/checksums.sha512"),
        );
        assert!(!report.wrote);
        assert!(report.manifest.is_empty());
    }

    #[test]
    fn test_manifest_map_is_sorted() {
        let mut manifest = ChecksumManifest::new();
        manifest.push("b.iso", "22");
        manifest.push("a.iso", "11");
        let keys: Vec<_> = manifest.to_map().into_keys().collect();
        assert_eq!(keys, vec!["a.iso", "b.iso"]);
    }

    #[test]
    fn test_parse_manifest_formats() {
        let content = format!(
            "# generated by optimager\n\n{}  disc.iso\n{} *disc 2.iso\n",
            ABC_SHA512,
            EMPTY_SHA512.to_uppercase()
        );
        let manifest = parse_manifest(&content).unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.get("disc.iso"), Some(ABC_SHA512));
        assert_eq!(manifest.get("disc 2.iso"), Some(EMPTY_SHA512));
    }

    #[test]
    fn test_parse_manifest_rejects_garbage() {
        let err = parse_manifest("not a checksum line\n").unwrap_err();
        assert!(matches!(err, Error::InvalidManifest(msg) if msg.contains("line 1")));

        let short = format!("{}  disc.iso\n", &ABC_SHA512[..64]);
        assert!(parse_manifest(&short).is_err());
    }

    #[test]
    fn test_verify_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("good.iso"), b"abc").unwrap();
        fs::write(dir.path().join("bad.iso"), b"abc").unwrap();
        let manifest_path = dir.path().join("checksums.sha512");
        compute(dir.path(), "iso", &manifest_path);

        fs::write(dir.path().join("bad.iso"), b"tampered").unwrap();
        let mut content = fs::read_to_string(&manifest_path).unwrap();
        content.push_str(&format!("{}  gone.iso\n", EMPTY_SHA512));
        fs::write(&manifest_path, content).unwrap();

        let report = verify_manifest(dir.path(), &manifest_path).unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.matched, vec!["good.iso"]);
        assert_eq!(report.mismatched.len(), 1);
        assert_eq!(report.mismatched[0].filename, "bad.iso");
        assert_eq!(report.mismatched[0].expected, ABC_SHA512);
        assert_eq!(report.missing, vec!["gone.iso"]);
    }

    #[test]
    fn test_verify_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let result = verify_manifest(dir.path(), &dir.path().join("checksums.sha512"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
