use std::{collections::HashMap, path::Path};

use sha2::{Digest, Sha256};

/// The optional integrity manifest (`<dir>/workflows.sha256`), sha256sum
/// format: lines of `<64-hex>  <filename>`, blank lines and `#`-prefixed
/// lines are comments.
#[derive(Default, Clone)]
pub struct Manifest {
    expected: HashMap<String, String>,
}

impl Manifest {
    /// Parses a manifest file. A missing file yields an empty manifest.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };
        Ok(Self::parse(&contents))
    }

    fn parse(contents: &str) -> Self {
        let mut expected = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((hash, filename)) = line.split_once("  ") else {
                continue;
            };
            expected.insert(filename.trim().to_owned(), hash.trim().to_lowercase());
        }
        Self { expected }
    }

    /// Returns the expected hex-lowercase sha256 for `filename`, if listed.
    #[must_use]
    pub fn expected_hash(&self, filename: &str) -> Option<&str> {
        self.expected.get(filename).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }
}

/// Hex-lowercase sha256 of a file's contents.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sha256sum_format_ignoring_blanks_and_comments() {
        let manifest = Manifest::parse(
            "# workflow manifest\n\
             aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa  auto-label.lua\n\
             \n\
             bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb  looper.lua\n",
        );
        assert_eq!(
            manifest.expected_hash("auto-label.lua"),
            Some("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
        );
        assert_eq!(
            manifest.expected_hash("looper.lua"),
            Some("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
        );
        assert_eq!(manifest.expected_hash("unknown.lua"), None);
    }

    #[test]
    fn missing_manifest_file_yields_empty_manifest() {
        let manifest = Manifest::load(Path::new("/nonexistent/workflows.sha256")).unwrap();
        assert!(manifest.is_empty());
    }
}
