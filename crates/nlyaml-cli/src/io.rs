//! Input and output plumbing: stdin-or-file in, stdout-or-file out.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Fully-read input bytes plus where they came from.
#[derive(Debug)]
pub struct InputSource {
    data: Vec<u8>,
    label: String,
}

impl InputSource {
    /// Read `path`, or stdin when no path was given.
    pub fn from_args(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let data = std::fs::read(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Ok(Self { data, label: path.display().to_string() })
            }
            None => {
                let mut data = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut data)
                    .context("failed to read stdin")?;
                Ok(Self { data, label: "<stdin>".to_string() })
            }
        }
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The bytes as UTF-8 text.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.data)
            .with_context(|| format!("{} is not valid UTF-8", self.label))
    }

    /// Where the input came from, for diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Write `bytes` to `path`, or stdout when no path was given.
pub fn write_output(path: Option<&PathBuf>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, bytes)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes).context("failed to write stdout")?;
            stdout.flush().context("failed to flush stdout")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.yaml");
        std::fs::write(&path, "net:\n").unwrap();

        let input = InputSource::from_args(Some(&path)).unwrap();
        assert_eq!(input.text().unwrap(), "net:\n");
        assert!(input.label().ends_with("doc.yaml"));
    }

    #[test]
    fn test_binary_input_rejects_text_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let input = InputSource::from_args(Some(&path)).unwrap();
        assert_eq!(input.bytes().len(), 4);
        assert!(input.text().is_err());
    }

    #[test]
    fn test_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_output(Some(&path), b"abc").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }
}
