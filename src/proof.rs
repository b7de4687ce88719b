//! Filesystem storage for uploaded payment proofs
use super::utils::file_extension;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// An uploaded file as received from the upload layer. Size and type
/// limits are enforced there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl ProofUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

pub struct ProofStorage {
    root: PathBuf,
}

impl ProofStorage {
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating proof directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// Write the upload as `<payment_id>-<digest prefix>.<ext>` and return
    /// the stored path. The payment id in the name keeps every file owned by
    /// exactly one payment.
    pub fn store(&self, payment_id: &str, upload: &ProofUpload) -> anyhow::Result<String> {
        let digest = sha256::digest(&upload.bytes);
        let mut file_name = format!("{payment_id}-{}", &digest[..16]);
        if let Some(ext) = file_extension(&upload.file_name) {
            file_name.push('.');
            file_name.push_str(&ext);
        }
        let path = self.root.join(file_name);
        fs::write(&path, &upload.bytes)
            .with_context(|| format!("writing proof file {}", path.display()))?;

        Ok(path.to_string_lossy().into_owned())
    }

    /// Remove a stored proof. Returns false when there was nothing to remove.
    pub fn remove(&self, path: &str) -> anyhow::Result<bool> {
        let path = Path::new(path);
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(path).with_context(|| format!("removing proof file {}", path.display()))?;
        Ok(true)
    }
}
