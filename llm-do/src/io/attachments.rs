//! Attachment policy checks and loading.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::suffix::{allowed_by, denied_by, normalize_suffixes, suffix_of};
use crate::core::types::Attachment;
use crate::error::{Error, Result};
use crate::io::sandbox::file_size;

/// Limits on the files a worker accepts as attachments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AttachmentPolicy {
    pub max_attachments: usize,
    pub max_total_bytes: u64,
    pub allowed_suffixes: Vec<String>,
    pub denied_suffixes: Vec<String>,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            max_attachments: 4,
            max_total_bytes: 10_000_000,
            allowed_suffixes: Vec::new(),
            denied_suffixes: Vec::new(),
        }
    }
}

impl AttachmentPolicy {
    pub fn check_config(&self) -> Result<()> {
        if self.max_total_bytes == 0 {
            return Err(Error::InvalidInput(
                "attachment_policy.max_total_bytes must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Check `paths` against the policy without reading any content.
    ///
    /// The count is checked first, then each file in order; the size check
    /// stops at the first file that pushes the running total over the limit.
    pub fn validate(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.len() > self.max_attachments {
            return Err(Error::SizeExceeded(format!(
                "{} attachments given, at most {} allowed",
                paths.len(),
                self.max_attachments
            )));
        }
        let allowed = normalize_suffixes(&self.allowed_suffixes);
        let denied = normalize_suffixes(&self.denied_suffixes);
        let mut total = 0u64;
        for path in paths {
            let suffix = suffix_of(path);
            if !allowed_by(&allowed, &suffix) {
                return Err(Error::PermissionDenied(format!(
                    "attachment {} has suffix '{suffix}' outside the allowed list",
                    path.display()
                )));
            }
            if denied_by(&denied, &suffix) {
                return Err(Error::PermissionDenied(format!(
                    "attachment {} has denied suffix '{suffix}'",
                    path.display()
                )));
            }
            total += file_size(path)?;
            if total > self.max_total_bytes {
                return Err(Error::SizeExceeded(format!(
                    "attachments total more than {} bytes (reached {total} at {})",
                    self.max_total_bytes,
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Read one validated attachment from disk.
pub fn load_attachment(path: &Path, name: impl Into<String>) -> Result<Attachment> {
    let data = fs::read(path).with_context(|| format!("read attachment {}", path.display()))?;
    let attachment = Attachment {
        name: name.into(),
        media_type: media_type_for(path).to_string(),
        size: data.len() as u64,
        data,
    };
    debug!(name = %attachment.name, media_type = %attachment.media_type, size = attachment.size, "loaded attachment");
    Ok(attachment)
}

/// Validate `paths` against `policy`, then load them, naming each by `names`.
pub fn load_attachments(
    policy: &AttachmentPolicy,
    paths: &[PathBuf],
    names: &[String],
) -> Result<Vec<Attachment>> {
    policy.validate(paths)?;
    paths
        .iter()
        .zip(names)
        .map(|(path, name)| load_attachment(path, name.clone()))
        .collect()
}

pub fn media_type_for(path: &Path) -> &'static str {
    match suffix_of(path).as_str() {
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".pdf" => "application/pdf",
        ".txt" | ".log" => "text/plain",
        ".md" | ".markdown" => "text/markdown",
        ".csv" => "text/csv",
        ".html" | ".htm" => "text/html",
        ".json" => "application/json",
        ".yaml" | ".yml" => "application/yaml",
        ".toml" => "application/toml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, bytes: usize) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![b'x'; bytes]).expect("write");
        path
    }

    #[test]
    fn too_many_files_fail_before_any_other_check() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths: Vec<PathBuf> = (0..5)
            .map(|i| write(temp.path(), &format!("{i}.png"), 1))
            .collect();
        let err = AttachmentPolicy::default().validate(&paths).unwrap_err();
        assert!(matches!(err, Error::SizeExceeded(_)));

        let policy = AttachmentPolicy {
            max_attachments: 0,
            ..AttachmentPolicy::default()
        };
        assert!(policy.validate(&[]).is_ok());
        assert!(matches!(policy.validate(&paths[..1]), Err(Error::SizeExceeded(_))));
    }

    #[test]
    fn total_size_short_circuits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = write(temp.path(), "a.txt", 6);
        let second = write(temp.path(), "b.txt", 6);
        let missing = temp.path().join("never-read.txt");
        let policy = AttachmentPolicy {
            max_total_bytes: 10,
            ..AttachmentPolicy::default()
        };

        let err = policy
            .validate(&[first.clone(), second, missing])
            .unwrap_err();
        assert!(matches!(err, Error::SizeExceeded(_)), "{err}");
        assert!(policy.validate(&[first]).is_ok());
    }

    #[test]
    fn suffix_lists_apply_case_insensitively() {
        let temp = tempfile::tempdir().expect("tempdir");
        let png = write(temp.path(), "board.PNG", 1);
        let exe = write(temp.path(), "tool.exe", 1);
        let policy = AttachmentPolicy {
            allowed_suffixes: vec![".png".to_string(), ".EXE".to_string()],
            denied_suffixes: vec![".Exe".to_string()],
            ..AttachmentPolicy::default()
        };

        assert!(policy.validate(std::slice::from_ref(&png)).is_ok());
        assert!(matches!(policy.validate(&[exe]), Err(Error::PermissionDenied(_))));
        let txt = write(temp.path(), "notes.txt", 1);
        assert!(matches!(policy.validate(&[txt]), Err(Error::PermissionDenied(_))));
    }

    #[test]
    fn missing_file_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = AttachmentPolicy::default()
            .validate(&[temp.path().join("gone.png")])
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn load_sets_media_type_and_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write(temp.path(), "plan.png", 3);
        let loaded = load_attachments(
            &AttachmentPolicy::default(),
            std::slice::from_ref(&path),
            &["input/plan.png".to_string()],
        )
        .expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "input/plan.png");
        assert_eq!(loaded[0].media_type, "image/png");
        assert_eq!(loaded[0].data.len(), 3);
    }

    #[test]
    fn zero_total_bytes_is_rejected_as_config() {
        let policy = AttachmentPolicy {
            max_total_bytes: 0,
            ..AttachmentPolicy::default()
        };
        assert!(matches!(policy.check_config(), Err(Error::InvalidInput(_))));
    }
}
