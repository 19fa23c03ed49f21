//! Sandboxed filesystem access for tools.
//!
//! Each worker run owns a [`SandboxManager`] built from the sandboxes named in
//! its definition. Every path handed to a sandbox is treated as relative to
//! the sandbox root, resolved (symlinks and `..` included), and rejected with
//! `PermissionDenied` unless the result is still under the root.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::glob::glob_to_regex;
use crate::core::suffix::{allowed_by, normalize_suffixes, suffix_of};
use crate::error::{Error, Result};

pub const DEFAULT_MAX_BYTES: u64 = 2_000_000;
pub const DEFAULT_MAX_CHARS: usize = 200_000;
pub const DEFAULT_LIST_PATTERN: &str = "**/*";

/// Access mode of a sandbox (`ro` / `rw` in configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SandboxMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

impl TryFrom<String> for SandboxMode {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "ro" => Ok(SandboxMode::ReadOnly),
            "rw" => Ok(SandboxMode::ReadWrite),
            other => Err(format!("sandbox mode must be 'ro' or 'rw', got '{other}'")),
        }
    }
}

impl From<SandboxMode> for String {
    fn from(mode: SandboxMode) -> Self {
        match mode {
            SandboxMode::ReadOnly => "ro".to_string(),
            SandboxMode::ReadWrite => "rw".to_string(),
        }
    }
}

/// Static configuration for one named sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Root directory. Relative paths resolve against the registry root.
    pub path: PathBuf,
    #[serde(default)]
    pub mode: SandboxMode,
    /// Suffixes allowed for writes. Empty allows all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_suffixes: Vec<String>,
    /// Suffixes allowed for `sandbox_read_text`. Empty allows all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text_suffixes: Vec<String>,
    /// Suffixes allowed when attaching files from this sandbox. Empty allows all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_suffixes: Vec<String>,
    /// Ceiling on the UTF-8 size of a single write.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

impl SandboxConfig {
    pub fn new(path: impl Into<PathBuf>, mode: SandboxMode) -> Self {
        Self {
            path: path.into(),
            mode,
            allowed_suffixes: Vec::new(),
            text_suffixes: Vec::new(),
            attachment_suffixes: Vec::new(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// A sandbox whose directory exists and has been canonicalized.
#[derive(Debug, Clone)]
pub struct SandboxRoot {
    pub name: String,
    pub path: PathBuf,
    pub read_only: bool,
    pub allowed_suffixes: Vec<String>,
    pub text_suffixes: Vec<String>,
    pub attachment_suffixes: Vec<String>,
    pub max_bytes: u64,
}

impl SandboxRoot {
    /// Create (if needed) and canonicalize the directory for `config`.
    pub fn open(name: &str, config: &SandboxConfig, base_dir: &Path) -> Result<Self> {
        let path = expand_home(&config.path);
        let path = if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        };
        fs::create_dir_all(&path)
            .with_context(|| format!("create sandbox '{name}' at {}", path.display()))?;
        let path = fs::canonicalize(&path)
            .with_context(|| format!("canonicalize sandbox '{name}' at {}", path.display()))?;
        Ok(Self {
            name: name.to_string(),
            path,
            read_only: config.mode == SandboxMode::ReadOnly,
            allowed_suffixes: normalize_suffixes(&config.allowed_suffixes),
            text_suffixes: normalize_suffixes(&config.text_suffixes),
            attachment_suffixes: normalize_suffixes(&config.attachment_suffixes),
            max_bytes: config.max_bytes,
        })
    }

    /// Resolve `relative` inside this root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        resolve_within(&self.path, relative)
    }

    /// `/`-separated path of `target` relative to the root.
    pub fn relative(&self, target: &Path) -> String {
        target
            .strip_prefix(&self.path)
            .map(to_slash)
            .unwrap_or_else(|_| target.display().to_string())
    }
}

/// Symlinks followed while resolving one path before giving up.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve `relative` under the canonical directory `root`.
///
/// Leading separators are stripped so absolute-looking input is treated as
/// root-relative. Symlinks are followed as they are met, even when their
/// target does not exist yet, and `..` pops the resolved prefix. The result
/// is what the filesystem would open or create. Only the final path is
/// checked against `root`; anything outside is `PermissionDenied`.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf> {
    let escapes = || Error::PermissionDenied(format!("path '{relative}' escapes sandbox root"));
    let trimmed = relative.trim_start_matches(['/', '\\']);

    // Components still to walk, next one last.
    let mut pending = Vec::new();
    for component in Path::new(trimmed).components().rev() {
        match component {
            Component::RootDir | Component::Prefix(_) => return Err(escapes()),
            other => pending.push(PathBuf::from(other.as_os_str())),
        }
    }

    let mut resolved = root.to_path_buf();
    let mut hops = 0;
    while let Some(next) = pending.pop() {
        match next.components().next() {
            Some(Component::ParentDir) => {
                resolved.pop();
            }
            Some(Component::Normal(part)) => {
                let candidate = resolved.join(part);
                let is_link = fs::symlink_metadata(&candidate)
                    .map(|meta| meta.file_type().is_symlink())
                    .unwrap_or(false);
                if !is_link {
                    resolved = candidate;
                    continue;
                }
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(Error::PermissionDenied(format!(
                        "path '{relative}' has too many levels of symlinks"
                    )));
                }
                let target = fs::read_link(&candidate)
                    .with_context(|| format!("read symlink {}", candidate.display()))?;
                if target.is_absolute() {
                    resolved = target
                        .components()
                        .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
                        .collect();
                }
                for component in target.components().rev() {
                    if matches!(component, Component::Normal(_) | Component::ParentDir) {
                        pending.push(PathBuf::from(component.as_os_str()));
                    }
                }
            }
            _ => {}
        }
    }

    if !resolved.starts_with(root) {
        return Err(escapes());
    }
    Ok(resolved)
}

/// Named sandboxes available to one worker run.
#[derive(Debug, Clone, Default)]
pub struct SandboxManager {
    sandboxes: BTreeMap<String, SandboxRoot>,
}

impl SandboxManager {
    /// Open every configured sandbox. Relative roots resolve against `base_dir`.
    pub fn new(configs: &BTreeMap<String, SandboxConfig>, base_dir: &Path) -> Result<Self> {
        let mut sandboxes = BTreeMap::new();
        for (name, config) in configs {
            let root = SandboxRoot::open(name, config, base_dir)?;
            debug!(sandbox = %name, root = %root.path.display(), read_only = root.read_only, "sandbox ready");
            sandboxes.insert(name.clone(), root);
        }
        Ok(Self { sandboxes })
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sandboxes.keys().map(String::as_str)
    }

    pub fn sandbox(&self, name: &str) -> Result<&SandboxRoot> {
        self.sandboxes
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("unknown sandbox '{name}'")))
    }

    /// Relative paths under the sandbox matching `pattern`, sorted.
    #[instrument(skip(self))]
    pub fn list(&self, sandbox: &str, pattern: &str) -> Result<Vec<String>> {
        let root = self.sandbox(sandbox)?;
        let matcher = glob_to_regex(pattern)?;
        let mut matches = Vec::new();
        for entry in WalkDir::new(&root.path).min_depth(1) {
            let entry = entry.with_context(|| format!("walk sandbox '{sandbox}'"))?;
            let Ok(rel) = entry.path().strip_prefix(&root.path) else {
                continue;
            };
            let rel = to_slash(rel);
            if matcher.is_match(&rel) {
                matches.push(rel);
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Read a UTF-8 file of at most `max_chars` characters.
    #[instrument(skip(self))]
    pub fn read_text(&self, sandbox: &str, path: &str, max_chars: usize) -> Result<String> {
        let root = self.sandbox(sandbox)?;
        let target = root.resolve(path)?;
        if !target.is_file() {
            return Err(Error::NotFound(format!("{sandbox}:{path}")));
        }
        let suffix = suffix_of(&target);
        if !allowed_by(&root.text_suffixes, &suffix) {
            return Err(Error::PermissionDenied(format!(
                "suffix '{suffix}' not allowed for sandbox_read_text in '{sandbox}'"
            )));
        }
        let bytes = fs::read(&target).with_context(|| format!("read {}", target.display()))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| Error::InvalidInput(format!("{sandbox}:{path} is not valid UTF-8")))?;
        let chars = text.chars().count();
        if chars > max_chars {
            return Err(Error::SizeExceeded(format!(
                "{sandbox}:{path} has {chars} chars, limit is {max_chars}"
            )));
        }
        Ok(text)
    }

    /// Write `content`, creating parent directories and overwriting.
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub fn write_text(&self, sandbox: &str, path: &str, content: &str) -> Result<String> {
        let root = self.sandbox(sandbox)?;
        if root.read_only {
            return Err(Error::PermissionDenied(format!(
                "sandbox '{sandbox}' is read-only"
            )));
        }
        let target = root.resolve(path)?;
        let suffix = suffix_of(&target);
        if !allowed_by(&root.allowed_suffixes, &suffix) {
            return Err(Error::PermissionDenied(format!(
                "suffix '{suffix}' not allowed in sandbox '{sandbox}'"
            )));
        }
        let size = content.len() as u64;
        if size > root.max_bytes {
            return Err(Error::SizeExceeded(format!(
                "content is {size} bytes, sandbox '{sandbox}' allows {}",
                root.max_bytes
            )));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, content).with_context(|| format!("write {}", target.display()))?;
        let rel = root.relative(&target);
        debug!(sandbox, path = %rel, "wrote file");
        Ok(format!(
            "wrote {} chars to {sandbox}:{rel}",
            content.chars().count()
        ))
    }

    /// Resolve an attachment reference of the form `sandbox/relative/path`.
    ///
    /// The file must exist and carry a suffix allowed by the sandbox's
    /// attachment list.
    pub fn attachment_path(&self, reference: &str) -> Result<PathBuf> {
        let trimmed = reference.trim_start_matches('/');
        let (sandbox, rel) = trimmed.split_once('/').ok_or_else(|| {
            Error::InvalidInput(format!(
                "attachment '{reference}' must look like '<sandbox>/<path>'"
            ))
        })?;
        let root = self.sandbox(sandbox)?;
        let target = root.resolve(rel)?;
        if !target.is_file() {
            return Err(Error::NotFound(format!("attachment {reference}")));
        }
        let suffix = suffix_of(&target);
        if !allowed_by(&root.attachment_suffixes, &suffix) {
            return Err(Error::PermissionDenied(format!(
                "suffix '{suffix}' cannot be attached from sandbox '{sandbox}'"
            )));
        }
        Ok(target)
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

/// Size in bytes of an existing file, mapping a missing file to `NotFound`.
pub(crate) fn file_size(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(Error::NotFound(format!("{} is not a file", path.display()))),
        Err(err) if err.kind() == IoErrorKind::NotFound => {
            Err(Error::NotFound(path.display().to_string()))
        }
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("stat {}", path.display()))
            .into()),
    }
}
