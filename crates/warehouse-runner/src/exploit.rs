//! Exploit discovery.
//!
//! An exploit is any regular, executable, non-hidden file in the exploit
//! directory whose first two bytes are `#!`. The directory is rescanned at
//! the start of every round so exploits can be added or removed live.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::RunnerError;

/// An executable exploit found in the exploit directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Exploit {
    /// File name, used as the exploit identifier when reporting.
    pub name: String,

    /// Full path handed to the process spawner.
    pub path: PathBuf,
}

impl Exploit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { name, path }
    }

    /// Name without its extension, for log lines.
    pub fn display_name(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Scan `dir` for runnable exploits, sorted by name.
///
/// Hidden files, non-executables and files lacking a `#!` line are
/// skipped with a warning. A missing or unreadable directory is fatal.
pub fn discover_exploits(dir: &Path) -> Result<Vec<Exploit>, RunnerError> {
    let entries = fs::read_dir(dir).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RunnerError::ExploitDirMissing(dir.to_path_buf()),
        io::ErrorKind::PermissionDenied => RunnerError::ExploitDirUnreadable(dir.to_path_buf()),
        _ => RunnerError::Io(e),
    })?;

    let mut exploits = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let Ok(meta) = fs::metadata(&path) else {
            warn!("{} cannot be inspected, hence it will be skipped...", name);
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        if !is_executable(&meta) {
            warn!("{} is not executable, hence it will be skipped...", name);
            continue;
        }
        if !has_shebang(&path) {
            warn!("{} no shebang #!, hence it will be skipped...", name);
            continue;
        }

        exploits.push(Exploit { name, path });
    }

    exploits.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(exploits)
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    true
}

fn has_shebang(path: &Path) -> bool {
    let mut head = [0u8; 2];
    fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut head))
        .map(|_| &head == b"#!")
        .unwrap_or(false)
}
