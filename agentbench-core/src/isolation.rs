//! Isolated working directories
//!
//! Each benchmark trial works inside its own freshly created directory so
//! that files written by tools are attributable to exactly one trial.
//!
//! The process working directory is global state: only one `IsolatedDir`
//! should be live at a time.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default directory name template
pub const DEFAULT_TEMPLATE: &str = "workdir_{timestamp}";

/// Timestamp format substituted for `{timestamp}`
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Replace characters that are unsafe in file names with `_`.
pub fn make_path_safe(s: &str) -> String {
    s.replace([' ', '/', '\\', ':', '?', '*', '"', '<', '>', '|'], "_")
}

/// Expand `{timestamp}` in a directory template.
pub fn expand_template(template: &str) -> String {
    let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    template.replace("{timestamp}", &timestamp)
}

/// Create a directory that did not exist before, appending `-1`, `-2`, ...
/// to the name when `base` is already taken. Parents are created as needed.
fn create_fresh_dir(base: &Path) -> Result<PathBuf> {
    let io_error = |e: std::io::Error, path: &Path| {
        Error::from(e)
            .with_operation("IsolatedDir::enter")
            .with_context("path", path.display().to_string())
    };

    if let Some(parent) = base.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(e, parent))?;
    }

    let mut path = base.to_path_buf();
    let mut attempt = 0;
    loop {
        match std::fs::create_dir(&path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                attempt += 1;
                let mut name = base.as_os_str().to_os_string();
                name.push(format!("-{}", attempt));
                path = PathBuf::from(name);
            }
            Err(e) => return Err(io_error(e, &path)),
        }
    }
}

/// Guard that keeps the process inside an isolated directory.
///
/// Dropping the guard moves back to the directory that was current at
/// `enter`, including on early return and unwinding. `enter` never reuses
/// an existing directory. If `delete_empty` is
/// set and the directory is still empty it is removed.
#[derive(Debug)]
pub struct IsolatedDir {
    path: PathBuf,
    original: PathBuf,
    delete_empty: bool,
}

impl IsolatedDir {
    pub fn enter(template: &str, delete_empty: bool) -> Result<Self> {
        let original = std::env::current_dir().map_err(|e| {
            Error::from(e).with_operation("IsolatedDir::enter")
        })?;
        let path = create_fresh_dir(&original.join(expand_template(template)))?;
        std::env::set_current_dir(&path).map_err(|e| {
            Error::from(e)
                .with_operation("IsolatedDir::enter")
                .with_context("path", path.display().to_string())
        })?;

        debug!(path = %path.display(), "entered isolated directory");
        Ok(Self {
            path,
            original,
            delete_empty,
        })
    }

    /// Absolute path of the isolated directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that will be restored on drop
    pub fn original(&self) -> &Path {
        &self.original
    }
}

impl Drop for IsolatedDir {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.original) {
            warn!(path = %self.original.display(), error = %e, "failed to restore working directory");
        }

        if !self.delete_empty {
            return;
        }
        let empty = std::fs::read_dir(&self.path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if empty {
            match std::fs::remove_dir(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "removed empty isolated directory"),
                Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove empty directory"),
            }
        }
    }
}

/// Run `f` inside an isolated directory, returning its result.
pub fn with_isolated_dir<T>(
    template: &str,
    delete_empty: bool,
    f: impl FnOnce(&Path) -> T,
) -> Result<T> {
    let dir = IsolatedDir::enter(template, delete_empty)?;
    Ok(f(dir.path()))
}
