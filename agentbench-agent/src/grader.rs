//! Grading of finished trials
//!
//! A grader looks at the final conversation and the trial's working
//! directory and decides whether the task was accomplished.

use agentbench_core::{Conversation, Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Outcome of grading one trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeReport {
    pub success: bool,
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GradeReport {
    pub fn pass(notes: impl Into<String>) -> Self {
        Self {
            success: true,
            notes: notes.into(),
            error: None,
        }
    }

    pub fn fail(notes: impl Into<String>) -> Self {
        Self {
            success: false,
            notes: notes.into(),
            error: None,
        }
    }

    /// The grader itself could not run
    pub fn errored(error: &Error) -> Self {
        Self {
            success: false,
            notes: String::new(),
            error: Some(error.to_string()),
        }
    }
}

pub trait Grader: Send + Sync {
    fn name(&self) -> &str;

    fn grade(&self, conversation: &Conversation, workdir: &Path) -> GradeReport;
}

/// A file seen while grading
#[derive(Debug, Clone)]
struct Inspected {
    relative: String,
    size: u64,
    sha256: Option<String>,
}

/// Passes when the workdir holds a file with the expected size and SHA-256
#[derive(Debug, Clone)]
pub struct FileChecksumGrader {
    pub expected_sha256: String,
    pub expected_size: u64,
}

impl FileChecksumGrader {
    pub fn new(expected_sha256: impl Into<String>, expected_size: u64) -> Self {
        Self {
            expected_sha256: expected_sha256.into().to_ascii_lowercase(),
            expected_size,
        }
    }

    fn inspect(&self, workdir: &Path) -> Result<Vec<Inspected>> {
        let mut seen = Vec::new();
        for path in collect_files(workdir)? {
            let size = file_size(&path)?;
            // only hash candidates of the right size
            let sha256 = if size == self.expected_size {
                Some(sha256_file(&path)?)
            } else {
                None
            };
            seen.push(Inspected {
                relative: relative_name(workdir, &path),
                size,
                sha256,
            });
        }
        Ok(seen)
    }
}

impl Grader for FileChecksumGrader {
    fn name(&self) -> &str {
        "file_checksum"
    }

    fn grade(&self, _conversation: &Conversation, workdir: &Path) -> GradeReport {
        let seen = match self.inspect(workdir) {
            Ok(seen) => seen,
            Err(e) => return GradeReport::errored(&e),
        };

        let matched = seen
            .iter()
            .find(|f| f.sha256.as_deref() == Some(self.expected_sha256.as_str()));
        let notes = describe(&seen);
        debug!(workdir = %workdir.display(), files = seen.len(), matched = matched.is_some(), "checksum grading");

        match matched {
            Some(file) => GradeReport::pass(format!("{} matches the expected checksum. {}", file.relative, notes)),
            None => GradeReport::fail(format!(
                "no file with size {} and sha256 {}. {}",
                self.expected_size, self.expected_sha256, notes
            )),
        }
    }
}

/// Passes when the workdir holds a file whose size lies in a range,
/// optionally restricted to one extension. Used when the exact product
/// checksum is not known in advance.
#[derive(Debug, Clone)]
pub struct FileSizeGrader {
    pub min_bytes: u64,
    pub max_bytes: u64,
    pub extension: Option<String>,
}

impl FileSizeGrader {
    pub fn new(min_bytes: u64, max_bytes: u64) -> Self {
        Self {
            min_bytes,
            max_bytes,
            extension: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    fn inspect(&self, workdir: &Path) -> Result<Vec<Inspected>> {
        collect_files(workdir)?
            .into_iter()
            .map(|path| {
                Ok(Inspected {
                    relative: relative_name(workdir, &path),
                    size: file_size(&path)?,
                    sha256: None,
                })
            })
            .collect()
    }
}

impl Grader for FileSizeGrader {
    fn name(&self) -> &str {
        "file_size"
    }

    fn grade(&self, _conversation: &Conversation, workdir: &Path) -> GradeReport {
        let seen = match self.inspect(workdir) {
            Ok(seen) => seen,
            Err(e) => return GradeReport::errored(&e),
        };

        let matched = seen.iter().find(|f| {
            let ext_ok = self
                .extension
                .as_deref()
                .map_or(true, |ext| f.relative.ends_with(&format!(".{}", ext)));
            ext_ok && (self.min_bytes..=self.max_bytes).contains(&f.size)
        });
        let notes = describe(&seen);

        match matched {
            Some(file) => GradeReport::pass(format!("{} has an acceptable size. {}", file.relative, notes)),
            None => GradeReport::fail(format!(
                "no file between {} and {} bytes. {}",
                self.min_bytes, self.max_bytes, notes
            )),
        }
    }
}

fn describe(seen: &[Inspected]) -> String {
    if seen.is_empty() {
        return "Inspected no files.".to_string();
    }
    let files: Vec<String> = seen
        .iter()
        .map(|f| match &f.sha256 {
            Some(hash) => format!("{} ({} bytes, sha256 {})", f.relative, f.size, hash),
            None => format!("{} ({} bytes)", f.relative, f.size),
        })
        .collect();
    format!("Inspected {} file(s): {}", seen.len(), files.join(", "))
}

/// Regular files below `root`, sorted by path
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            Error::io_failed(e.to_string())
                .with_operation("grader::collect_files")
                .with_context("path", root.display().to_string())
                .set_source(e)
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| Error::from(e).with_context("path", path.display().to_string()))
}

/// Hex SHA-256 of a file's contents, streamed
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| Error::from(e).with_context("path", path.display().to_string()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::from(e).with_context("path", path.display().to_string()))?;
    Ok(hex::encode(hasher.finalize()))
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbench_core::ErrorKind;

    // sha256("hello world")
    const HELLO_SHA: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn conversation() -> Conversation {
        Conversation::new("sys")
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello world").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), HELLO_SHA);
    }

    #[test]
    fn test_checksum_grader_success() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("other.txt"), "nope").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/forecast.grib2"), "hello world").unwrap();

        let grader = FileChecksumGrader::new(HELLO_SHA.to_uppercase(), 11);
        let report = grader.grade(&conversation(), dir.path());

        assert!(report.success, "{:?}", report);
        assert!(report.notes.contains("forecast.grib2"));
        assert!(report.notes.contains("other.txt"));
        assert!(report.error.is_none());
    }

    #[test]
    fn test_checksum_grader_failure() {
        let dir = tempfile::tempdir().unwrap();
        // right size, wrong content
        fs::write(dir.path().join("forecast.grib2"), "hello WORLD").unwrap();

        let report = FileChecksumGrader::new(HELLO_SHA, 11).grade(&conversation(), dir.path());
        assert!(!report.success);
        assert!(report.notes.contains("Inspected 1 file(s)"));

        let empty = tempfile::tempdir().unwrap();
        let report = FileChecksumGrader::new(HELLO_SHA, 11).grade(&conversation(), empty.path());
        assert!(!report.success);
        assert!(report.notes.contains("Inspected no files."));
    }

    #[test]
    fn test_missing_workdir_is_reported_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let report = FileChecksumGrader::new(HELLO_SHA, 11).grade(&conversation(), &gone);
        assert!(!report.success);
        assert!(report.error.is_some());
    }

    #[test]
    fn test_collect_files_walks_nested_dirs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/deep")).unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("b/deep/z.grib2"), "z").unwrap();
        fs::write(dir.path().join("b/a.txt"), "a").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let files: Vec<PathBuf> = collect_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            files,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("b/a.txt"),
                PathBuf::from("b/deep/z.grib2"),
            ]
        );

        let err = collect_files(&dir.path().join("gone")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailed);
    }

    #[test]
    fn test_size_grader() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("forecast.grib2"), vec![0u8; 64]).unwrap();
        fs::write(dir.path().join("notes.txt"), vec![0u8; 64]).unwrap();

        let grader = FileSizeGrader::new(32, 128).with_extension("grib2");
        let report = grader.grade(&conversation(), dir.path());
        assert!(report.success);
        assert!(report.notes.starts_with("forecast.grib2"));

        let report = FileSizeGrader::new(100, 200).grade(&conversation(), dir.path());
        assert!(!report.success);
    }
}
