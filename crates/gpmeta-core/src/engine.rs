use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// External metadata engine failure. A write failure is per-file and
/// isolated; only a missing engine binary is fatal for the whole run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "exiftool not found in PATH. Install it:\n\
         \x20 Debian/Ubuntu: sudo apt install libimage-exiftool-perl\n\
         \x20 macOS: brew install exiftool\n\
         \x20 Windows: download from https://exiftool.org/ and add to PATH"
    )]
    NotFound,
    #[error("{path}: exiftool exited with {status}: {stderr}")]
    Failed {
        path: PathBuf,
        status: i32,
        stderr: String,
    },
    #[error("{path}: failed to run exiftool: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: unexpected exiftool output: {reason}")]
    Output { path: PathBuf, reason: String },
}

/// Tag values as read back, keyed by bare tag name.
pub type TagMap = HashMap<String, serde_json::Value>;

/// Injected capability over the external metadata-editing engine, so the
/// pipeline can be exercised against a fake that records exact tag
/// arguments.
pub trait MetadataEngine: Send + Sync {
    /// Apply `TAG=VALUE` assignments to one file. Atomic-or-failed from the
    /// pipeline's point of view.
    fn write_tags(&self, path: &Path, assignments: &[(String, String)]) -> Result<(), EngineError>;

    /// Read the named tags back from one file.
    fn read_tags(&self, path: &Path, tags: &[&str]) -> Result<TagMap, EngineError>;
}

/// The real engine: one `exiftool` process invocation per file.
pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    /// Locate exiftool in PATH and probe it with `-ver`. Missing or broken
    /// installs fail here, before the pipeline starts.
    pub fn locate() -> Result<(Self, String), EngineError> {
        let program = which::which("exiftool").map_err(|_| EngineError::NotFound)?;
        let output = Command::new(&program)
            .arg("-ver")
            .output()
            .map_err(|_| EngineError::NotFound)?;
        if !output.status.success() {
            return Err(EngineError::NotFound);
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((Self { program }, version))
    }
}

/// Build the argument list for a write invocation.
pub(crate) fn write_args(path: &Path, assignments: &[(String, String)]) -> Vec<String> {
    let mut args: Vec<String> = assignments
        .iter()
        .map(|(tag, value)| format!("-{tag}={value}"))
        .collect();
    args.push("-overwrite_original".to_string());
    args.push(path.display().to_string());
    args
}

/// Build the argument list for a read invocation. `-n` keeps GPS values as
/// plain decimal numbers; `-j` gives JSON output.
pub(crate) fn read_args(path: &Path, tags: &[&str]) -> Vec<String> {
    let mut args = vec!["-j".to_string(), "-n".to_string()];
    args.extend(tags.iter().map(|t| format!("-{t}")));
    args.push(path.display().to_string());
    args
}

impl MetadataEngine for ExifTool {
    fn write_tags(&self, path: &Path, assignments: &[(String, String)]) -> Result<(), EngineError> {
        let args = write_args(path, assignments);
        debug!(path = %path.display(), tags = assignments.len(), "exiftool write");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| EngineError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                path: path.to_path_buf(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn read_tags(&self, path: &Path, tags: &[&str]) -> Result<TagMap, EngineError> {
        let args = read_args(path, tags);
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| EngineError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                path: path.to_path_buf(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let parsed: Vec<serde_json::Value> =
            serde_json::from_slice(&output.stdout).map_err(|e| EngineError::Output {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let Some(serde_json::Value::Object(map)) = parsed.into_iter().next() else {
            return Err(EngineError::Output {
                path: path.to_path_buf(),
                reason: "empty JSON array".to_string(),
            });
        };
        Ok(map.into_iter().collect())
    }
}

/// In-memory engine for tests: records write arguments verbatim and serves
/// them back on read, the way exiftool reports bare tag names.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeEngine {
        pub written: Mutex<HashMap<PathBuf, Vec<(String, String)>>>,
        pub fail_writes: bool,
        pub fail_reads: bool,
    }

    impl FakeEngine {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pre-seed tags as if a previous run had written them.
        pub fn seed(&self, path: &Path, assignments: &[(String, String)]) {
            self.written
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), assignments.to_vec());
        }
    }

    impl MetadataEngine for FakeEngine {
        fn write_tags(
            &self,
            path: &Path,
            assignments: &[(String, String)],
        ) -> Result<(), EngineError> {
            if self.fail_writes {
                return Err(EngineError::Failed {
                    path: path.to_path_buf(),
                    status: 1,
                    stderr: "simulated write failure".to_string(),
                });
            }
            self.written
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), assignments.to_vec());
            Ok(())
        }

        fn read_tags(&self, path: &Path, tags: &[&str]) -> Result<TagMap, EngineError> {
            if self.fail_reads {
                return Err(EngineError::Failed {
                    path: path.to_path_buf(),
                    status: 1,
                    stderr: "simulated read failure".to_string(),
                });
            }
            let written = self.written.lock().unwrap();
            let mut map = TagMap::new();
            if let Some(assignments) = written.get(path) {
                for (tag, value) in assignments {
                    // exiftool reports bare names: "XMP:Description" reads
                    // back as "Description".
                    let bare = tag.rsplit(':').next().unwrap_or(tag);
                    if !tags.iter().any(|t| *t == tag || *t == bare) {
                        continue;
                    }
                    let json = match value.parse::<f64>() {
                        Ok(n) => serde_json::json!(n),
                        Err(_) => serde_json::json!(value),
                    };
                    map.insert(bare.to_string(), json);
                }
            }
            Ok(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_args_shape() {
        let args = write_args(
            Path::new("/t/a.jpg"),
            &[
                ("DateTimeOriginal".to_string(), "2020:01:01 12:00:00".to_string()),
                ("GPSLatitude".to_string(), "35.6586".to_string()),
            ],
        );
        assert_eq!(
            args,
            vec![
                "-DateTimeOriginal=2020:01:01 12:00:00",
                "-GPSLatitude=35.6586",
                "-overwrite_original",
                "/t/a.jpg",
            ]
        );
    }

    #[test]
    fn test_read_args_shape() {
        let args = read_args(Path::new("/t/a.jpg"), &["DateTimeOriginal", "GPSLatitude"]);
        assert_eq!(
            args,
            vec!["-j", "-n", "-DateTimeOriginal", "-GPSLatitude", "/t/a.jpg"]
        );
    }
}
