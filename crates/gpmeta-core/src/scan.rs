use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::matcher;

/// Album manifest filenames shipped by Takeout, localized per account
/// language. These carry album metadata, not per-image metadata.
const MANIFEST_NAMES: &[&str] = &[
    "metadata.json",
    "metadata(1).json",
    "Metadaten.json",
    "métadonnées.json",
    "metadati.json",
    "metadatos.json",
    "メタデータ.json",
];

/// Top-level keys that mark a JSON payload as a per-image sidecar.
const SIDECAR_KEYS: &[&str] = &[
    "photoTakenTime",
    "creationTime",
    "geoData",
    "url",
    "imageViews",
];

/// Top-level keys that mark a JSON payload as an album manifest.
const MANIFEST_KEYS: &[&str] = &["access", "albumData", "sharedAlbumComments"];

/// A media file found during scanning. Immutable once scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub filename: String,
    /// Lowercased extension without the dot, e.g. `jpg`.
    pub extension: String,
    pub size: u64,
}

/// A metadata sidecar found during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarFile {
    pub path: PathBuf,
    /// Raw filename as exported, possibly truncated.
    pub filename: String,
}

/// Files of one directory, classified.
#[derive(Debug, Clone, Default)]
pub struct DirectoryEntries {
    pub media: Vec<MediaFile>,
    pub sidecars: Vec<SidecarFile>,
    pub other: Vec<PathBuf>,
}

/// An unreadable path hit during scanning. Fatal for that subtree only.
#[derive(Debug, Clone, Serialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of scanning a tree. Read-only with respect to the filesystem.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Directory -> classified entries, in deterministic path order.
    pub directories: BTreeMap<PathBuf, DirectoryEntries>,
    pub errors: Vec<ScanError>,
    /// Album manifests and other non-sidecar JSON, excluded from pairing.
    pub skipped_json: Vec<PathBuf>,
}

impl ScanResult {
    pub fn total_media(&self) -> usize {
        self.directories.values().map(|d| d.media.len()).sum()
    }

    pub fn total_sidecars(&self) -> usize {
        self.directories.values().map(|d| d.sidecars.len()).sum()
    }
}

/// Scan a directory tree, classifying files as media, sidecar or other and
/// grouping them per directory. Matching never crosses directory boundaries,
/// so grouping is the scanner's contract. Symlinks are not followed.
///
/// An unreadable root is an error; unreadable subdirectories are recorded in
/// `errors` and skipped.
pub fn scan(root: &Path, recursive: bool) -> anyhow::Result<ScanResult> {
    let meta = fs::symlink_metadata(root)
        .map_err(|e| anyhow::anyhow!("{}: unreadable root: {e}", root.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("{}: not a directory", root.display());
    }

    let mut result = ScanResult::default();
    scan_one(root, recursive, &mut result);
    Ok(result)
}

fn scan_one(dir: &Path, recursive: bool, result: &mut ScanResult) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
            result.errors.push(ScanError {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            });
            return;
        }
    };

    let bucket = result.directories.entry(dir.to_path_buf()).or_default();
    let mut subdirs: Vec<PathBuf> = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                result.errors.push(ScanError {
                    path: dir.to_path_buf(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        // Never follow symlinks; Takeout trees do not contain them and
        // following them could cycle.
        if file_type.is_symlink() {
            bucket.other.push(path);
            continue;
        }
        if file_type.is_dir() {
            if recursive {
                subdirs.push(path);
            }
            continue;
        }

        let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(String::from)
        else {
            bucket.other.push(path);
            continue;
        };

        if filename.to_lowercase().ends_with(".json") {
            match classify_json(&path, &filename) {
                JsonKind::Sidecar => bucket.sidecars.push(SidecarFile {
                    path,
                    filename,
                }),
                JsonKind::Manifest => {
                    debug!(path = %path.display(), "skipping album manifest");
                    result.skipped_json.push(path);
                }
                JsonKind::Other => result.skipped_json.push(path),
            }
            continue;
        }

        if let Some(media) = classify_media(&path, &filename) {
            bucket.media.push(media);
        } else {
            bucket.other.push(path);
        }
    }

    bucket.media.sort_by(|a, b| a.filename.cmp(&b.filename));
    bucket.sidecars.sort_by(|a, b| a.filename.cmp(&b.filename));

    subdirs.sort();
    for sub in subdirs {
        scan_one(&sub, recursive, result);
    }
}

enum JsonKind {
    Sidecar,
    Manifest,
    Other,
}

/// Classify a JSON file by filename and recognized top-level keys, so that
/// album manifests are never treated as per-image metadata.
fn classify_json(path: &Path, filename: &str) -> JsonKind {
    if MANIFEST_NAMES.iter().any(|m| m.eq_ignore_ascii_case(filename)) {
        return JsonKind::Manifest;
    }
    // Filenames that do not decompose into <media>.<suffix> cannot pair.
    if matcher::parse_sidecar_name(filename).is_none() {
        return JsonKind::Other;
    }

    let Ok(bytes) = fs::read(path) else {
        return JsonKind::Other;
    };
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return JsonKind::Other;
    };
    let Some(obj) = value.as_object() else {
        return JsonKind::Other;
    };

    if MANIFEST_KEYS.iter().any(|k| obj.contains_key(*k))
        && !obj.contains_key("photoTakenTime")
    {
        return JsonKind::Manifest;
    }
    if SIDECAR_KEYS.iter().any(|k| obj.contains_key(*k)) {
        return JsonKind::Sidecar;
    }
    JsonKind::Other
}

/// Media classification: image/* or video/* by MIME guess, plus a few video
/// container extensions the guesser misses.
fn classify_media(path: &Path, filename: &str) -> Option<MediaFile> {
    let mime = mime_guess::from_path(filename).first();
    let is_media = match &mime {
        Some(m) => {
            m.type_() == mime_guess::mime::IMAGE
                || m.type_() == mime_guess::mime::VIDEO
                || filename.to_lowercase().ends_with(".mts")
        }
        None => false,
    };
    if !is_media {
        return None;
    }

    let size = fs::symlink_metadata(path).map(|m| m.len()).unwrap_or(0);
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    Some(MediaFile {
        path: path.to_path_buf(),
        filename: filename.to_string(),
        extension,
        size,
    })
}
