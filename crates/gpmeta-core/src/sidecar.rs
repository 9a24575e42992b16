use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Failure to turn a sidecar payload into a metadata record. Per-file: the
/// affected pairing is marked failed, others are unaffected.
#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("{path}: unreadable sidecar: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: sidecar is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{path}: sidecar has no recognized metadata fields")]
    Empty { path: PathBuf },
}

/// GPS position in signed decimal degrees / meters.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// Normalized metadata extracted from a sidecar. A field absent in the JSON
/// is absent here, never a zero sentinel. A pure function of the payload, so
/// repeated extraction of the same sidecar is idempotent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    pub taken: Option<DateTime<Utc>>,
    pub gps: Option<GpsPosition>,
    pub description: Option<String>,
}

impl MetadataRecord {
    pub fn is_empty(&self) -> bool {
        self.taken.is_none() && self.gps.is_none() && self.description.is_none()
    }
}

/// Epoch seconds come text-encoded in current exports but some older ones
/// used a bare number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Epoch {
    Text(String),
    Num(i64),
}

impl Epoch {
    fn seconds(&self) -> Option<i64> {
        match self {
            Epoch::Text(s) => s.trim().parse().ok(),
            Epoch::Num(n) => Some(*n),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawTime {
    timestamp: Option<Epoch>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGeo {
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSidecar {
    description: Option<String>,
    photo_taken_time: Option<RawTime>,
    creation_time: Option<RawTime>,
    geo_data: Option<RawGeo>,
    geo_data_exif: Option<RawGeo>,
}

/// Parse a sidecar payload into a normalized record. Unrecognized keys are
/// ignored.
pub fn parse_record(bytes: &[u8]) -> Result<MetadataRecord, serde_json::Error> {
    let raw: RawSidecar = serde_json::from_slice(bytes)?;

    let taken = raw
        .photo_taken_time
        .as_ref()
        .and_then(time_from)
        // creationTime is the upload time; a fallback only when the photo
        // taken time is missing entirely.
        .or_else(|| raw.creation_time.as_ref().and_then(time_from));

    // geoDataExif mirrors geoData in real exports; consult it when geoData
    // is absent or carries the no-GPS sentinel.
    let gps = raw
        .geo_data
        .as_ref()
        .and_then(gps_from)
        .or_else(|| raw.geo_data_exif.as_ref().and_then(gps_from));

    let description = raw
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from);

    Ok(MetadataRecord {
        taken,
        gps,
        description,
    })
}

fn time_from(t: &RawTime) -> Option<DateTime<Utc>> {
    let secs = t.timestamp.as_ref()?.seconds()?;
    DateTime::from_timestamp(secs, 0)
}

/// Google encodes "no GPS" as an all-zero triplet. Only the simultaneous
/// zero/zero pair is treated as absent; a single genuine zero coordinate is
/// kept. A true 0,0 fix is indistinguishable from absent in this format -
/// a known ambiguity of the source, not resolved here.
fn gps_from(g: &RawGeo) -> Option<GpsPosition> {
    let latitude = g.latitude?;
    let longitude = g.longitude?;
    if latitude == 0.0 && longitude == 0.0 {
        return None;
    }
    Some(GpsPosition {
        latitude,
        longitude,
        // Zero altitude accompanies the sentinel and carries no information.
        altitude: g.altitude.filter(|a| *a != 0.0),
    })
}

/// Extract the metadata record from a sidecar file on disk.
pub fn extract(path: &Path) -> Result<MetadataRecord, SidecarError> {
    let bytes = fs::read(path).map_err(|source| SidecarError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let record = parse_record(&bytes).map_err(|source| SidecarError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if record.is_empty() {
        return Err(SidecarError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(record)
}
