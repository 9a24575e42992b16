use chrono::NaiveDateTime;

use crate::engine::{MetadataEngine, TagMap};
use crate::scan::MediaFile;
use crate::sidecar::MetadataRecord;
use crate::writer::EXIF_TIME_FORMAT;

/// Tolerance for coordinate round-trips through EXIF rationals.
pub const GPS_EPSILON: f64 = 1e-5;
/// Tolerance for altitude round-trips, in meters.
pub const ALTITUDE_EPSILON: f64 = 0.5;

/// Tags requested on read-back. Group-qualified write tags come back under
/// bare names.
const READ_TAGS: &[&str] = &[
    "DateTimeOriginal",
    "GPSLatitude",
    "GPSLongitude",
    "GPSAltitude",
    "ImageDescription",
    "Description",
    "Caption-Abstract",
];

/// Per-file verification outcome. In cleanup runs anything but `Verified`
/// blocks sidecar deletion; elsewhere it is informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    Mismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },
    Unverifiable(String),
}

/// Read the written tags back and compare them against the source record.
/// Timestamps compare at one-second granularity, coordinates within
/// [`GPS_EPSILON`] degrees, description verbatim after trim. A field present
/// in the record but absent or divergent in the file is a mismatch.
pub fn verify_metadata(
    engine: &dyn MetadataEngine,
    media: &MediaFile,
    record: &MetadataRecord,
) -> VerifyOutcome {
    if record.is_empty() {
        return VerifyOutcome::Unverifiable("no fields to verify".to_string());
    }

    let tags = match engine.read_tags(&media.path, READ_TAGS) {
        Ok(tags) => tags,
        Err(e) => return VerifyOutcome::Unverifiable(e.to_string()),
    };

    if let Some(expected) = record.taken {
        let expected_str = expected.format(EXIF_TIME_FORMAT).to_string();
        match tag_str(&tags, "DateTimeOriginal") {
            Some(actual) => {
                // Strip any timezone suffix; EXIF stores local wall time.
                let trimmed: String = actual.chars().take(19).collect();
                let matches = NaiveDateTime::parse_from_str(&trimmed, EXIF_TIME_FORMAT)
                    .map(|dt| {
                        (dt.and_utc().timestamp() - expected.timestamp()).abs() <= 1
                    })
                    .unwrap_or(false);
                if !matches {
                    return VerifyOutcome::Mismatch {
                        field: "DateTimeOriginal",
                        expected: expected_str,
                        actual: trimmed,
                    };
                }
            }
            None => {
                return VerifyOutcome::Mismatch {
                    field: "DateTimeOriginal",
                    expected: expected_str,
                    actual: "<absent>".to_string(),
                }
            }
        }
    }

    if let Some(gps) = &record.gps {
        // exiftool's raw EXIF values are unsigned with the hemisphere in the
        // ref tag, so magnitudes are compared.
        if let Some(outcome) = check_coord(&tags, "GPSLatitude", gps.latitude, GPS_EPSILON) {
            return outcome;
        }
        if let Some(outcome) = check_coord(&tags, "GPSLongitude", gps.longitude, GPS_EPSILON) {
            return outcome;
        }
        if let Some(altitude) = gps.altitude {
            if let Some(outcome) =
                check_coord(&tags, "GPSAltitude", altitude, ALTITUDE_EPSILON)
            {
                return outcome;
            }
        }
    }

    if let Some(expected) = &record.description {
        let found = ["ImageDescription", "Description", "Caption-Abstract"]
            .iter()
            .filter_map(|tag| tag_str(&tags, tag))
            .any(|actual| actual.trim() == expected.as_str());
        if !found {
            let actual = tag_str(&tags, "ImageDescription")
                .unwrap_or_else(|| "<absent>".to_string());
            return VerifyOutcome::Mismatch {
                field: "ImageDescription",
                expected: expected.clone(),
                actual,
            };
        }
    }

    VerifyOutcome::Verified
}

fn check_coord(
    tags: &TagMap,
    field: &'static str,
    expected: f64,
    epsilon: f64,
) -> Option<VerifyOutcome> {
    let Some(actual) = tag_f64(tags, field) else {
        return Some(VerifyOutcome::Mismatch {
            field,
            expected: expected.to_string(),
            actual: "<absent>".to_string(),
        });
    };
    if (actual.abs() - expected.abs()).abs() > epsilon {
        return Some(VerifyOutcome::Mismatch {
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    None
}

fn tag_str(tags: &TagMap, name: &str) -> Option<String> {
    match tags.get(name)? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn tag_f64(tags: &TagMap, name: &str) -> Option<f64> {
    match tags.get(name)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
