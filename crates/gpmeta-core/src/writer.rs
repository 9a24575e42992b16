use crate::engine::MetadataEngine;
use crate::scan::MediaFile;
use crate::sidecar::MetadataRecord;

/// Per-file write outcome. Failures are isolated; they never abort the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    SkippedDryRun,
    Failed(String),
}

/// Capture-time format exiftool expects.
pub const EXIF_TIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Map a record to `TAG=VALUE` assignments. Only fields present in the
/// record produce assignments, so pre-existing values in the file are left
/// untouched. Capture time goes to three synonym tags set to the same
/// instant; GPS as signed decimal degrees with hemisphere refs; description
/// to three synonym tags for cross-tool compatibility.
pub fn tag_assignments(record: &MetadataRecord) -> Vec<(String, String)> {
    let mut tags: Vec<(String, String)> = Vec::new();

    if let Some(taken) = record.taken {
        let formatted = taken.format(EXIF_TIME_FORMAT).to_string();
        for tag in ["DateTimeOriginal", "CreateDate", "ModifyDate"] {
            tags.push((tag.to_string(), formatted.clone()));
        }
    }

    if let Some(gps) = &record.gps {
        tags.push(("GPSLatitude".to_string(), gps.latitude.to_string()));
        tags.push((
            "GPSLatitudeRef".to_string(),
            if gps.latitude >= 0.0 { "N" } else { "S" }.to_string(),
        ));
        tags.push(("GPSLongitude".to_string(), gps.longitude.to_string()));
        tags.push((
            "GPSLongitudeRef".to_string(),
            if gps.longitude >= 0.0 { "E" } else { "W" }.to_string(),
        ));
        if let Some(altitude) = gps.altitude {
            tags.push(("GPSAltitude".to_string(), altitude.abs().to_string()));
            tags.push((
                "GPSAltitudeRef".to_string(),
                if altitude >= 0.0 { "0" } else { "1" }.to_string(),
            ));
        }
    }

    if let Some(description) = &record.description {
        for tag in ["ImageDescription", "XMP:Description", "IPTC:Caption-Abstract"] {
            tags.push((tag.to_string(), description.clone()));
        }
    }

    tags
}

/// Write a record into a media file through the engine. Dry-run performs no
/// invocation at all.
pub fn write_metadata(
    engine: &dyn MetadataEngine,
    media: &MediaFile,
    record: &MetadataRecord,
    dry_run: bool,
) -> WriteOutcome {
    if dry_run {
        return WriteOutcome::SkippedDryRun;
    }
    let assignments = tag_assignments(record);
    if assignments.is_empty() {
        return WriteOutcome::Written;
    }
    match engine.write_tags(&media.path, &assignments) {
        Ok(()) => WriteOutcome::Written,
        Err(e) => WriteOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::sidecar::GpsPosition;
    use chrono::DateTime;
    use std::path::Path;

    fn media() -> MediaFile {
        MediaFile {
            path: Path::new("/t/IMG_0001.jpg").to_path_buf(),
            filename: "IMG_0001.jpg".to_string(),
            extension: "jpg".to_string(),
            size: 1,
        }
    }

    fn full_record() -> MetadataRecord {
        MetadataRecord {
            taken: DateTime::from_timestamp(1577882096, 0),
            gps: Some(GpsPosition {
                latitude: -33.86,
                longitude: 151.21,
                altitude: Some(-2.5),
            }),
            description: Some("harbour".to_string()),
        }
    }

    #[test]
    fn test_tag_assignments_full() {
        let tags = tag_assignments(&full_record());
        let get = |name: &str| {
            tags.iter()
                .find(|(t, _)| t == name)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("DateTimeOriginal"), "2020:01:01 12:34:56");
        assert_eq!(get("CreateDate"), get("DateTimeOriginal"));
        assert_eq!(get("ModifyDate"), get("DateTimeOriginal"));
        assert_eq!(get("GPSLatitude"), "-33.86");
        assert_eq!(get("GPSLatitudeRef"), "S");
        assert_eq!(get("GPSLongitudeRef"), "E");
        assert_eq!(get("GPSAltitude"), "2.5");
        assert_eq!(get("GPSAltitudeRef"), "1");
        assert_eq!(get("ImageDescription"), "harbour");
        assert_eq!(get("XMP:Description"), "harbour");
        assert_eq!(get("IPTC:Caption-Abstract"), "harbour");
    }

    #[test]
    fn test_absent_fields_write_nothing() {
        let record = MetadataRecord {
            description: Some("only text".to_string()),
            ..Default::default()
        };
        let tags = tag_assignments(&record);
        assert_eq!(tags.len(), 3);
        assert!(tags
            .iter()
            .all(|(t, _)| t.contains("Description") || t.contains("Caption")));
    }

    #[test]
    fn test_dry_run_skips_invocation() {
        let engine = FakeEngine::new();
        let outcome = write_metadata(&engine, &media(), &full_record(), true);
        assert_eq!(outcome, WriteOutcome::SkippedDryRun);
        assert!(engine.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_write_records_exact_tags() {
        let engine = FakeEngine::new();
        let m = media();
        let outcome = write_metadata(&engine, &m, &full_record(), false);
        assert_eq!(outcome, WriteOutcome::Written);
        let written = engine.written.lock().unwrap();
        assert_eq!(written[&m.path], tag_assignments(&full_record()));
    }

    #[test]
    fn test_failure_is_per_file() {
        let engine = FakeEngine {
            fail_writes: true,
            ..FakeEngine::new()
        };
        let outcome = write_metadata(&engine, &media(), &full_record(), false);
        assert!(matches!(outcome, WriteOutcome::Failed(_)));
    }
}
