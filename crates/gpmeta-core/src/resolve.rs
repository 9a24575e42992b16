use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::debug;

use crate::matcher;
use crate::scan::{DirectoryEntries, MediaFile, SidecarFile};

/// A committed one-to-one association between a media file and its sidecar.
/// Each side appears in at most one pairing per run.
#[derive(Debug, Clone)]
pub struct Pairing {
    pub media: MediaFile,
    pub sidecar: SidecarFile,
}

/// A media file whose best-priority candidate tier holds more than one
/// sidecar. Reported for manual review, never guessed.
#[derive(Debug, Clone)]
pub struct Ambiguity {
    pub media: MediaFile,
    pub candidates: Vec<SidecarFile>,
}

/// Result of resolving one or more directories.
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub pairings: Vec<Pairing>,
    pub unmatched: Vec<MediaFile>,
    pub ambiguous: Vec<Ambiguity>,
    /// Sidecars left in the pool after resolution: orphans with no media, or
    /// candidates of ambiguous media. Always retained on disk.
    pub leftover_sidecars: Vec<SidecarFile>,
}

impl ResolveOutcome {
    fn merge(&mut self, other: ResolveOutcome) {
        self.pairings.extend(other.pairings);
        self.unmatched.extend(other.unmatched);
        self.ambiguous.extend(other.ambiguous);
        self.leftover_sidecars.extend(other.leftover_sidecars);
    }
}

/// Resolve pairings for a single directory.
///
/// Media files are processed in lexicographic filename order against a
/// sidecar pool owned exclusively by this pass. Committing a pairing removes
/// the sidecar from the pool, so a later media file can never consume a
/// sidecar already claimed by an earlier one even when truncated names
/// collide. A sole best-priority candidate commits; zero candidates records
/// unmatched; two or more candidates in the best tier record an ambiguity
/// and consume nothing.
pub fn resolve_directory(entries: DirectoryEntries) -> ResolveOutcome {
    let DirectoryEntries {
        mut media,
        sidecars,
        ..
    } = entries;
    media.sort_by(|a, b| a.filename.cmp(&b.filename));

    // Pool keyed by raw filename; BTreeMap keeps candidate generation
    // deterministic.
    let mut pool: BTreeMap<String, SidecarFile> = sidecars
        .into_iter()
        .map(|s| (s.filename.clone(), s))
        .collect();

    let mut outcome = ResolveOutcome::default();

    for m in media {
        let names: Vec<String> = pool.keys().cloned().collect();
        let cands = matcher::candidates(&m.filename, &names);

        let Some(best_priority) = cands.first().map(|c| c.priority) else {
            debug!(media = %m.path.display(), "no sidecar candidate");
            outcome.unmatched.push(m);
            continue;
        };
        let best: Vec<&matcher::SidecarCandidate> = cands
            .iter()
            .take_while(|c| c.priority == best_priority)
            .collect();

        if best.len() > 1 {
            let candidates = best
                .iter()
                .filter_map(|c| pool.get(&c.name).cloned())
                .collect();
            debug!(media = %m.path.display(), count = best.len(), "ambiguous candidates");
            outcome.ambiguous.push(Ambiguity {
                media: m,
                candidates,
            });
            continue;
        }

        let sidecar = pool
            .remove(&best[0].name)
            .expect("candidate names come from the pool");
        outcome.pairings.push(Pairing { media: m, sidecar });
    }

    outcome.leftover_sidecars.extend(pool.into_values());
    outcome
}

/// Resolve every scanned directory independently, in path order.
pub fn resolve_all(directories: BTreeMap<PathBuf, DirectoryEntries>) -> ResolveOutcome {
    let mut outcome = ResolveOutcome::default();
    for (_, entries) in directories {
        outcome.merge(resolve_directory(entries));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn media(name: &str) -> MediaFile {
        MediaFile {
            path: Path::new("/t").join(name),
            filename: name.to_string(),
            extension: name.rsplit('.').next().unwrap_or("").to_lowercase(),
            size: 1,
        }
    }

    fn sidecar(name: &str) -> SidecarFile {
        SidecarFile {
            path: Path::new("/t").join(name),
            filename: name.to_string(),
        }
    }

    fn entries(media_names: &[&str], sidecar_names: &[&str]) -> DirectoryEntries {
        DirectoryEntries {
            media: media_names.iter().map(|n| media(n)).collect(),
            sidecars: sidecar_names.iter().map(|n| sidecar(n)).collect(),
            other: vec![],
        }
    }

    #[test]
    fn test_simple_pairing() {
        let out = resolve_directory(entries(
            &["a.jpg", "b.jpg"],
            &[
                "a.jpg.supplemental-metadata.json",
                "b.jpg.supplemental-metadata.json",
            ],
        ));
        assert_eq!(out.pairings.len(), 2);
        assert!(out.unmatched.is_empty());
        assert!(out.ambiguous.is_empty());
        assert!(out.leftover_sidecars.is_empty());
    }

    #[test]
    fn test_unmatched_media_reported_not_dropped() {
        let out = resolve_directory(entries(&["lonely.jpg"], &[]));
        assert!(out.pairings.is_empty());
        assert_eq!(out.unmatched.len(), 1);
        assert_eq!(out.unmatched[0].filename, "lonely.jpg");
    }

    #[test]
    fn test_orphan_sidecar_left_in_pool() {
        let out = resolve_directory(entries(&[], &["ghost.jpg.supplemental-metadata.json"]));
        assert_eq!(out.leftover_sidecars.len(), 1);
    }

    #[test]
    fn test_sidecar_never_consumed_twice() {
        // Both media files could claim the truncated sidecar; the marked one
        // also has its own exact sidecar. Lexicographic order processes the
        // unmarked file first, and the pool guarantees single consumption.
        let out = resolve_directory(entries(
            &["IMG_0001.jpg", "IMG_0001(1).jpg"],
            &[
                "IMG_0001.jpg.supplemental-metadata.json",
                "IMG_0001.jpg.supplemental-metadata(1).json",
            ],
        ));
        assert_eq!(out.pairings.len(), 2);
        let mut seen: Vec<&str> = out
            .pairings
            .iter()
            .map(|p| p.sidecar.filename.as_str())
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 2, "a sidecar was paired twice");
    }

    #[test]
    fn test_collision_pool_exhaustion() {
        // NFD and NFC spellings of the same name are distinct files on disk
        // but canonicalize to the same base, so both media files see the one
        // sidecar as a candidate. The first (lexicographic) claims it; the
        // second must come out unmatched, never double-paired.
        let nfd = "cafe\u{301}.jpg";
        let nfc = "caf\u{e9}.jpg";
        let out = resolve_directory(entries(
            &[nfd, nfc],
            &["caf\u{e9}.jpg.supplemental-metadata.json"],
        ));
        assert_eq!(out.pairings.len(), 1);
        assert_eq!(out.unmatched.len(), 1);
        assert!(out.leftover_sidecars.is_empty());
    }

    #[test]
    fn test_true_ambiguity_not_guessed() {
        // Two sidecars at the same truncation priority for one media file.
        let out = resolve_directory(entries(
            &["IMG_0001.jpg"],
            &["IMG_0001.jpg.su.json", "IMG_0001.jpg.SU.json"],
        ));
        assert!(out.pairings.is_empty());
        assert_eq!(out.ambiguous.len(), 1);
        assert_eq!(out.ambiguous[0].candidates.len(), 2);
        // Ambiguity consumes nothing.
        assert_eq!(out.leftover_sidecars.len(), 2);
    }

    #[test]
    fn test_priority_tiebreak_is_not_ambiguity() {
        // Exact and truncated candidates: exact wins, no ambiguity.
        let out = resolve_directory(entries(
            &["IMG_0001.jpg"],
            &[
                "IMG_0001.jpg.supplemental-metadata.json",
                "IMG_0001.jpg.su.json",
            ],
        ));
        assert_eq!(out.pairings.len(), 1);
        assert_eq!(
            out.pairings[0].sidecar.filename,
            "IMG_0001.jpg.supplemental-metadata.json"
        );
        assert!(out.ambiguous.is_empty());
        assert_eq!(out.leftover_sidecars.len(), 1);
    }
}
