use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Ordered truncation forms of the sidecar suffix, best match first.
/// Google limits the combined sidecar filename length on export and cuts the
/// `supplemental-metadata` token at an arbitrary point, so every prefix of it
/// is a known form. The bare `.json` form covers pre-2024 exports.
/// Priority of a form is its index in this table; new forms are additive.
pub const SIDECAR_SUFFIXES: &[&str] = &[
    ".supplemental-metadata.json",
    ".supplemental-metadat.json",
    ".supplemental-metada.json",
    ".supplemental-metad.json",
    ".supplemental-meta.json",
    ".supplemental-met.json",
    ".supplemental-me.json",
    ".supplemental-m.json",
    ".supplemental-.json",
    ".supplemental.json",
    ".supplementa.json",
    ".supplement.json",
    ".supplemen.json",
    ".suppleme.json",
    ".supplem.json",
    ".supple.json",
    ".suppl.json",
    ".supp.json",
    ".sup.json",
    ".su.json",
    ".s.json",
    ".json",
];

/// Relocated duplicate marker: `(n)` immediately before the final `.json`.
static RELOCATED_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\(\d+\))\.json$").unwrap());

/// Duplicate marker in media position: `(n)` immediately before the extension.
static MEDIA_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\d+\)\.[^.]+$").unwrap());

/// A sidecar filename that could belong to a given media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarCandidate {
    /// Sibling filename exactly as it appears on disk.
    pub name: String,
    /// Index into [`SIDECAR_SUFFIXES`]; 0 is the untruncated form.
    pub priority: usize,
}

/// A sidecar filename decomposed into the media filename it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSidecarName {
    /// Canonical media filename, with any relocated duplicate marker moved
    /// back in front of the media extension.
    pub media_name: String,
    pub priority: usize,
}

/// Decompose a sidecar filename into its canonical media filename and the
/// truncation priority of the suffix it carries.
///
/// Google appends the re-export duplicate marker to the sidecar *suffix*
/// rather than the media base: the sidecar for `IMG_0001(1).jpg` is named
/// `IMG_0001.jpg.supplemental-metadata(1).json`. The marker is moved back in
/// front of the media extension here so both sides compare on the same
/// canonical base.
///
/// The base is matched case-sensitively (after NFC normalization); the
/// suffix and `.json` extension are matched case-insensitively.
pub fn parse_sidecar_name(name: &str) -> Option<ParsedSidecarName> {
    let name: String = name.nfc().collect();

    // Peel off a relocated marker before suffix matching.
    let (stripped, marker) = match RELOCATED_MARKER_RE.captures(&name) {
        Some(caps) => {
            let m = caps.get(1).unwrap();
            let mut s = String::with_capacity(name.len());
            s.push_str(&name[..m.start()]);
            s.push_str(&name[m.end()..]);
            (s, Some(name[m.start()..m.end()].to_string()))
        }
        None => (name.clone(), None),
    };

    for (priority, suffix) in SIDECAR_SUFFIXES.iter().enumerate() {
        let Some(split) = stripped.len().checked_sub(suffix.len()) else {
            continue;
        };
        if !stripped.is_char_boundary(split)
            || !stripped[split..].eq_ignore_ascii_case(suffix)
        {
            continue;
        }
        let base = &stripped[..split];
        if base.is_empty() {
            return None;
        }
        let media_name = match &marker {
            Some(m) => insert_marker(base, m),
            None => base.to_string(),
        };
        return Some(ParsedSidecarName {
            media_name,
            priority,
        });
    }
    None
}

/// Re-insert a duplicate marker in media position: before the extension if
/// the base has one, appended otherwise.
fn insert_marker(base: &str, marker: &str) -> String {
    match base.rfind('.') {
        Some(dot) => format!("{}{}{}", &base[..dot], marker, &base[dot..]),
        None => format!("{}{}", base, marker),
    }
}

/// Compute the candidate sidecars for a media file among its directory
/// siblings, best match first.
///
/// An untruncated `.supplemental-metadata.json` match short-circuits: only
/// priority-0 candidates are returned in that case. Otherwise candidates are
/// ordered by truncation priority (longest surviving suffix first) and by
/// name within a priority tier. An empty result means unmatched.
///
/// Only names are inspected, never file content. Media filenames carrying a
/// duplicate marker only match sidecars carrying the same marker, in either
/// placement, so siblings differing only by marker placement never
/// cross-match.
pub fn candidates(media_name: &str, sibling_names: &[String]) -> Vec<SidecarCandidate> {
    let canonical: String = media_name.nfc().collect();

    let mut found: Vec<SidecarCandidate> = sibling_names
        .iter()
        .filter_map(|name| {
            let parsed = parse_sidecar_name(name)?;
            (parsed.media_name == canonical).then(|| SidecarCandidate {
                name: name.clone(),
                priority: parsed.priority,
            })
        })
        .collect();

    found.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

    if found.first().map_or(false, |c| c.priority == 0) {
        found.retain(|c| c.priority == 0);
    }
    found
}

/// Whether a media filename carries a duplicate marker before its extension.
pub fn has_duplicate_marker(media_name: &str) -> bool {
    MEDIA_MARKER_RE.is_match(media_name)
}
