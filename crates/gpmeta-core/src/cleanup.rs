use std::fs;

use tracing::{debug, warn};

use crate::resolve::Pairing;
use crate::verify::VerifyOutcome;

/// Per-sidecar cleanup outcome. Retention reasons are always reported,
/// never silently swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Deleted,
    Retained(String),
}

/// Delete a pairing's sidecar, gated on verification.
///
/// The sidecar is removed only when its media file verified, or when
/// verification is explicitly waived (dangerous: bypasses the safety
/// invariant). Media files are never deleted here, and sidecars without a
/// committed pairing never reach this function.
pub fn cleanup_sidecar(
    pairing: &Pairing,
    verify: Option<&VerifyOutcome>,
    waive_verification: bool,
) -> CleanupOutcome {
    if !waive_verification {
        match verify {
            Some(VerifyOutcome::Verified) => {}
            Some(VerifyOutcome::Mismatch { field, .. }) => {
                return CleanupOutcome::Retained(format!(
                    "verification mismatch on {field}"
                ));
            }
            Some(VerifyOutcome::Unverifiable(reason)) => {
                return CleanupOutcome::Retained(format!("unverifiable: {reason}"));
            }
            None => {
                return CleanupOutcome::Retained(
                    "verification was not performed".to_string(),
                );
            }
        }
    }

    match fs::remove_file(&pairing.sidecar.path) {
        Ok(()) => {
            debug!(sidecar = %pairing.sidecar.path.display(), "deleted sidecar");
            CleanupOutcome::Deleted
        }
        Err(e) => {
            warn!(sidecar = %pairing.sidecar.path.display(), error = %e, "delete failed");
            CleanupOutcome::Retained(format!("delete failed: {e}"))
        }
    }
}
