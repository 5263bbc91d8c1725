//! Run configuration: the `{profile_name, selection_scope, secret_salt,
//! research_context, detection_options}` input the core consumes.
//!
//! This system never persists a config file to disk: the run is
//! configured entirely from CLI flags plus the two documented
//! environment variables, and the salt itself is never written anywhere
//! ("salt values are never stored"). This module is process-scoped, not
//! a load/save-from-home-directory layer.

use std::path::PathBuf;

use rand::RngCore;
use zeroize::Zeroizing;

use crate::compliance::ResearchContext;
use crate::detection::ZonePolicy;
use crate::error::AppError;
use crate::model::SelectionScope;

/// Name of the environment variable carrying an append-only audit
/// database path. Optional: when absent, the run proceeds without a
/// secondary audit sink.
pub const AUDIT_DB_PATH_VAR: &str = "AUDIT_DB_PATH";

/// Name of the environment variable carrying the de-identification salt
/// as raw bytes (UTF-8). When absent, `RunConfig::resolve_salt` mints a
/// fresh per-run salt and records only an opaque `deterministic_salt_id`,
/// never the salt value itself.
pub const ANONYMIZATION_SALT_VAR: &str = "ANONYMIZATION_SALT";

/// Detector tuning passed through to the injected `detection::Adapter`.
#[derive(Debug, Clone)]
pub struct DetectionOptions {
    pub zone_policy: ZonePolicy,
    /// Whether a configured detector is required for preflight to pass.
    /// When `false` (the default), a missing/unavailable detector is a
    /// logged warning and the Review Session falls back to operator-only
    /// regions.
    pub required: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        DetectionOptions {
            zone_policy: ZonePolicy::HeaderFooterOnly,
            required: false,
        }
    }
}

/// The secret salt bytes, held in a zeroizing buffer so the process
/// image doesn't carry a lingering plaintext copy longer than necessary.
/// This is the one piece of `RunConfig` that must never be serialized
/// into the evidence bundle or logged.
pub struct Salt(Zeroizing<Vec<u8>>);

impl Salt {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Salt(Zeroizing::new(bytes))
    }

    /// Mint a fresh 32-byte random salt for a run that supplied none.
    pub fn mint() -> Self {
        let mut bytes = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Salt(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// An opaque, non-reversible reference to this salt suitable for
    /// recording in `instance_linkage.csv` as `deterministic_salt_id` —
    /// never the salt itself.
    pub fn opaque_id(&self) -> String {
        crate::identity::hash_bytes(self.as_bytes())[..16].to_string()
    }
}

pub struct RunConfig {
    pub input_path: PathBuf,
    pub output_root: PathBuf,
    pub profile_name: String,
    pub selection_scope: SelectionScope,
    pub salt: Salt,
    pub research_context: ResearchContext,
    pub detection_options: DetectionOptions,
    pub audit_db_path: Option<PathBuf>,
}

impl RunConfig {
    /// Resolve the salt from `ANONYMIZATION_SALT` if present, otherwise
    /// mint a fresh per-run salt. Either way the value itself is never
    /// logged or written; only `Salt::opaque_id()` ever reaches disk.
    pub fn resolve_salt() -> Salt {
        match std::env::var(ANONYMIZATION_SALT_VAR) {
            Ok(value) if !value.is_empty() => Salt::from_bytes(value.into_bytes()),
            _ => Salt::mint(),
        }
    }

    pub fn resolve_audit_db_path() -> Option<PathBuf> {
        std::env::var(AUDIT_DB_PATH_VAR).ok().map(PathBuf::from)
    }

    /// Validate the profile name against the closed registry without
    /// yet resolving it (preflight wants to fail fast on an unknown name
    /// before any input is read).
    pub fn validate_profile(&self) -> Result<(), AppError> {
        crate::compliance::profiles::resolve(&self.profile_name).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_opaque_id_does_not_leak_the_salt_bytes() {
        let salt = Salt::from_bytes(b"super-secret-salt".to_vec());
        let id = salt.opaque_id();
        assert!(!id.contains("super-secret-salt"));
        assert_eq!(id.len(), 16);
    }

    #[test]
    fn minted_salts_are_not_all_identical() {
        let a = Salt::mint();
        let b = Salt::mint();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
