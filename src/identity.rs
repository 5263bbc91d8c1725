//! Deterministic hashing, HMAC key derivation, and run-id minting.
//!
//! Nothing here holds state; every function is a pure transform of its
//! inputs, which is what lets the rest of the pipeline treat identity
//! operations as safe to call from any worker thread.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 digest of `bytes`, as a lowercase hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// HMAC-SHA-256 of `msg` under `key`, as a lowercase hex string.
///
/// Identifier re-mapping must always go through HMAC rather than a raw
/// hash: a raw hash of a UID is a deterministic, un-keyed function of
/// public information and can be correlated by anyone who also observes
/// the UID; HMAC requires the secret.
pub fn hmac(key: &[u8], msg: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts key of any length");
    mac.update(msg);
    hex::encode(mac.finalize().into_bytes())
}

/// Derive a stable replacement identifier for `uid` under `secret`.
///
/// For a fixed `(secret, uid)` pair this is byte-identical across
/// processes and operating systems, which is what lets
/// `instance_linkage.csv` be independently recomputed by an auditor who
/// holds the secret.
pub fn derive_uid_key(secret: &[u8], uid: &str) -> String {
    hmac(secret, uid.as_bytes())
}

/// Derive a replacement value that is itself a well-formed DICOM UID
/// (digits and periods only, <=64 chars), for remapping UID-VR tags
/// (`StudyInstanceUID`, `SeriesInstanceUID`, `SOPInstanceUID`).
///
/// `derive_uid_key`'s hex output is not valid in a `UI`-VR element (DICOM
/// UIDs may only contain digits and periods); this instead follows the
/// DICOM PS3.5 Annex B convention for UUID-derived UIDs, rooting the
/// value under `2.25.` followed by the HMAC digest's leading 128 bits
/// read as a decimal integer.
pub fn derive_uid(secret: &[u8], uid: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts key of any length");
    mac.update(uid.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    let n = u128::from_be_bytes(bytes);
    format!("2.25.{n}")
}

/// Mint a short, collision-resistant token identifying one run.
///
/// Format: `<hex-seconds-since-epoch>-<8 hex chars of randomness>`. The
/// timestamp component keeps runs lexically sortable by creation order;
/// the random suffix is what keeps concurrent runs on the same host from
/// racing onto the same directory name. `run::RunController::open_run`
/// is responsible for retrying this on an `AlreadyExists` collision.
pub fn mint_run_id(now: chrono::DateTime<chrono::Utc>) -> String {
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("{:x}-{}", now.timestamp(), hex::encode(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_is_deterministic() {
        assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn hmac_requires_the_key() {
        let a = hmac(b"secret-a", b"1.2.840.10008.5.1.4.1.1.2");
        let b = hmac(b"secret-b", b"1.2.840.10008.5.1.4.1.1.2");
        assert_ne!(a, b, "different keys must not collide");
    }

    #[test]
    fn derive_uid_key_is_stable_across_calls() {
        let secret = b"fixed-secret";
        let uid = "1.2.840.10008.5.1.4.1.1.2.99";
        assert_eq!(derive_uid_key(secret, uid), derive_uid_key(secret, uid));
    }

    #[test]
    fn mint_run_id_does_not_collide_across_two_mints() {
        let now = chrono::Utc::now();
        let a = mint_run_id(now);
        let b = mint_run_id(now);
        assert_ne!(a, b);
    }
}
