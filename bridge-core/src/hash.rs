//! Secret generation and hash-lock computation.
//!
//! The spec's Open Question on which hash function to use is resolved here:
//! SHA-256 is used on both chains (see DESIGN.md). Comparisons against an
//! observed lock use a constant-time equality check since a hash lock is
//! effectively a commitment that must not be distinguishable via timing.

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// A 32-byte secret (preimage), generated server-side at swap initiation.
pub type Secret = [u8; 32];

/// A 32-byte SHA-256 hash lock.
pub type HashLock = [u8; 32];

/// Generate a cryptographically strong random secret.
pub fn generate_secret() -> Secret {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Compute the hash lock for a secret: `H(secret) = SHA256(secret)`.
pub fn hash_lock(secret: &Secret) -> HashLock {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Constant-time check that `secret` hashes to `expected_lock`.
pub fn verify_preimage(secret: &Secret, expected_lock: &HashLock) -> bool {
    let computed = hash_lock(secret);
    computed.ct_eq(expected_lock).into()
}

/// Constant-time equality between two hash locks (e.g. comparing an
/// observed on-chain lock against `swap.secret_hash`).
pub fn locks_equal(a: &HashLock, b: &HashLock) -> bool {
    a.ct_eq(b).into()
}
