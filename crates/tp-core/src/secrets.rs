//! Secret-lifecycle wrapper (spec §3.5, §9 "Secrets lifecycle").
//!
//! `jaasConfig` and vault response bodies must never be copied into logs,
//! metrics, or structured diagnostics. `Redacted<T>` is the single type
//! through which that material flows so the redaction is structural, not a
//! matter of every call site remembering to be careful.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Wraps a secret value of type `T`. `Debug` and `Display` always print a
/// placeholder; the only way to read the inner value is `expose()`, which
/// is grep-able and therefore auditable. Dropping a `Redacted<T>` zeroizes
/// the inner bytes when `T: Zeroize` (true for `String`).
#[derive(Clone, Serialize, Deserialize)]
pub struct Redacted<T: Zeroize>(T);

impl<T: Zeroize> Redacted<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Explicit, auditable access to the secret. Callers must not pass the
    /// result into a logging, metrics, or general-purpose serialization
    /// call — only into the transport layer that actually needs it.
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { std::ptr::read(&this.0) }
    }
}

impl<T: Zeroize> std::fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Redacted(..)")
    }
}

impl<T: Zeroize> std::fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T: Zeroize> Drop for Redacted<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// `PartialEq` is intentionally implemented (tests need to assert on secret
// content) but never derives `Hash`/`Ord` — those would encourage using a
// secret as a map key, which tends to leak it into debug output elsewhere.
impl<T: Zeroize + PartialEq> PartialEq for Redacted<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
