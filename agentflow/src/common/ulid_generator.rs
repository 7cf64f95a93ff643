//! Monotonic ULID generation for run identifiers
//!
//! `Ulid::new()` does not order ids created within the same millisecond, so run
//! ids come from one shared monotonic generator instead.

use std::sync::{Mutex, OnceLock};
use ulid::{Generator, Ulid};

static ULID_GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

/// Generate a ULID strictly greater than every id generated before it
///
/// Falls back to a fresh random ULID if the generator overflows its random
/// component within a single millisecond.
pub fn generate_monotonic_ulid() -> Ulid {
    let generator = ULID_GENERATOR.get_or_init(|| Mutex::new(Generator::new()));
    let mut guard = match generator.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.generate().unwrap_or_else(|_| Ulid::new())
}
