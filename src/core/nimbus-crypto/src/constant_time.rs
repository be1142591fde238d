//! Constant-time comparison.

use subtle::ConstantTimeEq;

/// Compares two byte slices without data-dependent early exit.
///
/// Slices of different lengths compare unequal; only the length itself is
/// observable through timing.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
