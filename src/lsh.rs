//! Locality-sensitive hashing helpers for minhash signatures.
//!
//! A signature is saturated into bytes and cut into bands of
//! [`BAND_BYTES`] consecutive positions. Each band packs into one `u32`
//! lookup key, and two fingerprints vote for each other once per band
//! whose keys collide. Candidates that collect enough votes are then
//! scored by exact positional agreement over the whole signature.

/// Number of signature bytes packed into one band key.
pub const BAND_BYTES: usize = 4;

/// Saturate each minhash coordinate into a byte.
///
/// Coordinates above `u8::MAX` all collapse to 255, so two signatures
/// that differ only in how far past 255 they go still collide.
pub fn clamp_signature(signature: &[u32]) -> Vec<u8> {
    signature
        .iter()
        .map(|&value| value.min(u32::from(u8::MAX)) as u8)
        .collect()
}

/// Pack the four bytes of band `band` into a single lookup key.
///
/// Bytes are packed most significant first, so keys order the same way
/// the underlying byte quadruples do.
///
/// # Panics
///
/// Panics if the signature is too short to contain band `band`.
#[inline]
pub fn band_key(clamped: &[u8], band: usize) -> u32 {
    let start = band * BAND_BYTES;
    u32::from(clamped[start]) << 24
        | u32::from(clamped[start + 1]) << 16
        | u32::from(clamped[start + 2]) << 8
        | u32::from(clamped[start + 3])
}

/// Count the positions on which two clamped signatures agree.
#[inline]
pub fn similarity(probe: &[u8], stored: &[u8]) -> u32 {
    probe
        .iter()
        .zip(stored)
        .filter(|(a, b)| a == b)
        .count() as u32
}
