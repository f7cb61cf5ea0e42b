//! LFSR keystream generation and the XOR stream transform for KDB payloads.
//!
//! Keystream: 32-bit state, 8 shift steps per output byte. Each step shifts
//! the state right by one; a set low bit folds [`FEEDBACK`] into the shifted
//! state. The low byte after each 8-step group is the next keystream byte,
//! and the state carries across byte boundaries.
//!
//! Transform: plain XOR against the keystream. Encryption and decryption are
//! the same operation.

use thiserror::Error;

/// Feedback constant folded into the LFSR state whenever the low bit is set.
pub const FEEDBACK: u32 = 0x8765_4321;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Data length {data} does not match keystream length {keystream}")]
    LengthMismatch { data: usize, keystream: usize },
}

/// Generate `len` keystream bytes from `seed`.
///
/// Pure and deterministic: the same `(len, seed)` always yields the same
/// bytes. `len == 0` yields an empty vector.
pub fn keystream(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        for _ in 0..8 {
            state = if state & 1 == 0 {
                state >> 1
            } else {
                (state >> 1) ^ FEEDBACK
            };
        }
        out.push(state as u8);
    }
    out
}

/// XOR `data` against a caller-supplied keystream of identical length.
///
/// A length mismatch is a caller bug and surfaces as
/// [`CryptoError::LengthMismatch`] rather than silent truncation.
pub fn xor_keystream(data: &[u8], keystream: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() != keystream.len() {
        return Err(CryptoError::LengthMismatch {
            data: data.len(),
            keystream: keystream.len(),
        });
    }
    Ok(data.iter().zip(keystream).map(|(d, k)| d ^ k).collect())
}

/// Encrypt or decrypt `data` with a keystream grown from `seed`.
///
/// The keystream is generated at exactly `data.len()` bytes, so the lengths
/// cannot mismatch. XOR is self-inverse: applying this twice with the same
/// seed returns the original bytes.
pub fn apply(data: &[u8], seed: u32) -> Vec<u8> {
    let ks = keystream(data.len(), seed);
    data.iter().zip(&ks).map(|(d, k)| d ^ k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // First bytes of the keystream for the container seed; pins the LFSR
    // construction so it cannot drift silently.
    const PINNED_4F574154: [u8; 16] = [
        0xDB, 0x5E, 0xA6, 0xC0, 0xE0, 0x12, 0x40, 0xE6,
        0xB5, 0xC4, 0xB3, 0xBC, 0x55, 0x9D, 0xEF, 0x29,
    ];

    #[test]
    fn keystream_pinned_vector() {
        assert_eq!(keystream(16, 0x4F57_4154), PINNED_4F574154);
    }

    #[test]
    fn keystream_state_carries_across_bytes() {
        let long = keystream(16, 0x4F57_4154);
        let short = keystream(4, 0x4F57_4154);
        assert_eq!(&long[..4], &short[..]);
    }

    #[test]
    fn keystream_seed_one() {
        assert_eq!(keystream(8, 1), [0x2C, 0xFA, 0x56, 0xF8, 0x09, 0xDB, 0x3F, 0xA3]);
    }

    #[test]
    fn keystream_zero_len_is_empty() {
        assert!(keystream(0, 0x4F57_4154).is_empty());
    }

    #[test]
    fn zero_seed_degenerates_to_identity() {
        // An all-zero state never sets the low bit, so every keystream byte
        // is zero and the transform is the identity.
        assert_eq!(keystream(8, 0), [0u8; 8]);
        assert_eq!(apply(b"unchanged", 0), b"unchanged");
    }

    #[test]
    fn xor_keystream_rejects_length_mismatch() {
        let err = xor_keystream(&[1, 2, 3], &[0, 0]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::LengthMismatch { data: 3, keystream: 2 }
        ));
    }

    proptest! {
        #[test]
        fn apply_is_an_involution(
            data in prop::collection::vec(any::<u8>(), 0..2048),
            seed in any::<u32>(),
        ) {
            prop_assert_eq!(apply(&apply(&data, seed), seed), data);
        }
    }
}
