//! Keyword-seeded, length-preserving stream obfuscator for the session
//! cookie.
//!
//! The construction is deliberately simple: pad/truncate the keyword to a
//! fixed-size seed key, derive a keystream with HKDF-SHA256 salted by a
//! fresh random seed message, and XOR it into the payload. The relay
//! re-derives the same keystream from the keyword and the transmitted seed
//! message, so no state is shared beyond the keyword itself.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::crypto::random_bytes;

/// Seed key length the keyword is padded/truncated to.
const SEED_KEY_LENGTH: usize = 32;
/// Length of the random seed message prefixed to the obfuscated blob so
/// the relay can re-derive the keystream.
const SEED_MESSAGE_LENGTH: usize = 16;

pub struct StreamObfuscator {
    seed_key: [u8; SEED_KEY_LENGTH],
}

impl StreamObfuscator {
    /// Builds an obfuscator from the configured keyword.
    pub fn new(keyword: &str) -> Self {
        let mut seed_key = [0u8; SEED_KEY_LENGTH];
        let bytes = keyword.as_bytes();
        let n = bytes.len().min(SEED_KEY_LENGTH);
        seed_key[..n].copy_from_slice(&bytes[..n]);
        Self { seed_key }
    }

    /// Obfuscates `payload` in place, returning the random seed message
    /// that must be prefixed to the transmitted blob so the relay can
    /// recover the keystream.
    pub fn obfuscate(&self, payload: &mut [u8]) -> [u8; SEED_MESSAGE_LENGTH] {
        let seed_message: [u8; SEED_MESSAGE_LENGTH] = random_bytes(SEED_MESSAGE_LENGTH)
            .try_into()
            .expect("random_bytes returns the requested length");
        let keystream = self.derive_keystream(&seed_message, payload.len());
        for (b, k) in payload.iter_mut().zip(keystream.iter()) {
            *b ^= k;
        }
        seed_message
    }

    /// Reverses `obfuscate` given the seed message the sender transmitted.
    /// XOR is its own inverse, so this is the same operation.
    pub fn deobfuscate(&self, seed_message: &[u8; SEED_MESSAGE_LENGTH], payload: &mut [u8]) {
        let keystream = self.derive_keystream(seed_message, payload.len());
        for (b, k) in payload.iter_mut().zip(keystream.iter()) {
            *b ^= k;
        }
    }

    fn derive_keystream(&self, seed_message: &[u8; SEED_MESSAGE_LENGTH], len: usize) -> Vec<u8> {
        let hk = Hkdf::<Sha256>::new(Some(seed_message), &self.seed_key);
        let mut keystream = vec![0u8; len];
        hk.expand(b"meek-stream-obfuscator", &mut keystream)
            .expect("len is far below HKDF-SHA256's 255*32 byte limit");
        keystream
    }
}

pub const SEED_MESSAGE_LEN: usize = SEED_MESSAGE_LENGTH;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_length_and_differs_from_plaintext() {
        let obf = StreamObfuscator::new("correct horse battery staple");
        let original = b"hello relay, this is the payload".to_vec();
        let mut payload = original.clone();

        let seed = obf.obfuscate(&mut payload);
        assert_eq!(payload.len(), original.len());
        assert_ne!(payload, original);

        obf.deobfuscate(&seed, &mut payload);
        assert_eq!(payload, original);
    }

    #[test]
    fn different_keywords_produce_different_keystreams() {
        let a = StreamObfuscator::new("keyword-a");
        let b = StreamObfuscator::new("keyword-b");
        let seed = [5u8; SEED_MESSAGE_LENGTH];
        let mut pa = vec![0u8; 16];
        let mut pb = vec![0u8; 16];
        let ka = a.derive_keystream(&seed, 16);
        let kb = b.derive_keystream(&seed, 16);
        assert_ne!(ka, kb);
        pa.copy_from_slice(&ka);
        pb.copy_from_slice(&kb);
        assert_ne!(pa, pb);
    }

    #[test]
    fn empty_payload_is_a_no_op() {
        let obf = StreamObfuscator::new("kw");
        let mut payload: Vec<u8> = Vec::new();
        let seed = obf.obfuscate(&mut payload);
        assert!(payload.is_empty());
        obf.deobfuscate(&seed, &mut payload);
        assert!(payload.is_empty());
    }
}
