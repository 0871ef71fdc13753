// Copyright (c) 2024, The QuicFuscate Project Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # Crypto Module
//!
//! Authenticated public-key encryption for the session cookie: a fresh
//! ephemeral X25519 key pair per session, sealed to the relay's known
//! public key with a NaCl-style `crypto_box`, nonce fixed to all-zeros
//! because the sender key is strictly single-use.

use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::config::PUBLIC_KEY_LENGTH;
use crate::error::{MeekError, MeekResult};

/// `ephemeralPublicKey || ciphertext`, concatenated in that order.
pub struct SealedDescriptor {
    pub ephemeral_public_key: [u8; PUBLIC_KEY_LENGTH],
    pub ciphertext: Vec<u8>,
}

impl SealedDescriptor {
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_KEY_LENGTH + self.ciphertext.len());
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&self.ciphertext);
        out
    }
}

/// Seals `descriptor` to `recipient_public_key` with a freshly generated,
/// single-use ephemeral key pair and an all-zero nonce.
pub fn seal_descriptor(
    recipient_public_key: &[u8; PUBLIC_KEY_LENGTH],
    descriptor: &[u8],
) -> MeekResult<SealedDescriptor> {
    let ephemeral_secret = SecretKey::generate(&mut OsRng);
    let ephemeral_public_key = *ephemeral_secret.public_key().as_bytes();

    let recipient = PublicKey::from(*recipient_public_key);
    let sbox = SalsaBox::new(&recipient, &ephemeral_secret);

    // All-zero nonce: safe only because `ephemeral_secret` is used exactly
    // once and then dropped. Never reuse an ephemeral key pair.
    let nonce = crypto_box::Nonce::default();
    let ciphertext = sbox
        .encrypt(&nonce, descriptor)
        .map_err(|e| MeekError::Cookie(format!("box encryption failed: {e}")))?;

    Ok(SealedDescriptor {
        ephemeral_public_key,
        ciphertext,
    })
}

/// Generates cryptographically secure random bytes for obfuscator seeds
/// and similar non-cookie material.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Picks a uniformly random uppercase letter for the cookie name. Uses the
/// fast, non-cryptographic thread RNG: this letter is observable on the
/// wire by design, not a secret.
pub fn random_cookie_letter() -> char {
    let idx = rand::thread_rng().gen_range(0u8..26);
    (b'A' + idx) as char
}
