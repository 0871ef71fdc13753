//! Cookie Builder: serializes the session descriptor, seals it to the
//! relay's public key, optionally obfuscates it, and produces the final
//! `Cookie` header value.

use base64::Engine;
use serde::Serialize;

use crate::config::MeekConfig;
use crate::crypto::{random_cookie_letter, seal_descriptor};
use crate::error::{MeekError, MeekResult};
use crate::obfuscator::StreamObfuscator;

#[derive(Serialize)]
struct Descriptor<'a> {
    v: u32,
    s: &'a str,
    p: &'a str,
}

/// Computes the `Cookie` header value for one session. Called exactly
/// once per Session Loop; the result is reused verbatim for every request
/// of that session.
pub fn make_cookie(config: &MeekConfig) -> MeekResult<String> {
    let descriptor = Descriptor {
        v: 1,
        s: &config.session_id,
        p: &config.target_address,
    };
    let descriptor_bytes = serde_json::to_vec(&descriptor)
        .map_err(|e| MeekError::Cookie(format!("descriptor serialization failed: {e}")))?;

    let recipient_public_key = config.recipient_public_key()?;
    let sealed = seal_descriptor(&recipient_public_key, &descriptor_bytes)?;
    let mut encrypted_payload = sealed.into_bytes();

    let blob = match &config.obfuscation_keyword {
        Some(keyword) => {
            let obfuscator = StreamObfuscator::new(keyword);
            let seed_message = obfuscator.obfuscate(&mut encrypted_payload);
            let mut out = Vec::with_capacity(seed_message.len() + encrypted_payload.len());
            out.extend_from_slice(&seed_message);
            out.extend_from_slice(&encrypted_payload);
            out
        }
        None => encrypted_payload,
    };

    let encoded = base64::engine::general_purpose::STANDARD.encode(blob);
    let letter = random_cookie_letter();
    Ok(format!("{letter}={encoded}"))
}
