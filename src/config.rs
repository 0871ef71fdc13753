//! Typed, validated construction parameters for a [`crate::client::MeekClient`].
//!
//! Plain structs built by the caller (optionally parsed from TOML for the
//! CLI binary), validated once with an explicit `validate()` call rather
//! than scattered `assert!`s.

use serde::Deserialize;

use crate::error::{MeekError, MeekResult};

/// Size of the NaCl `crypto_box` recipient/ephemeral public keys.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Upper bound on a single request/response body, per spec.
pub const MAX_PAYLOAD_LENGTH: usize = 65536;

/// Per-request timeout, also used to derive the session-expiry threshold.
pub const MEEK_SERVER_TIMEOUT_MS: u64 = 20_000;

pub const MIN_POLL_INTERVAL_MS: u64 = 1;
pub const IDLE_POLL_INTERVAL_MS: u64 = 100;
pub const MAX_POLL_INTERVAL_MS: u64 = 5_000;
pub const POLL_BACKOFF_FACTOR: f64 = 1.5;

/// Whether requests go straight to the relay or are routed through a
/// domain-fronting CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeekMode {
    Fronted,
    Unfronted,
}

/// Where an unfronted session connects, or where a fronted session's TLS
/// SNI/URL/DNS target point.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayTarget {
    pub host: String,
    pub port: u16,
}

/// Construction parameters for one [`crate::client::MeekClient`].
///
/// Immutable after construction; the lifecycle state that changes at
/// runtime (listener, accepted sockets, ...) lives in `MeekClient` itself,
/// guarded by its own mutex.
#[derive(Debug, Clone, Deserialize)]
pub struct MeekConfig {
    pub mode: MeekMode,
    pub session_id: String,
    pub target_address: String,

    /// Base64-encoded 32-byte recipient public key for the cookie's
    /// authenticated encryption step.
    pub recipient_public_key_b64: String,

    /// Keyword seeding the optional stream obfuscator. `None` disables it.
    #[serde(default)]
    pub obfuscation_keyword: Option<String>,

    /// Required when `mode == Fronted`: the outer TLS SNI / DNS / URL host.
    #[serde(default)]
    pub fronting_domain: Option<String>,
    /// Required when `mode == Fronted`: the inner `Host` header naming the
    /// real relay behind the front.
    #[serde(default)]
    pub fronting_host: Option<String>,

    /// Required when `mode == Unfronted`: the relay dialed directly.
    #[serde(default)]
    pub relay: Option<RelayTarget>,
}

impl MeekConfig {
    /// Parses a 32-byte public key out of `recipient_public_key_b64`.
    pub fn recipient_public_key(&self) -> MeekResult<[u8; PUBLIC_KEY_LENGTH]> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.recipient_public_key_b64)
            .map_err(|e| MeekError::Config(format!("recipient_public_key_b64: {e}")))?;
        <[u8; PUBLIC_KEY_LENGTH]>::try_from(bytes.as_slice())
            .map_err(|_| MeekError::Config("recipient public key must be 32 bytes".into()))
    }

    /// Validates cross-field invariants that the type system alone can't
    /// express (which fields are required depends on `mode`).
    pub fn validate(&self) -> MeekResult<()> {
        if self.session_id.is_empty() {
            return Err(MeekError::Config("session_id must not be empty".into()));
        }
        if self.target_address.is_empty() {
            return Err(MeekError::Config("target_address must not be empty".into()));
        }
        self.recipient_public_key()?;

        match self.mode {
            MeekMode::Fronted => {
                if self.fronting_domain.as_deref().unwrap_or("").is_empty() {
                    return Err(MeekError::Config(
                        "fronting_domain is required in fronted mode".into(),
                    ));
                }
                if self.fronting_host.as_deref().unwrap_or("").is_empty() {
                    return Err(MeekError::Config(
                        "fronting_host is required in fronted mode".into(),
                    ));
                }
            }
            MeekMode::Unfronted => {
                if self.relay.is_none() {
                    return Err(MeekError::Config(
                        "relay host/port is required in unfronted mode".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The session URL: fronted requests target the front's own `https://`
    /// origin; unfronted requests speak plain HTTP directly to the relay.
    pub fn session_url(&self) -> MeekResult<url::Url> {
        let raw = match self.mode {
            MeekMode::Fronted => {
                let domain = self
                    .fronting_domain
                    .as_deref()
                    .ok_or_else(|| MeekError::Config("fronting_domain missing".into()))?;
                format!("https://{domain}/")
            }
            MeekMode::Unfronted => {
                let relay = self
                    .relay
                    .as_ref()
                    .ok_or_else(|| MeekError::Config("relay missing".into()))?;
                format!("http://{}:{}/", relay.host, relay.port)
            }
        };
        url::Url::parse(&raw).map_err(|e| MeekError::Config(format!("invalid session url: {e}")))
    }

    /// Loads and validates a config from a TOML string (used by the CLI
    /// binary; the library surface never reads files itself).
    pub fn from_toml(s: &str) -> MeekResult<Self> {
        let cfg: Self = toml::from_str(s).map_err(|e| MeekError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        let key = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [7u8; 32]);
        format!(
            r#"
            mode = "unfronted"
            session_id = "abc123"
            target_address = "example.org:443"
            recipient_public_key_b64 = "{key}"

            [relay]
            host = "127.0.0.1"
            port = 8080
            "#
        )
    }

    #[test]
    fn unfronted_round_trip() {
        let cfg = MeekConfig::from_toml(&base_toml()).expect("valid config");
        assert_eq!(cfg.mode, MeekMode::Unfronted);
        let url = cfg.session_url().unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn fronted_requires_domain_and_host() {
        let key = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [1u8; 32]);
        let toml = format!(
            r#"
            mode = "fronted"
            session_id = "s"
            target_address = "t:1"
            recipient_public_key_b64 = "{key}"
            "#
        );
        let err = MeekConfig::from_toml(&toml).unwrap_err();
        assert!(matches!(err, MeekError::Config(_)));
    }

    #[test]
    fn bad_key_length_rejected() {
        let toml = r#"
            mode = "unfronted"
            session_id = "s"
            target_address = "t:1"
            recipient_public_key_b64 = "AAAA"

            [relay]
            host = "h"
            port = 1
            "#;
        let err = MeekConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, MeekError::Config(_)));
    }
}
