//! # Session Loop
//!
//! Drives one accepted local TCP stream: computes the session cookie
//! once, then alternates local reads and HTTP POST exchanges until the
//! local stream hits EOF, the relay is unreachable twice in a row, or the
//! session is judged expired.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::{
    MeekConfig, MeekMode, IDLE_POLL_INTERVAL_MS, MAX_PAYLOAD_LENGTH, MAX_POLL_INTERVAL_MS,
    MEEK_SERVER_TIMEOUT_MS, MIN_POLL_INTERVAL_MS, POLL_BACKOFF_FACTOR,
};
use crate::cookie::make_cookie;
use crate::error::{MeekError, MeekResult};
use crate::logging::{EventLog, Sensitivity};
use crate::transport::{with_timeout, HttpTransport};

/// Destination and headers for one session's requests, precomputed from
/// `MeekConfig` so the hot loop doesn't re-derive them every iteration.
struct SessionTarget {
    dial_host: String,
    dial_port: u16,
    use_tls: bool,
    header_host: Option<String>,
    path: String,
}

impl SessionTarget {
    fn from_config(config: &MeekConfig) -> MeekResult<Self> {
        match config.mode {
            MeekMode::Fronted => {
                let domain = config
                    .fronting_domain
                    .clone()
                    .ok_or_else(|| MeekError::Config("fronting_domain missing".into()))?;
                let host = config
                    .fronting_host
                    .clone()
                    .ok_or_else(|| MeekError::Config("fronting_host missing".into()))?;
                Ok(Self {
                    dial_host: domain,
                    dial_port: 443,
                    use_tls: true,
                    header_host: Some(host),
                    path: "/".to_string(),
                })
            }
            MeekMode::Unfronted => {
                let relay = config
                    .relay
                    .clone()
                    .ok_or_else(|| MeekError::Config("relay missing".into()))?;
                Ok(Self {
                    dial_host: relay.host,
                    dial_port: relay.port,
                    use_tls: false,
                    header_host: None,
                    path: "/".to_string(),
                })
            }
        }
    }
}

/// Runs one Session Loop to completion, consuming `local` (the accepted
/// socket). Never returns an error upward beyond logging it: a Session
/// Loop failure tears down only its own socket, leaving the acceptor and
/// every other session unaffected.
pub async fn run(
    config: Arc<MeekConfig>,
    transport: Arc<HttpTransport>,
    mut local: TcpStream,
    log: Arc<dyn EventLog>,
) {
    if let Err(e) = run_inner(&config, &transport, &mut local, &log).await {
        log.log("session.warn", Sensitivity::NotSensitive, &e);
    }
    let _ = local.shutdown().await;
}

async fn run_inner(
    config: &MeekConfig,
    transport: &HttpTransport,
    local: &mut TcpStream,
    log: &Arc<dyn EventLog>,
) -> MeekResult<()> {
    let cookie = make_cookie(config)?;
    let target = SessionTarget::from_config(config)?;

    let mut poll_interval_ms: u64 = MIN_POLL_INTERVAL_MS;
    let mut last_success: Option<Instant> = None;
    let mut payload_buf = vec![0u8; MAX_PAYLOAD_LENGTH];

    loop {
        // a. Read local upstream with timeout.
        let read_started = Instant::now();
        let read_result = tokio::time::timeout(
            Duration::from_millis(poll_interval_ms),
            local.read(&mut payload_buf),
        )
        .await;
        let read_elapsed = read_started.elapsed();

        let payload_length = match read_result {
            Ok(Ok(0)) => {
                // EOF: terminate session cleanly, no further request.
                return Ok(());
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(MeekError::LocalIo(e)),
            Err(_timeout) => 0,
        };

        // b. Sleep-skew detection.
        let skew_threshold = Duration::from_millis(poll_interval_ms) + Duration::from_millis(1000);
        let sleep_skew_detected = read_elapsed > skew_threshold;
        if sleep_skew_detected {
            log.log(
                "session.sleep_skew.warn",
                Sensitivity::NotSensitive,
                &format!("read took {:?}, expected around {:?}", read_elapsed, skew_threshold),
            );
        }

        let session_looks_dead = last_success
            .map(|t| t.elapsed() > Duration::from_millis(2 * MEEK_SERVER_TIMEOUT_MS))
            .unwrap_or(false);

        if sleep_skew_detected && session_looks_dead {
            // Deferred to the check below; don't provoke the relay this
            // iteration.
            continue;
        }

        // c. Pre-request session-death check.
        if session_looks_dead {
            log.log(
                "session.expired",
                Sensitivity::NotSensitive,
                &"no successful exchange for over 2x the server timeout",
            );
            return Err(MeekError::SessionExpired);
        }

        // d. Issue request with one retry.
        let body = payload_buf[..payload_length].to_vec();
        let mut received_data = false;
        let mut succeeded = false;
        let mut last_attempt_err: Option<MeekError> = None;

        for attempt in 0..2 {
            let attempt_result = with_timeout(
                Duration::from_millis(MEEK_SERVER_TIMEOUT_MS),
                transport.post(
                    &target.dial_host,
                    target.dial_port,
                    target.use_tls,
                    target.header_host.as_deref(),
                    &target.path,
                    &cookie,
                    body.clone(),
                ),
            )
            .await;

            match attempt_result {
                Ok(response_body) => {
                    last_success = Some(Instant::now());
                    received_data = !response_body.is_empty();
                    if !response_body.is_empty() {
                        local.write_all(&response_body).await?;
                    }
                    succeeded = true;
                    break;
                }
                Err(e) => {
                    log.log(
                        "session.request.warn",
                        Sensitivity::NotSensitive,
                        &format!("attempt {}: {e}", attempt + 1),
                    );
                    last_attempt_err = Some(e);
                }
            }
        }

        if !succeeded {
            return Err(last_attempt_err.unwrap_or(MeekError::BadStatus(0)));
        }

        // e. Adaptive poll interval.
        let upload_moved = payload_length > 0;
        let download_moved = received_data;
        poll_interval_ms = if upload_moved || download_moved {
            MIN_POLL_INTERVAL_MS
        } else if poll_interval_ms == MIN_POLL_INTERVAL_MS {
            IDLE_POLL_INTERVAL_MS
        } else {
            let next = (poll_interval_ms as f64 * POLL_BACKOFF_FACTOR) as u64;
            next.min(MAX_POLL_INTERVAL_MS)
        };
    }

    // TODO: decouple local reads from HTTP exchanges (split into a reader
    // task and a writer task joined by an mpsc channel) so an in-flight
    // download doesn't stall new uploads; deferred because payload chunks
    // are bounded at 64 KiB and round-trip latency dominates regardless.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayTarget;

    fn unfronted_config() -> MeekConfig {
        use base64::Engine;
        MeekConfig {
            mode: MeekMode::Unfronted,
            session_id: "s".into(),
            target_address: "example.org:443".into(),
            recipient_public_key_b64: base64::engine::general_purpose::STANDARD.encode([1u8; 32]),
            obfuscation_keyword: None,
            fronting_domain: None,
            fronting_host: None,
            relay: Some(RelayTarget {
                host: "127.0.0.1".into(),
                port: 9,
            }),
        }
    }

    #[test]
    fn session_target_unfronted_has_no_header_override() {
        let config = unfronted_config();
        let target = SessionTarget::from_config(&config).unwrap();
        assert!(!target.use_tls);
        assert!(target.header_host.is_none());
        assert_eq!(target.dial_port, 9);
    }

    #[test]
    fn session_target_fronted_splits_sni_and_host() {
        let mut config = unfronted_config();
        config.mode = MeekMode::Fronted;
        config.fronting_domain = Some("front.example.com".into());
        config.fronting_host = Some("relay.example.net".into());
        let target = SessionTarget::from_config(&config).unwrap();
        assert!(target.use_tls);
        assert_eq!(target.dial_host, "front.example.com");
        assert_eq!(target.header_host.as_deref(), Some("relay.example.net"));
        assert_ne!(target.dial_host, target.header_host.unwrap());
    }

    #[test]
    fn poll_interval_transitions_match_the_state_machine() {
        // MIN -> MIN on activity.
        let mut interval = MIN_POLL_INTERVAL_MS;
        let upload_moved = true;
        interval = if upload_moved {
            MIN_POLL_INTERVAL_MS
        } else {
            interval
        };
        assert_eq!(interval, MIN_POLL_INTERVAL_MS);

        // MIN -> IDLE on first idle iteration.
        let mut interval = MIN_POLL_INTERVAL_MS;
        let (upload_moved, download_moved) = (false, false);
        interval = if upload_moved || download_moved {
            MIN_POLL_INTERVAL_MS
        } else if interval == MIN_POLL_INTERVAL_MS {
            IDLE_POLL_INTERVAL_MS
        } else {
            ((interval as f64) * POLL_BACKOFF_FACTOR) as u64
        };
        assert_eq!(interval, IDLE_POLL_INTERVAL_MS);

        // IDLE -> geometric backoff, capped at MAX.
        let mut interval = IDLE_POLL_INTERVAL_MS;
        for _ in 0..20 {
            interval = ((interval as f64) * POLL_BACKOFF_FACTOR) as u64;
            interval = interval.min(MAX_POLL_INTERVAL_MS);
        }
        assert_eq!(interval, MAX_POLL_INTERVAL_MS);
    }
}
