//! meek-client: tunnels one TCP byte stream per accepted local connection
//! through repeated short HTTP(S) POST exchanges to a relay, optionally
//! behind a domain-fronting CDN.
//!
//! [`client::MeekClient`] is the library's entry point. Everything it
//! needs from the host platform — socket protection, DNS resolution,
//! diagnostic output — is injected as a trait object (see [`transport`]
//! and [`logging`]), so this crate itself never touches a VPN routing
//! table or a global log stream.

pub mod acceptor;
pub mod client;
pub mod config;
pub mod cookie;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod obfuscator;
pub mod session;
pub mod transport;

pub use client::MeekClient;
pub use config::{MeekConfig, MeekMode, RelayTarget};
pub use error::{MeekError, MeekResult};
