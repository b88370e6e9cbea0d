//! Bridge startup options

use std::net::SocketAddr;

use clap::Parser;

/// Runtime configuration for the UIDeck bridge.
#[derive(Debug, Clone, Parser)]
#[command(name = "uideck-server", about = "UI control bridge for tool-using agents")]
pub struct Config {
    /// Shared secret UI clients present in `ui.hello`.
    #[arg(long, env = "UIDECK_TOKEN", default_value = "")]
    pub token: String,

    /// Reject UI clients whose hello token does not match `--token`.
    #[arg(long, env = "UIDECK_REQUIRE_TOKEN")]
    pub require_token: bool,

    /// Only accept UI connections from loopback with a localhost Host header.
    #[arg(long, env = "UIDECK_LOCAL_ONLY")]
    pub local_only: bool,

    /// Explicit allow-list for the websocket Origin header.
    /// When empty, only empty or loopback origins are accepted.
    #[arg(
        long = "allowed-origin",
        env = "UIDECK_ALLOWED_ORIGINS",
        value_delimiter = ','
    )]
    pub allowed_origins: Vec<String>,

    /// Return tool results as structured objects instead of JSON text.
    #[arg(long, env = "UIDECK_USE_DATA")]
    pub use_data: bool,

    /// Listen address.
    #[arg(long, env = "UIDECK_BIND", default_value = "127.0.0.1:4400")]
    pub bind: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            require_token: false,
            local_only: false,
            allowed_origins: Vec::new(),
            use_data: false,
            bind: SocketAddr::from(([127, 0, 0, 1], 4400)),
        }
    }
}

impl Config {
    /// Startup-time validation; token policy violations are fatal here rather
    /// than on every hello.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.require_token && self.token.trim().is_empty() {
            anyhow::bail!("--require-token is set but --token is empty");
        }
        Ok(())
    }
}
