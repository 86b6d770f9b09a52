//! Murmur Relay Server
//!
//! Terminal group chat relay:
//!
//! 1. **Per-connection key exchange**: each client sends its RSA public
//!    key; the relay generates a fresh 256-bit session secret and returns
//!    it wrapped under that key.
//!
//! 2. **Optional password auth**: with `--password` set, sessions must
//!    present the password (sealed under their session secret) before any
//!    chat is relayed.
//!
//! 3. **Re-encrypting relay**: inbound chat is unsealed with the sender's
//!    secret and independently re-sealed for every other authenticated
//!    member under that member's own secret.
//!
//! The relay is a trusted intermediary: it observes plaintext in memory
//! between unseal and re-seal. Secrets live only as long as their
//! connection and are zeroized at teardown.

use clap::Parser;
use tokio::net::TcpListener;

use murmur_relay::state::{Registry, ServerConfig, DEFAULT_PORT};
use murmur_relay::serve;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "murmur-relay", version, about = "Murmur encrypted group chat relay")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "MURMUR_PORT")]
    port: u16,

    /// Room password; when set, clients must authenticate before chatting
    #[arg(long, env = "MURMUR_PASSWORD")]
    password: Option<String>,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur_relay=info,murmur_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        port: args.port,
        password: args.password,
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(
                addr = addr.as_str(),
                error = %e,
                "refusing to start: could not bind listening port"
            );
            std::process::exit(1);
        }
    };

    tracing::info!(
        addr = addr.as_str(),
        password_protected = config.password.is_some(),
        "murmur relay listening"
    );

    serve(listener, config, Registry::new()).await;
}
