//! Murmur relay server library.
//!
//! The binary in `main.rs` is a thin wrapper around [`serve`]; keeping the
//! accept loop here lets the integration suite run the real server on an
//! ephemeral port.

pub mod handler;
pub mod state;

use std::sync::Arc;

use tokio::net::TcpListener;

use state::{Registry, ServerConfig};

/// Accept connections forever, spawning one handler task per socket.
///
/// The registry is the only state shared across connections; it is cloned
/// into every handler (shared `Arc` underneath). A connection-scoped error
/// never escapes its handler task, so the accept loop cannot be taken down
/// by one misbehaving peer.
pub async fn serve(listener: TcpListener, config: ServerConfig, registry: Registry) {
    let config = Arc::new(config);
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!(peer = %addr, "accepted connection");
                let registry = registry.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    handler::handle_connection(stream, registry, config).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
            }
        }
    }
}
