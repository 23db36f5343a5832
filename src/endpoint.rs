//! Null remote-access endpoint.
//!
//! The daemons are addressed over TCP by an external control system, but
//! this build carries no protocol adapter. [`NullEndpoint`] still claims
//! the port at startup, which keeps port collisions a fatal, immediate
//! error instead of a silent conflict later, and then accepts and drains
//! connections so a probing client sees the daemon as alive. Swapping in a
//! real protocol adapter replaces [`NullEndpoint::serve`] only; the poll
//! loop and store are already wired for external writes.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::error::{AppResult, KitError};

/// Placeholder endpoint that owns the daemon's TCP port.
#[derive(Debug)]
pub struct NullEndpoint {
    listener: TcpListener,
}

impl NullEndpoint {
    /// Claim the remote-access port on every interface.
    ///
    /// Failing to bind is fatal for the daemon, surfaced as
    /// [`KitError::EndpointBind`] with the requested port.
    pub async fn bind(port: u16) -> AppResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| KitError::EndpointBind { port, source })?;
        Ok(Self { listener })
    }

    /// The address actually bound; reports the real port when 0 was
    /// requested.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and drain connections until the daemon stops.
    ///
    /// Every connection is logged and dropped without reading; a client
    /// poking the port can never wedge the daemon.
    pub async fn serve(self, mut cancel: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "connection drained, no protocol adapter attached");
                        drop(stream);
                    }
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                    }
                },
                _ = cancel.changed() => break,
            }
        }
    }
}
