//! # Session Acceptor
//!
//! Binds the listening endpoint and hands every accepted channel to its own
//! [`Session`] task. The acceptor keeps no per-session state.

use std::future::Future;
use std::net::SocketAddr;

use tracing::{error, info, warn};

use crate::error::ProtocolResult;
use crate::session::{Session, SessionState};
use crate::transport::{Transport, TransportListener};

/// Listening side of the protocol
pub struct Server {
    listener: TransportListener,
}

impl Server {
    /// Bind to an address
    pub async fn bind(addr: SocketAddr) -> ProtocolResult<Self> {
        let listener = TransportListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr());
        Ok(Self { listener })
    }

    /// Get the local address
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept connections forever
    pub async fn run(self) {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((transport, peer)) => {
                        info!("Connection from {}", peer);
                        tokio::spawn(serve(transport, peer));
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                _ = &mut shutdown => {
                    info!("Listener on {} shutting down", self.local_addr());
                    break;
                }
            }
        }
    }
}

async fn serve(transport: Transport, peer: SocketAddr) {
    let mut session = Session::new(transport);
    let state = session.run().await.clone();

    if state == SessionState::Stalled {
        warn!("[{}] Session stalled on a malformed frame", peer);
    }

    let client_id = session.client_id().to_string();
    let transport = session.into_inner();
    info!(
        "[{}] {} finished in {:?}: sent={} bytes, recv={} bytes",
        peer,
        client_id,
        state,
        transport.bytes_sent(),
        transport.bytes_received()
    );
}
