use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use tokio::{io, net::TcpListener, sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::handler::handle_link;
use super::{EdgeData, EdgeReceiver};
use crate::link::StreamLink;
use crate::state::HostState;

/// Accepts device connections on a TCP listener, one handler task per
/// connection.
pub struct TcpEdgeReceiver {
    addr: SocketAddr,
    state: HostState,
}

impl TcpEdgeReceiver {
    pub fn new(addr: SocketAddr, state: HostState) -> Self {
        Self { addr, state }
    }
}

#[async_trait]
impl EdgeReceiver for TcpEdgeReceiver {
    type Error = io::Error;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<EdgeData>, Self::Error> {
        let (tx, rx) = mpsc::channel(100);
        let addr = self.addr;

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "TCP edge receiver started");

        tokio::spawn(run_server_loop(listener, tx, cancel, self.state.clone()));

        Ok(rx)
    }
}

#[instrument(name = "tcp_server_loop", skip_all)]
async fn run_server_loop(
    listener: TcpListener,
    tx: mpsc::Sender<EdgeData>,
    cancel: CancellationToken,
    state: HostState,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Closing TCP edge receiver server");
                break;
            }
            client = listener.accept() => {
                match client {
                    Ok((stream, addr)) => {
                        info!(%addr, "Client connected");

                        if let Err(e) = stream.set_nodelay(true) {
                            error!(error = %e, %addr, "Failed to disable Nagle");
                        }

                        let link = StreamLink::new(stream);
                        let tx = tx.clone();
                        let cancel = cancel.clone();
                        let state = state.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_link(link, addr.to_string(), tx, cancel, state).await {
                                error!(error = %e, %addr, "Connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        if is_transient_error(&e) {
                            sleep(Duration::from_millis(100)).await;
                        } else {
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn is_transient_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionRefused | ConnectionAborted | ConnectionReset | OutOfMemory | Other
    )
}
