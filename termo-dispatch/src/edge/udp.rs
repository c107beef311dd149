use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use termo_core::DeviceId;
use termo_core::protocol::{MAX_FRAME_SIZE, Message, MessageBody};
use tokio::{io, net::UdpSocket, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::handler::{handle_link, resume_link};
use super::{EdgeData, EdgeReceiver};
use crate::link::DatagramLink;
use crate::state::HostState;

/// Receives datagrams on a single socket and demultiplexes them by peer
/// address. Each peer gets its own handler, which ends once the peer has
/// been silent for `idle_timeout`. The device a peer announced in its last
/// hello is remembered, so a peer that resumes after such a pause keeps
/// feeding its session.
pub struct UdpEdgeReceiver {
    addr: SocketAddr,
    idle_timeout: Duration,
    state: HostState,
}

impl UdpEdgeReceiver {
    pub fn new(addr: SocketAddr, idle_timeout: Duration, state: HostState) -> Self {
        Self {
            addr,
            idle_timeout,
            state,
        }
    }
}

#[async_trait]
impl EdgeReceiver for UdpEdgeReceiver {
    type Error = io::Error;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<EdgeData>, Self::Error> {
        let (tx, rx) = mpsc::channel(100);

        let socket = UdpSocket::bind(self.addr).await?;
        info!(addr = %self.addr, "UDP edge receiver started");

        tokio::spawn(run_receive_loop(
            Arc::new(socket),
            self.idle_timeout,
            tx,
            cancel,
            self.state.clone(),
        ));

        Ok(rx)
    }
}

#[instrument(name = "udp_receive_loop", skip_all)]
async fn run_receive_loop(
    socket: Arc<UdpSocket>,
    idle_timeout: Duration,
    tx: mpsc::Sender<EdgeData>,
    cancel: CancellationToken,
    state: HostState,
) {
    let mut peers: HashMap<SocketAddr, mpsc::Sender<Vec<u8>>> = HashMap::new();
    let mut identities: HashMap<SocketAddr, DeviceId> = HashMap::new();
    // a datagram never carries more than one frame, plus slack for garbage
    let mut buf = vec![0u8; MAX_FRAME_SIZE * 4];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Closing UDP edge receiver");
                break;
            }
            received = socket.recv_from(&mut buf) => {
                let (n, peer) = match received {
                    Ok(v) => v,
                    Err(e) => {
                        // ICMP errors from earlier replies surface here on some platforms
                        warn!(error = %e, "Failed to receive datagram");
                        continue;
                    }
                };

                let datagram = buf[..n].to_vec();
                let known = identities.get(&peer).copied();
                if let Ok(Message { body: MessageBody::Hello(hello), .. }) = Message::from_frame(&datagram) {
                    identities.insert(peer, hello.device_id);
                }

                let datagram = match peers.get(&peer) {
                    Some(sender) => match sender.try_send(datagram) {
                        Ok(()) => continue,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!(%peer, "Peer handler is behind, dropping datagram");
                            continue;
                        }
                        // the handler ended, start a new one
                        Err(mpsc::error::TrySendError::Closed(datagram)) => datagram,
                    },
                    None => datagram,
                };

                info!(%peer, known = ?known, "New UDP peer link");
                let (sender, link) = DatagramLink::new(Arc::clone(&socket), peer, idle_timeout);
                if sender.try_send(datagram).is_err() {
                    continue;
                }
                peers.insert(peer, sender);
                peers.retain(|_, sender| !sender.is_closed());

                let tx = tx.clone();
                let cancel = cancel.clone();
                let state = state.clone();

                tokio::spawn(async move {
                    let result = match known {
                        Some(device_id) => {
                            resume_link(link, peer.to_string(), device_id, tx, cancel, state).await
                        }
                        None => handle_link(link, peer.to_string(), tx, cancel, state).await,
                    };
                    if let Err(e) = result {
                        error!(error = %e, %peer, "Peer handler ended with error");
                    }
                });
            }
        }
    }
}
