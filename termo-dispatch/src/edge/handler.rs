use termo_core::DeviceId;
use termo_core::protocol::{ControlCommand, Decoder, Message, MessageBody, ProtocolError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, field, info, instrument, warn};

use super::EdgeData;
use crate::link::{Link, LinkEvent, TransportError};
use crate::session::{Admission, Arrival};
use crate::state::HostState;

const CONTROL_QUEUE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum EdgeConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Buffer allocation failed, or a control frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Internal data channel closed")]
    ChannelClosed,
}

/// Drives one link until it ends, the host shuts down, or the link fails.
///
/// Bytes are decoded into messages and fed to the session of the device
/// named by the link's hello frame. Frames received before the first hello
/// are dropped. Commands queued through [`HostState::send_control`] are
/// written back on the same link.
pub async fn handle_link<L: Link>(
    link: L,
    peer: String,
    tx: mpsc::Sender<EdgeData>,
    cancel: CancellationToken,
    state: HostState,
) -> Result<(), EdgeConnectionError> {
    drive(link, peer, None, tx, cancel, state).await
}

/// Like [`handle_link`], for a peer that already said hello on an earlier
/// link, e.g. a datagram peer whose handler ended while it was quiet. Its
/// frames go to the session of `device_id` right away; the status of a
/// lost session still waits for the next hello.
pub async fn resume_link<L: Link>(
    link: L,
    peer: String,
    device_id: DeviceId,
    tx: mpsc::Sender<EdgeData>,
    cancel: CancellationToken,
    state: HostState,
) -> Result<(), EdgeConnectionError> {
    drive(link, peer, Some(device_id), tx, cancel, state).await
}

#[instrument(name = "edge_handler", skip_all, fields(peer = %peer, device_id = field::Empty))]
async fn drive<L: Link>(
    link: L,
    peer: String,
    device: Option<DeviceId>,
    tx: mpsc::Sender<EdgeData>,
    cancel: CancellationToken,
    state: HostState,
) -> Result<(), EdgeConnectionError> {
    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);

    if let Some(device_id) = device {
        Span::current().record("device_id", field::display(device_id));
        state.attach_control(device_id, control_tx.clone()).await;
        info!("Resuming link of a known peer");
    }

    let mut connection = Connection {
        link,
        decoder: Decoder::new(),
        device,
        control_tx,
        control_sequence: 0,
        framing_errors: 0,
        tx,
        state,
    };

    let result = connection.run(control_rx, &cancel).await;
    connection.link.close();

    if let Some(device_id) = connection.device {
        connection
            .state
            .detach_control(device_id, &connection.control_tx)
            .await;

        // a closed link is left to the liveness watchdog, a broken one is not
        if matches!(result, Err(EdgeConnectionError::Transport(_))) {
            if let Some(transition) = connection.state.link_failed(device_id).await {
                let _ = connection
                    .tx
                    .send(EdgeData::Status {
                        device_id,
                        transition,
                    })
                    .await;
            }
        }
    }

    result
}

struct Connection<L> {
    link: L,
    decoder: Decoder,
    device: Option<DeviceId>,
    control_tx: mpsc::Sender<ControlCommand>,
    control_sequence: u32,
    framing_errors: u64,
    tx: mpsc::Sender<EdgeData>,
    state: HostState,
}

impl<L: Link> Connection<L> {
    async fn run(
        &mut self,
        mut control_rx: mpsc::Receiver<ControlCommand>,
        cancel: &CancellationToken,
    ) -> Result<(), EdgeConnectionError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                Some(command) = control_rx.recv() => {
                    self.send_control(command).await?;
                }
                event = self.link.read() => {
                    match event? {
                        LinkEvent::Data(chunk) => self.on_data(&chunk).await?,
                        LinkEvent::EndOfStream => {
                            info!("Link reached end of stream");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn on_data(&mut self, chunk: &[u8]) -> Result<(), EdgeConnectionError> {
        let arrival = Arrival::now();
        let messages: Vec<Message> = self.decoder.feed(chunk)?.collect();

        let stats = self.decoder.stats();
        if stats.framing_errors() > self.framing_errors {
            warn!(
                framing_errors = stats.framing_errors(),
                bytes_discarded = stats.bytes_discarded,
                "Discarded corrupt bytes"
            );
            self.framing_errors = stats.framing_errors();
        }

        for message in messages {
            self.on_message(message, arrival).await?;
        }

        Ok(())
    }

    async fn on_message(
        &mut self,
        message: Message,
        arrival: Arrival,
    ) -> Result<(), EdgeConnectionError> {
        match &message.body {
            MessageBody::Hello(hello) => {
                if self.device != Some(hello.device_id) {
                    if let Some(previous) = self.device {
                        warn!(%previous, "Device identity changed on an open link");
                        self.state.detach_control(previous, &self.control_tx).await;
                    }

                    Span::current().record("device_id", field::display(hello.device_id));
                    self.state
                        .attach_control(hello.device_id, self.control_tx.clone())
                        .await;
                    self.device = Some(hello.device_id);
                }

                let admission = self
                    .state
                    .handshake(hello, message.sequence(), arrival)
                    .await;
                self.forward(hello.device_id, admission).await
            }
            MessageBody::Control(command) => {
                debug!(?command, "Ignoring control frame sent by a device");
                Ok(())
            }
            MessageBody::Samples(_) | MessageBody::Heartbeat => {
                let Some(device_id) = self.device else {
                    warn!(sequence = message.sequence(), "Dropping frame received before hello");
                    return Ok(());
                };

                match self.state.admit(device_id, &message, arrival).await {
                    Some(admission) => self.forward(device_id, admission).await,
                    None => Ok(()),
                }
            }
        }
    }

    async fn forward(
        &mut self,
        device_id: DeviceId,
        admission: Admission,
    ) -> Result<(), EdgeConnectionError> {
        if let Some(transition) = admission.transition {
            self.send(EdgeData::Status {
                device_id,
                transition,
            })
            .await?;
        }

        if !admission.records.is_empty() {
            self.send(EdgeData::Records {
                device_id,
                records: admission.records,
            })
            .await?;
        }

        Ok(())
    }

    async fn send(&mut self, data: EdgeData) -> Result<(), EdgeConnectionError> {
        self.tx.send(data).await.map_err(|_| {
            warn!("Internal data channel closed");
            EdgeConnectionError::ChannelClosed
        })
    }

    async fn send_control(&mut self, command: ControlCommand) -> Result<(), EdgeConnectionError> {
        let frame = Message::new(self.control_sequence, MessageBody::Control(command))?.encode()?;
        self.control_sequence = self.control_sequence.wrapping_add(1);

        self.link.write(&frame).await?;
        info!(?command, "Control command sent");

        Ok(())
    }
}
