use termo_core::DeviceId;
use termo_core::protocol::{ControlCommand, Decoder, MAX_FRAME_SIZE, MAX_SAMPLES_PER_FRAME, MessageBody};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Error;
use crate::config::{ReconnectConfig, SamplingConfig};
use crate::framer::Framer;
use crate::sampler::{Reading, Sampler};
use crate::sensor::Adc;
use crate::uplink::Uplink;

/// The device loop: samples on a fixed cadence, batches readings into
/// frames and keeps the uplink alive.
pub struct Engine<U, A> {
    uplink: U,
    sampler: Sampler<A>,
    framer: Framer,
    decoder: Decoder,
    device_id: DeviceId,
    boot_id: u32,
    sampling: SamplingConfig,
    reconnect: ReconnectConfig,
    pending: Vec<Reading>,
    running: bool,
    connected: bool,
    idle_ticks: u32,
    frames_since_hello: u32,
    last_sent: Option<Instant>,
}

impl<U: Uplink, A: Adc> Engine<U, A> {
    pub fn new(
        uplink: U,
        sampler: Sampler<A>,
        device_id: DeviceId,
        boot_id: u32,
        mut sampling: SamplingConfig,
        reconnect: ReconnectConfig,
    ) -> Self {
        sampling.batch_size = sampling.batch_size.clamp(1, MAX_SAMPLES_PER_FRAME);
        sampling.interval_ms = sampling.interval_ms.max(1);

        Self {
            uplink,
            sampler,
            framer: Framer::new(),
            decoder: Decoder::new(),
            device_id,
            boot_id,
            pending: Vec::with_capacity(sampling.batch_size),
            sampling,
            reconnect,
            running: true,
            connected: false,
            idle_ticks: 0,
            frames_since_hello: 0,
            last_sent: None,
        }
    }

    /// Runs until `cancel` fires. Only allocation failures end the loop early.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), Error> {
        info!(
            device_id = %self.device_id,
            boot_id = self.boot_id,
            interval_ms = self.sampling.interval_ms,
            batch_size = self.sampling.batch_size,
            "Engine started"
        );

        if !self.establish(&cancel).await? {
            return Ok(());
        }

        let mut ticker = tokio::time::interval(self.sampling.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.connected && self.poll_control()? {
                ticker = self.rescheduled();
            }

            if !self.connected && !self.establish(&cancel).await? {
                break;
            }

            self.on_tick().await?;
        }

        if self.connected && !self.pending.is_empty() {
            self.flush().await?;
        }

        info!(next_sequence = self.framer.next_sequence(), "Engine stopped");
        Ok(())
    }

    async fn on_tick(&mut self) -> Result<(), Error> {
        let mut sent = false;

        if self.running {
            let reading = self.sampler.sample().await;
            debug!(
                tick_ms = reading.tick_ms,
                temperature = %reading.temperature,
                flags = reading.flags.0,
                "Sampled"
            );

            self.pending.push(reading);
            if self.pending.len() >= self.sampling.batch_size {
                self.flush().await?;
                sent = true;
            }
        } else if !self.pending.is_empty() {
            self.flush().await?;
            sent = true;
        }

        if sent {
            self.idle_ticks = 0;
            return Ok(());
        }

        self.idle_ticks += 1;
        if self.sampling.heartbeat_every > 0 && self.idle_ticks >= self.sampling.heartbeat_every {
            self.refresh_hello().await?;
            let frame = self.framer.heartbeat()?;
            if self.connected {
                self.transmit(&frame).await;
            }
            self.idle_ticks = 0;
        }

        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Error> {
        self.refresh_hello().await?;

        let first_sequence = self.framer.next_sequence();
        let frame = self.framer.encode(&self.pending)?;
        let count = self.pending.len();
        self.pending.clear();

        // a failed send is not retried; the host sees the skipped sequences as a gap
        if self.connected && self.transmit(&frame).await {
            debug!(first_sequence, count, "Sample frame sent");
        }

        Ok(())
    }

    async fn transmit(&mut self, frame: &[u8]) -> bool {
        match self.uplink.send(frame).await {
            Ok(()) => {
                self.last_sent = Some(Instant::now());
                self.frames_since_hello = self.frames_since_hello.saturating_add(1);
                true
            }
            Err(e) => {
                warn!(error = %e, "Uplink send failed, reconnecting");
                self.connected = false;
                false
            }
        }
    }

    /// Connects and sends the hello frame, backing off between attempts.
    /// Returns `false` if cancelled first.
    async fn establish(&mut self, cancel: &CancellationToken) -> Result<bool, Error> {
        let mut backoff = self.reconnect.base();

        loop {
            match self.handshake().await {
                Ok(()) => {
                    info!(
                        next_sequence = self.framer.next_sequence(),
                        "Uplink established"
                    );
                    self.connected = true;
                    self.decoder.reset();
                    return Ok(true);
                }
                Err(Error::Transport(e)) => {
                    warn!(
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to reach host, will retry"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(false),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.reconnect.max());
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), Error> {
        self.uplink.connect().await?;

        let hello = self
            .framer
            .hello(self.device_id, self.boot_id, self.sampling.interval_ms)?;
        self.uplink.send(&hello).await?;
        self.last_sent = Some(Instant::now());
        self.frames_since_hello = 0;

        Ok(())
    }

    /// Repeats the hello on connectionless uplinks when enough frames went
    /// out since the last one, or when the device was silent long enough for
    /// the host to have dropped it. Must run before the next frame is encoded
    /// so the hello announces that frame's sequence.
    async fn refresh_hello(&mut self) -> Result<(), Error> {
        if !self.connected || !self.uplink.is_connectionless() {
            return Ok(());
        }

        let every = self.reconnect.hello_every;
        let frames_due = every > 0 && self.frames_since_hello >= every;
        let idle_due = self.reconnect.hello_idle().is_some_and(|idle| {
            self.last_sent.is_none_or(|at| at.elapsed() >= idle)
        });
        if !frames_due && !idle_due {
            return Ok(());
        }

        let hello = self
            .framer
            .hello(self.device_id, self.boot_id, self.sampling.interval_ms)?;
        if self.transmit(&hello).await {
            debug!(
                next_sequence = self.framer.next_sequence(),
                idle = idle_due,
                "Hello repeated"
            );
            self.frames_since_hello = 0;
        }

        Ok(())
    }

    /// Drains control frames sent by the host. Returns whether the sampling
    /// interval changed.
    fn poll_control(&mut self) -> Result<bool, Error> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let mut reschedule = false;

        loop {
            let n = match self.uplink.poll_control(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "Uplink lost while polling for control frames");
                    self.connected = false;
                    break;
                }
            };

            let commands: Vec<ControlCommand> = self
                .decoder
                .feed(&buf[..n])?
                .filter_map(|message| match message.body {
                    MessageBody::Control(command) => Some(command),
                    other => {
                        debug!(kind = ?other.kind(), "Ignoring frame from host");
                        None
                    }
                })
                .collect();

            for command in commands {
                reschedule |= self.apply(command);
            }
        }

        Ok(reschedule)
    }

    fn apply(&mut self, command: ControlCommand) -> bool {
        info!(?command, "Control command received");

        match command {
            ControlCommand::SetInterval { millis: 0 } => {
                warn!("Ignoring zero sampling interval");
                false
            }
            ControlCommand::SetInterval { millis } => {
                let changed = self.sampling.interval_ms != millis;
                self.sampling.interval_ms = millis;
                changed
            }
            ControlCommand::SetBatchSize { samples } => {
                self.sampling.batch_size = (samples as usize).clamp(1, MAX_SAMPLES_PER_FRAME);
                false
            }
            ControlCommand::Start => {
                self.running = true;
                false
            }
            ControlCommand::Stop => {
                self.running = false;
                false
            }
        }
    }

    fn rescheduled(&self) -> Interval {
        let period = self.sampling.interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use termo_core::protocol::{FrameKind, Message};

    use super::*;
    use crate::sampler::DEFAULT_RANGE;
    use crate::sampler::tests::ScriptedAdc;
    use crate::thermistor::Thermistor;
    use crate::uplink::TransportError;

    #[derive(Default)]
    struct MockState {
        connectionless: bool,
        connect_failures: u32,
        connects: u32,
        sends: usize,
        failing_sends: HashSet<usize>,
        frames: Vec<Vec<u8>>,
        inbound: VecDeque<u8>,
    }

    #[derive(Clone, Default)]
    struct MockUplink {
        state: Arc<Mutex<MockState>>,
    }

    impl MockUplink {
        fn messages(&self) -> Vec<Message> {
            let state = self.state.lock().unwrap();
            let mut decoder = Decoder::new();
            let bytes: Vec<u8> = state.frames.concat();
            decoder.feed(&bytes).unwrap().collect()
        }

        fn push_control(&self, command: ControlCommand) {
            let frame = Message::new(0, MessageBody::Control(command))
                .unwrap()
                .encode()
                .unwrap();
            self.state.lock().unwrap().inbound.extend(frame);
        }
    }

    impl Uplink for MockUplink {
        async fn connect(&mut self) -> Result<(), TransportError> {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(TransportError::NotConnected);
            }
            Ok(())
        }

        async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            let mut state = self.state.lock().unwrap();
            let index = state.sends;
            state.sends += 1;
            if state.failing_sends.contains(&index) {
                return Err(TransportError::Closed);
            }
            state.frames.push(frame.to_vec());
            Ok(())
        }

        fn poll_control(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let mut state = self.state.lock().unwrap();
            let n = state.inbound.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn is_connectionless(&self) -> bool {
            self.state.lock().unwrap().connectionless
        }
    }

    fn engine(uplink: MockUplink, batch_size: usize, heartbeat_every: u32) -> Engine<MockUplink, ScriptedAdc> {
        let sampler = Sampler::new(ScriptedAdc::constant(2048), Thermistor::default(), DEFAULT_RANGE);
        let sampling = SamplingConfig {
            interval_ms: 10,
            batch_size,
            heartbeat_every,
        };
        let reconnect = ReconnectConfig {
            base_ms: 100,
            max_ms: 150,
            hello_every: 3,
            hello_idle_ms: 50,
        };

        Engine::new(uplink, sampler, DeviceId(6), 0xB007, sampling, reconnect)
    }

    async fn run_for(engine: Engine<MockUplink, ScriptedAdc>, millis: u64) {
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            stopper.cancel();
        });

        engine.run(cancel).await.unwrap();
    }

    fn kinds(messages: &[Message]) -> Vec<FrameKind> {
        messages.iter().map(|m| m.header.kind).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn batches_follow_the_sequence_counter() {
        let uplink = MockUplink::default();
        run_for(engine(uplink.clone(), 2, 0), 55).await;

        let messages = uplink.messages();
        assert_eq!(messages[0].body.kind(), FrameKind::Hello);
        let MessageBody::Hello(hello) = messages[0].body else {
            panic!("expected hello");
        };
        assert_eq!(hello.device_id, DeviceId(6));
        assert_eq!(hello.boot_id, 0xB007);
        assert_eq!(hello.sample_interval_ms, 10);

        let sequences: Vec<u32> = messages[1..].iter().map(Message::sequence).collect();
        assert_eq!(sequences, vec![0, 2, 4]);
        for message in &messages[1..] {
            let MessageBody::Samples(samples) = &message.body else {
                panic!("expected samples");
            };
            assert_eq!(samples.len(), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_device_sends_heartbeats() {
        let uplink = MockUplink::default();
        uplink.push_control(ControlCommand::Stop);
        run_for(engine(uplink.clone(), 1, 2), 35).await;

        let messages = uplink.messages();
        assert_eq!(
            kinds(&messages),
            vec![FrameKind::Hello, FrameKind::Heartbeat, FrameKind::Heartbeat]
        );
        assert!(messages.iter().all(|m| m.sequence() == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_size_follows_control_commands() {
        let uplink = MockUplink::default();
        uplink.push_control(ControlCommand::SetBatchSize { samples: 3 });
        run_for(engine(uplink.clone(), 1, 0), 55).await;

        let messages = uplink.messages();
        let sizes: Vec<usize> = messages
            .iter()
            .filter_map(|m| match &m.body {
                MessageBody::Samples(samples) => Some(samples.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![3, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_host_is_retried_with_backoff() {
        let uplink = MockUplink::default();
        uplink.state.lock().unwrap().connect_failures = 2;

        let start = Instant::now();
        run_for(engine(uplink.clone(), 1, 0), 255).await;

        let state = uplink.state.lock().unwrap();
        assert_eq!(state.connects, 3);
        drop(state);

        // 100ms then 150ms (capped) of backoff before the third attempt
        assert!(start.elapsed() >= Duration::from_millis(250));
        let messages = uplink.messages();
        assert_eq!(messages[0].body.kind(), FrameKind::Hello);
        assert_eq!(messages[0].sequence(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_batches_show_up_as_a_gap_after_reconnect() {
        let uplink = MockUplink::default();
        // sends: 0 hello, 1 seq 0, 2 seq 1 (lost), 3 hello, 4 seq 2
        uplink.state.lock().unwrap().failing_sends.insert(2);
        run_for(engine(uplink.clone(), 1, 0), 25).await;

        let messages = uplink.messages();
        assert_eq!(
            kinds(&messages),
            vec![
                FrameKind::Hello,
                FrameKind::Samples,
                FrameKind::Hello,
                FrameKind::Samples
            ]
        );
        let sequences: Vec<u32> = messages.iter().map(Message::sequence).collect();
        assert_eq!(sequences, vec![0, 0, 2, 2]);
        assert_eq!(uplink.state.lock().unwrap().connects, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn datagram_uplink_repeats_hello_every_few_frames() {
        let uplink = MockUplink::default();
        uplink.state.lock().unwrap().connectionless = true;
        run_for(engine(uplink.clone(), 1, 0), 55).await;

        let messages = uplink.messages();
        assert_eq!(
            kinds(&messages),
            vec![
                FrameKind::Hello,
                FrameKind::Samples,
                FrameKind::Samples,
                FrameKind::Samples,
                FrameKind::Hello,
                FrameKind::Samples,
                FrameKind::Samples,
                FrameKind::Samples,
            ]
        );
        // the repeated hello announces the sample that follows it
        assert_eq!(messages[4].sequence(), 3);
        assert_eq!(messages[5].sequence(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn datagram_uplink_says_hello_after_going_quiet() {
        for connectionless in [true, false] {
            let uplink = MockUplink::default();
            uplink.state.lock().unwrap().connectionless = connectionless;
            uplink.push_control(ControlCommand::Stop);

            let cancel = CancellationToken::new();
            let task = tokio::spawn(engine(uplink.clone(), 1, 0).run(cancel.clone()));

            // paused well past the idle threshold, then resumed
            tokio::time::sleep(Duration::from_millis(105)).await;
            uplink.push_control(ControlCommand::Start);
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
            task.await.unwrap().unwrap();

            let messages = uplink.messages();
            let expected = if connectionless {
                vec![FrameKind::Hello, FrameKind::Hello, FrameKind::Samples, FrameKind::Samples]
            } else {
                vec![FrameKind::Hello, FrameKind::Samples, FrameKind::Samples]
            };
            assert_eq!(kinds(&messages), expected);
            assert!(messages.iter().take(2).all(|m| m.sequence() == 0));
        }
    }
}
