use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use termo_core::protocol::{Hello, Message, MessageBody};
use termo_core::{DeviceId, LinkStatus, Sample, SeriesRecord};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on the skipped sequences remembered per device. Older holes
/// are forgotten first; a sample filling one of those counts as a duplicate.
pub const MAX_TRACKED_MISSING: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Smallest number of missing samples that degrades the link.
    pub gap_threshold: u32,
    /// Silence after which a connected device is considered lost.
    pub liveness_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gap_threshold: 1,
            liveness_timeout: Duration::from_secs(10),
        }
    }
}

/// When a message was decoded, on both host clocks.
#[derive(Debug, Clone, Copy)]
pub struct Arrival {
    /// Monotonic, drives liveness.
    pub instant: Instant,
    /// Wall clock, stored on records.
    pub wall: jiff::Timestamp,
}

impl Arrival {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: jiff::Timestamp::now(),
        }
    }
}

/// Irregularity in the sequence numbers of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SequenceAnomaly {
    #[error("expected sequence {expected}, received {received} ({missing} missing)")]
    Gap {
        expected: u32,
        received: u32,
        missing: u32,
    },
    #[error("sequence {received} already seen, expecting {expected}")]
    Duplicate { expected: u32, received: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LinkStatus,
    pub to: LinkStatus,
}

/// Outcome of feeding one message to a [`Session`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Admission {
    pub records: Vec<SeriesRecord>,
    pub anomaly: Option<SequenceAnomaly>,
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub fresh: u64,
    pub duplicates: u64,
    pub gaps: u64,
    /// Samples skipped and not (yet) recovered by a late arrival.
    pub missing: u64,
    /// Samples that arrived after a later sequence and filled a hole.
    pub late: u64,
    pub heartbeats: u64,
    pub handshakes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub device_id: DeviceId,
    pub status: LinkStatus,
    pub epoch: u32,
    pub boot_id: Option<u32>,
    pub expected_next: u32,
    pub sample_interval_ms: u32,
    pub last_seen: Option<jiff::Timestamp>,
    pub counters: SessionCounters,
}

/// Per-device reassembly state: ordering, gap and duplicate detection, and
/// link status.
#[derive(Debug)]
pub struct Session {
    device_id: DeviceId,
    config: SessionConfig,
    status: LinkStatus,
    epoch: u32,
    boot_id: Option<u32>,
    expected_next: u32,
    last_accepted: Option<u32>,
    /// The next fresh record follows samples that were never received.
    gap_pending: bool,
    /// Skipped sequences of the current epoch that may still arrive late.
    missing: BTreeSet<u32>,
    last_seen: Option<Instant>,
    last_seen_wall: Option<jiff::Timestamp>,
    sample_interval_ms: u32,
    counters: SessionCounters,
}

impl Session {
    pub fn new(device_id: DeviceId, config: SessionConfig) -> Self {
        Self {
            device_id,
            config,
            status: LinkStatus::Disconnected,
            epoch: 0,
            boot_id: None,
            expected_next: 0,
            last_accepted: None,
            gap_pending: false,
            missing: BTreeSet::new(),
            last_seen: None,
            last_seen_wall: None,
            sample_interval_ms: 0,
            counters: SessionCounters::default(),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn expected_next(&self) -> u32 {
        self.expected_next
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// Applies a hello frame. `sequence` is the header sequence of that frame,
    /// i.e. the next sample sequence the device will send.
    pub fn handshake(&mut self, hello: &Hello, sequence: u32, arrival: Arrival) -> Admission {
        let mut anomaly = None;

        if self.boot_id != Some(hello.boot_id) {
            if self.boot_id.is_some() {
                self.epoch = self.epoch.wrapping_add(1);
                info!(device_id = %self.device_id, epoch = self.epoch, "Device rebooted, new epoch");
            }
            self.boot_id = Some(hello.boot_id);
            self.last_accepted = None;
            self.gap_pending = false;
            self.missing.clear();
        } else if let Some(last) = self.last_accepted {
            // samples sent into the dead link
            let resume_at = last.wrapping_add(1);
            if sequence > resume_at {
                anomaly = Some(self.record_gap(resume_at, sequence));
            }
        }

        self.expected_next = sequence;
        self.sample_interval_ms = hello.sample_interval_ms;
        self.counters.handshakes += 1;
        self.touch(arrival);

        Admission {
            records: Vec::new(),
            anomaly,
            transition: self.set_status(LinkStatus::Connected),
        }
    }

    /// Classifies one decoded message and turns its samples into records.
    pub fn admit(&mut self, message: &Message, arrival: Arrival) -> Admission {
        match &message.body {
            MessageBody::Hello(hello) => self.handshake(hello, message.sequence(), arrival),
            MessageBody::Samples(samples) => {
                self.touch(arrival);
                self.admit_samples(samples, arrival)
            }
            MessageBody::Heartbeat => {
                self.touch(arrival);
                self.admit_heartbeat(message.sequence())
            }
            MessageBody::Control(command) => {
                debug!(device_id = %self.device_id, ?command, "Ignoring control frame sent by device");
                Admission::default()
            }
        }
    }

    /// Marks the device lost if it has been silent for longer than the
    /// liveness timeout.
    pub fn check_liveness(&mut self, now: Instant) -> Option<Transition> {
        if !matches!(self.status, LinkStatus::Connected | LinkStatus::Degraded) {
            return None;
        }

        let silent = self
            .last_seen
            .is_none_or(|seen| now.saturating_duration_since(seen) >= self.config.liveness_timeout);

        if silent {
            self.set_status(LinkStatus::Lost)
        } else {
            None
        }
    }

    /// The transport failed outright; there is no point waiting for the timeout.
    pub fn link_failed(&mut self) -> Option<Transition> {
        if matches!(self.status, LinkStatus::Connected | LinkStatus::Degraded) {
            self.set_status(LinkStatus::Lost)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            device_id: self.device_id,
            status: self.status,
            epoch: self.epoch,
            boot_id: self.boot_id,
            expected_next: self.expected_next,
            sample_interval_ms: self.sample_interval_ms,
            last_seen: self.last_seen_wall,
            counters: self.counters,
        }
    }

    fn admit_samples(&mut self, samples: &[Sample], arrival: Arrival) -> Admission {
        let mut records = Vec::with_capacity(samples.len());
        let mut anomaly = None;
        let mut worst_gap = 0;

        for sample in samples {
            let sequence = sample.sequence;

            if sequence < self.expected_next && self.missing.remove(&sequence) {
                self.counters.late += 1;
                self.counters.missing = self.counters.missing.saturating_sub(1);
                debug!(device_id = %self.device_id, sequence, "Late sample filled a gap");
                records.push(self.record(sample, arrival, false, false));
                continue;
            }

            if sequence < self.expected_next {
                self.counters.duplicates += 1;
                anomaly.get_or_insert(SequenceAnomaly::Duplicate {
                    expected: self.expected_next,
                    received: sequence,
                });
                records.push(self.record(sample, arrival, false, true));
                continue;
            }

            if sequence > self.expected_next {
                worst_gap = worst_gap.max(sequence - self.expected_next);
                anomaly = Some(self.record_gap(self.expected_next, sequence));
            }
            let gap_before = std::mem::take(&mut self.gap_pending);

            self.expected_next = sequence.wrapping_add(1);
            self.last_accepted = Some(sequence);
            self.counters.fresh += 1;
            records.push(self.record(sample, arrival, gap_before, false));
        }

        if let Some(anomaly) = &anomaly {
            warn!(device_id = %self.device_id, %anomaly, "Sequence anomaly");
        }

        Admission {
            records,
            anomaly,
            transition: self.after_valid_message(worst_gap),
        }
    }

    fn admit_heartbeat(&mut self, sequence: u32) -> Admission {
        self.counters.heartbeats += 1;

        if sequence <= self.expected_next {
            let transition = if sequence == self.expected_next {
                self.after_valid_message(0)
            } else {
                None
            };
            return Admission {
                transition,
                ..Admission::default()
            };
        }

        // the device moved on: samples in between were lost
        let missing = sequence - self.expected_next;
        let anomaly = self.record_gap(self.expected_next, sequence);
        warn!(device_id = %self.device_id, %anomaly, "Samples missing before heartbeat");
        self.expected_next = sequence;

        Admission {
            records: Vec::new(),
            anomaly: Some(anomaly),
            transition: self.after_valid_message(missing),
        }
    }

    /// Counts the samples between `expected` and `received` as lost and
    /// tags the next fresh record.
    fn record_gap(&mut self, expected: u32, received: u32) -> SequenceAnomaly {
        let missing = received - expected;
        self.counters.gaps += 1;
        self.counters.missing += missing as u64;
        self.gap_pending = true;

        let tracked_from = received.saturating_sub(MAX_TRACKED_MISSING as u32).max(expected);
        self.missing.extend(tracked_from..received);
        while self.missing.len() > MAX_TRACKED_MISSING {
            self.missing.pop_first();
        }

        SequenceAnomaly::Gap {
            expected,
            received,
            missing,
        }
    }

    fn after_valid_message(&mut self, worst_gap: u32) -> Option<Transition> {
        // only a handshake brings a lost link back
        if !matches!(self.status, LinkStatus::Connected | LinkStatus::Degraded) {
            return None;
        }

        if worst_gap > 0 && worst_gap >= self.config.gap_threshold {
            self.set_status(LinkStatus::Degraded)
        } else {
            self.set_status(LinkStatus::Connected)
        }
    }

    fn record(&self, sample: &Sample, arrival: Arrival, gap_before: bool, duplicate: bool) -> SeriesRecord {
        SeriesRecord {
            sample: *sample,
            epoch: self.epoch,
            arrival_time: arrival.wall,
            gap_before,
            duplicate,
        }
    }

    fn touch(&mut self, arrival: Arrival) {
        self.last_seen = Some(arrival.instant);
        self.last_seen_wall = Some(arrival.wall);
    }

    fn set_status(&mut self, to: LinkStatus) -> Option<Transition> {
        let from = self.status;
        if from == to {
            return None;
        }

        self.status = to;
        info!(device_id = %self.device_id, %from, %to, "Link status changed");
        Some(Transition { from, to })
    }
}
