// src/io/channel.rs
//
// Reader -> monitor event path. Packets travel over a bounded channel and
// are dropped (and counted) when it is full, so a reader never waits on the
// monitor. Status and error events use a separate lossless channel; a
// reader sends only a handful of them over its whole lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{Packet, PortEvent};

/// Packets buffered between the readers and the monitor
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// The monitor has gone away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

/// Create a connected sender/receiver pair. `capacity` bounds pending packets.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (packet_tx, packet_rx) = mpsc::channel(capacity.max(1));
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let dropped = Arc::new(AtomicU64::new(0));

    let sender = EventSender {
        packets: packet_tx,
        control: control_tx,
        dropped: dropped.clone(),
    };
    let receiver = EventReceiver {
        packets: packet_rx,
        control: control_rx,
        packets_open: true,
        control_open: true,
        dropped,
    };
    (sender, receiver)
}

/// Reader side. Cheap to clone, one per reader.
#[derive(Clone, Debug)]
pub struct EventSender {
    packets: mpsc::Sender<Packet>,
    control: mpsc::UnboundedSender<PortEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Send an event without waiting. A packet that finds the channel full is dropped.
    pub fn send(&self, event: PortEvent) -> Result<(), ChannelClosed> {
        match event {
            PortEvent::Packet(packet) => match self.packets.try_send(packet) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(ChannelClosed),
            },
            other => self.control.send(other).map_err(|_| ChannelClosed),
        }
    }
}

/// Monitor side
#[derive(Debug)]
pub struct EventReceiver {
    packets: mpsc::Receiver<Packet>,
    control: mpsc::UnboundedReceiver<PortEvent>,
    packets_open: bool,
    control_open: bool,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Next event, status and errors first. `None` once every sender is gone
    /// and both channels are drained. Cancel safe.
    pub async fn recv(&mut self) -> Option<PortEvent> {
        loop {
            if !self.packets_open && !self.control_open {
                return None;
            }
            tokio::select! {
                biased;
                event = self.control.recv(), if self.control_open => match event {
                    Some(event) => return Some(event),
                    None => self.control_open = false,
                },
                packet = self.packets.recv(), if self.packets_open => match packet {
                    Some(packet) => return Some(PortEvent::Packet(packet)),
                    None => self.packets_open = false,
                },
            }
        }
    }

    /// Packets discarded because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
