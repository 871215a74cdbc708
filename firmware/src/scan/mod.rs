//! Scan event channel shared between capture code and the cycle task.
//!
//! Capture runs wherever the radio drivers deliver results (interrupt-fed
//! tasks on target); the cycle task drains the same channel through the
//! core's consumer trait. Overflow is counted, never blocking the producer.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TryReceiveError, TrySendError};
use portable_atomic::{AtomicU32, Ordering};
use sensor_core::cycle::{
    DequeueError, EnqueueError, SCAN_QUEUE_CAPACITY, ScanEvent, ScanEventConsumer,
    ScanEventProducer,
};

#[cfg(target_os = "none")]
type ScanMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type ScanMutex = NoopRawMutex;

/// Queue carrying sightings from capture code to the cycle task.
pub type ScanChannel = Channel<ScanMutex, ScanEvent, SCAN_QUEUE_CAPACITY>;

pub type ScanSender<'a> = Sender<'a, ScanMutex, ScanEvent, SCAN_QUEUE_CAPACITY>;

pub type ScanReceiver<'a> = Receiver<'a, ScanMutex, ScanEvent, SCAN_QUEUE_CAPACITY>;

/// Channel plus the overflow counter both ends report through.
pub struct ScanQueue {
    channel: ScanChannel,
    dropped: AtomicU32,
}

impl ScanQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Producer handle for capture code.
    pub fn producer(&self) -> ChannelProducer<'_> {
        ChannelProducer {
            sender: self.channel.sender(),
            dropped: &self.dropped,
        }
    }

    /// Combined handle for the cycle task, which both triggers capture and
    /// drains the results.
    pub fn endpoint(&self) -> ChannelEndpoint<'_> {
        ChannelEndpoint {
            producer: self.producer(),
            receiver: self.channel.receiver(),
        }
    }
}

impl Default for ScanQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter that lets a channel sender satisfy [`ScanEventProducer`].
pub struct ChannelProducer<'a> {
    sender: ScanSender<'a>,
    dropped: &'a AtomicU32,
}

impl ScanEventProducer for ChannelProducer<'_> {
    type Error = ();

    fn try_enqueue(&mut self, event: ScanEvent) -> Result<(), EnqueueError<()>> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(EnqueueError::QueueFull)
            }
        }
    }

    fn capacity(&self) -> Option<usize> {
        Some(SCAN_QUEUE_CAPACITY)
    }

    fn len(&self) -> Option<usize> {
        Some(self.sender.len())
    }
}

/// Both ends of the channel behind the core's queue traits.
pub struct ChannelEndpoint<'a> {
    producer: ChannelProducer<'a>,
    receiver: ScanReceiver<'a>,
}

impl ScanEventProducer for ChannelEndpoint<'_> {
    type Error = ();

    fn try_enqueue(&mut self, event: ScanEvent) -> Result<(), EnqueueError<()>> {
        self.producer.try_enqueue(event)
    }

    fn capacity(&self) -> Option<usize> {
        self.producer.capacity()
    }

    fn len(&self) -> Option<usize> {
        self.producer.len()
    }
}

impl ScanEventConsumer for ChannelEndpoint<'_> {
    type Error = ();

    fn try_dequeue(&mut self) -> Result<Option<ScanEvent>, DequeueError<()>> {
        match self.receiver.try_receive() {
            Ok(event) => Ok(Some(event)),
            Err(TryReceiveError::Empty) => Ok(None),
        }
    }

    fn take_dropped(&mut self) -> u32 {
        self.producer.dropped.swap(0, Ordering::Relaxed)
    }
}
