//! Radio and storage work run inside each cycle.
//!
//! Sightings arrive through the scan channel from capture code; this module
//! only buffers them until the next upload slot. The board revision this
//! build targets has no modem populated, so uploads report undelivered and
//! the batch stays buffered (oldest sightings are evicted when full).

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use heapless::Deque;
use sensor_core::Fault;
use sensor_core::cycle::{CycleWork, ScanEvent, ScanEventProducer, UploadReport};

use crate::status;

/// Sightings buffered between uploads.
pub const UPLOAD_BATCH_CAPACITY: usize = 128;

pub struct NodeWork {
    batch: Deque<ScanEvent, UPLOAD_BATCH_CAPACITY>,
    evicted: u32,
}

impl NodeWork {
    pub const fn new() -> Self {
        Self {
            batch: Deque::new(),
            evicted: 0,
        }
    }

    pub fn buffered(&self) -> usize {
        self.batch.len()
    }

    pub fn evicted(&self) -> u32 {
        self.evicted
    }
}

impl Default for NodeWork {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleWork for NodeWork {
    fn scan<P: ScanEventProducer>(&mut self, _events: &mut P) -> Result<(), Fault> {
        // Capture code feeds the channel on its own once the radio rails are up.
        Ok(())
    }

    fn record(&mut self, event: &ScanEvent) {
        status::record_sighting();
        if self.batch.is_full() {
            let _ = self.batch.pop_front();
            self.evicted = self.evicted.saturating_add(1);
        }
        let _ = self.batch.push_back(*event);
    }

    fn upload(&mut self) -> Result<UploadReport, Fault> {
        Ok(UploadReport::default())
    }
}
