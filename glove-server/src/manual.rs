use glove_protocol::Hand;
use tracing::{debug, warn};

use crate::device::DevicePair;
use crate::fingers::{FingerConfig, FingerTable};

pub const DEFAULT_IMMEDIATE_INTERVAL: f64 = 0.2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ManualReport {
    pub sent: usize,
    pub failed: usize,
}

/// Immediate mode: re-asserts every held finger at a fixed refresh period.
///
/// The drag controls change strength every frame, but the glove only needs a
/// command once per `interval`; each command carries the interval as its
/// duration so a held finger vibrates continuously without flooding the link.
#[derive(Debug, Clone, Copy)]
pub struct ManualDispatcher {
    interval: f64,
}

impl Default for ManualDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_IMMEDIATE_INTERVAL)
    }
}

impl ManualDispatcher {
    pub fn new(interval: f64) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn dispatch(&self, fingers: &mut FingerTable, devices: &mut DevicePair, now: f64) -> ManualReport {
        let mut report = ManualReport::default();
        for hand in Hand::ALL {
            if !devices.is_open(hand) {
                continue;
            }
            for finger in fingers.hand_mut(hand).iter_mut() {
                if finger.strength == 0 || !self.is_due(finger, now) {
                    continue;
                }
                let command = finger.command(self.interval as f32);
                match devices.send(hand, &command) {
                    Ok(()) => {
                        debug!(hand = hand.label(), finger = finger.location.label(), strength = finger.strength, "manual write");
                        report.sent += 1;
                    }
                    Err(e) => {
                        warn!(hand = hand.label(), finger = finger.location.label(), error = %e, "manual write failed");
                        report.failed += 1;
                    }
                }
                finger.last_write_time = Some(now);
            }
        }
        report
    }

    fn is_due(&self, finger: &FingerConfig, now: f64) -> bool {
        match finger.last_write_time {
            None => true,
            Some(last) => now - last >= self.interval,
        }
    }
}
