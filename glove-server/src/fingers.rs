use glove_protocol::{FingerChannel, FingerCommand, Hand, FINGER_COUNT, HAND_COUNT};

pub const MAX_DURATION: f32 = 10.0;

const IDLE_TINT: [f32; 4] = [0.2, 0.4, 0.92, 1.0];
const ACTIVE_TINT: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FingerConfig {
    pub location: FingerChannel,
    pub strength: u8,
    pub duration: f32,
    pub last_write_time: Option<f64>,
}

impl Default for FingerConfig {
    fn default() -> Self {
        Self::new(FingerChannel::None)
    }
}

impl FingerConfig {
    pub fn new(location: FingerChannel) -> Self {
        Self {
            location,
            strength: 0,
            duration: 0.0,
            last_write_time: None,
        }
    }

    pub fn command(&self, duration: f32) -> FingerCommand {
        FingerCommand::new(self.location, self.strength, duration)
    }

    /// Strength of the pulse last written to this finger, or 0 once it has run out.
    pub fn pulse_strength(&self, now: f64) -> u8 {
        match self.last_write_time {
            Some(written) if now < written + self.duration as f64 => self.strength,
            _ => 0,
        }
    }
}

/// Per-hand, per-finger targets. Slot `i` of each hand always holds finger id `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct FingerTable {
    hands: [[FingerConfig; FINGER_COUNT]; HAND_COUNT],
}

impl Default for FingerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerTable {
    pub fn new() -> Self {
        let hand = FingerChannel::FINGERS.map(FingerConfig::new);
        Self {
            hands: [hand; HAND_COUNT],
        }
    }

    pub fn hand(&self, hand: Hand) -> &[FingerConfig; FINGER_COUNT] {
        &self.hands[hand.index()]
    }

    pub fn hand_mut(&mut self, hand: Hand) -> &mut [FingerConfig; FINGER_COUNT] {
        &mut self.hands[hand.index()]
    }

    pub fn get(&self, hand: Hand, finger: FingerChannel) -> Option<&FingerConfig> {
        finger.index().map(|i| &self.hands[hand.index()][i])
    }

    pub fn get_mut(&mut self, hand: Hand, finger: FingerChannel) -> Option<&mut FingerConfig> {
        finger.index().map(move |i| &mut self.hands[hand.index()][i])
    }

    pub fn set_strength(&mut self, hand: Hand, finger: FingerChannel, strength: u8) -> bool {
        match self.get_mut(hand, finger) {
            Some(slot) => {
                slot.strength = strength;
                true
            }
            None => false,
        }
    }

    pub fn set_duration(&mut self, hand: Hand, finger: FingerChannel, duration: f32) -> bool {
        match self.get_mut(hand, finger) {
            Some(slot) => {
                slot.duration = if duration.is_finite() {
                    duration.clamp(0.0, MAX_DURATION)
                } else {
                    0.0
                };
                true
            }
            None => false,
        }
    }

    /// Stamps a pulse that was just sent to the glove.
    pub fn record_pulse(&mut self, hand: Hand, command: &FingerCommand, now: f64) {
        if let Some(slot) = self.get_mut(hand, command.finger) {
            slot.strength = command.strength;
            slot.duration = command.duration;
            slot.last_write_time = Some(now);
        }
    }

    pub fn clear(&mut self) {
        for slot in self.hands.iter_mut().flatten() {
            slot.strength = 0;
            slot.last_write_time = None;
        }
    }
}

/// Display colour for a finger at `strength`, blending blue to red through HSV.
pub fn finger_tint(strength: u8) -> [f32; 4] {
    lerp_hsv(IDLE_TINT, ACTIVE_TINT, strength as f32 / 255.0)
}

fn lerp_hsv(from: [f32; 4], to: [f32; 4], t: f32) -> [f32; 4] {
    let (h1, s1, v1) = rgb_to_hsv(from[0], from[1], from[2]);
    let (h2, s2, v2) = rgb_to_hsv(to[0], to[1], to[2]);

    let s = s1 + (s2 - s1) * t;
    let v = v1 + (v2 - v1) * t;

    // Grey endpoints have no meaningful hue; borrow the other side's.
    let mut h = if s1 == 0.0 {
        if s2 == 0.0 {
            0.0
        } else {
            h2
        }
    } else if s2 == 0.0 {
        h1
    } else {
        let diff = h2 - h1;
        if diff > 0.5 {
            h1 + (diff - 1.0) * t
        } else if diff < -0.5 {
            h1 + (diff + 1.0) * t
        } else {
            h1 + diff * t
        }
    };
    h = h.rem_euclid(1.0);
    if s < 1e-5 {
        h = 0.0;
    }

    let (r, g, b) = hsv_to_rgb(h, s, v);
    [r, g, b, from[3] + (to[3] - from[3]) * t]
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let chroma = max - min;
    if max <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let s = chroma / max;
    if chroma <= 0.0 {
        return (0.0, s, max);
    }
    let sector = if max == r {
        ((g - b) / chroma).rem_euclid(6.0)
    } else if max == g {
        (b - r) / chroma + 2.0
    } else {
        (r - g) / chroma + 4.0
    };
    (sector / 6.0, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (v, v, v);
    }
    let h = h.rem_euclid(1.0) * 6.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as u8 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tint(actual: [f32; 4], expected: [f32; 4]) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-4, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn slots_are_labelled_by_position() {
        let table = FingerTable::new();
        for hand in Hand::ALL {
            for (i, slot) in table.hand(hand).iter().enumerate() {
                assert_eq!(slot.location, FingerChannel::FINGERS[i]);
                assert_eq!(slot.strength, 0);
                assert_eq!(slot.last_write_time, None);
            }
        }
    }

    #[test]
    fn sentinel_finger_is_not_addressable() {
        let mut table = FingerTable::new();
        assert!(!table.set_strength(Hand::Left, FingerChannel::None, 40));
        assert!(table.get(Hand::Left, FingerChannel::None).is_none());
    }

    #[test]
    fn duration_is_clamped() {
        let mut table = FingerTable::new();
        table.set_duration(Hand::Right, FingerChannel::Ring, 42.0);
        assert_eq!(table.get(Hand::Right, FingerChannel::Ring).unwrap().duration, MAX_DURATION);
        table.set_duration(Hand::Right, FingerChannel::Ring, -1.0);
        assert_eq!(table.get(Hand::Right, FingerChannel::Ring).unwrap().duration, 0.0);
    }

    #[test]
    fn pulse_fades_after_its_duration() {
        let mut table = FingerTable::new();
        let command = FingerCommand::new(FingerChannel::Index, 200, 0.3);
        table.record_pulse(Hand::Left, &command, 1.0);
        let slot = table.get(Hand::Left, FingerChannel::Index).unwrap();
        assert_eq!(slot.pulse_strength(1.2), 200);
        assert_eq!(slot.pulse_strength(1.4), 0);
    }

    #[test]
    fn clear_resets_strength_and_write_times() {
        let mut table = FingerTable::new();
        table.record_pulse(Hand::Right, &FingerCommand::new(FingerChannel::Pinky, 5, 0.1), 0.5);
        table.clear();
        let slot = table.get(Hand::Right, FingerChannel::Pinky).unwrap();
        assert_eq!(slot.strength, 0);
        assert_eq!(slot.last_write_time, None);
    }

    #[test]
    fn tint_spans_idle_to_active() {
        assert_tint(finger_tint(0), IDLE_TINT);
        assert_tint(finger_tint(255), ACTIVE_TINT);
        let mid = finger_tint(128);
        assert!(mid[0] > IDLE_TINT[0] && mid[1] < IDLE_TINT[1]);
    }
}
