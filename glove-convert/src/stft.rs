use std::sync::Arc;

use rustfft::{num_complex::Complex32, Fft, FftPlanner};

/// Periodic Hann window: w[i] = 0.5 * (1 - cos(2πi/N))
pub fn hann_window_periodic(n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let two_pi = std::f32::consts::PI * 2.0;
            let n_f = n as f32;
            (0..n).map(|i| 0.5 * (1.0 - (two_pi * i as f32 / n_f).cos())).collect()
        }
    }
}

/// Centered magnitude STFT. Frame `t` is centered on sample `t * hop`;
/// the signal is zero-padded by `n / 2` on both sides.
pub struct Stft {
    n: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(n: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            n,
            hop,
            window: hann_window_periodic(n),
            fft: planner.plan_fft_forward(n),
        }
    }

    pub fn bins(&self) -> usize {
        self.n / 2 + 1
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn frame_count(&self, len: usize) -> usize {
        1 + len / self.hop
    }

    /// Center frequency of each output bin.
    pub fn frequencies(&self, sample_rate: u32) -> Vec<f32> {
        (0..self.bins())
            .map(|k| k as f32 * sample_rate as f32 / self.n as f32)
            .collect()
    }

    /// One row of `bins()` magnitudes per frame.
    pub fn magnitudes(&self, signal: &[f32]) -> Vec<Vec<f32>> {
        let half = self.n / 2;
        let mut buffer = vec![Complex32::new(0.0, 0.0); self.n];
        (0..self.frame_count(signal.len()))
            .map(|frame| {
                let center = frame * self.hop;
                for (i, slot) in buffer.iter_mut().enumerate() {
                    let sample = (center + i)
                        .checked_sub(half)
                        .and_then(|idx| signal.get(idx))
                        .copied()
                        .unwrap_or(0.0);
                    *slot = Complex32::new(sample * self.window[i], 0.0);
                }
                self.fft.process(&mut buffer);
                buffer[..self.bins()].iter().map(|c| c.norm()).collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_starts_at_zero_and_peaks_mid_frame() {
        let w = hann_window_periodic(8);
        assert_eq!(w[0], 0.0);
        assert!((w[4] - 1.0).abs() < 1e-6);
        assert!((w[2] - w[6]).abs() < 1e-6);
    }

    #[test]
    fn sine_peaks_in_its_bin() {
        let sample_rate = 8_000;
        let stft = Stft::new(256, 64);
        let freq = stft.frequencies(sample_rate)[20];
        let signal: Vec<f32> = (0..2_048)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();

        let frames = stft.magnitudes(&signal);
        assert_eq!(frames.len(), 1 + 2_048 / 64);
        let middle = &frames[frames.len() / 2];
        let peak = middle
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(peak, 20);
    }

    #[test]
    fn silence_has_no_energy() {
        let stft = Stft::new(128, 32);
        let frames = stft.magnitudes(&[0.0; 500]);
        assert!(frames.iter().flatten().all(|&m| m == 0.0));
    }
}
