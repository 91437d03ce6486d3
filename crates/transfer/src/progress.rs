use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Chunk-level progress of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProgress {
    pub completed_chunks: u32,
    pub total_chunks: u32,
    /// Completion percentage (0-100). A plan with no chunks is 100 %.
    pub percent: f64,
}

impl ChunkProgress {
    pub fn new(completed_chunks: u32, total_chunks: u32) -> Self {
        let percent = if total_chunks == 0 {
            100.0
        } else {
            f64::from(completed_chunks) / f64::from(total_chunks) * 100.0
        };
        Self {
            completed_chunks,
            total_chunks,
            percent,
        }
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records a sample of `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, now: Instant) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// The first sample only marks the start of the window; its bytes were
    /// transferred before it. Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().skip(1).map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn chunk_progress_thirds() {
        let rounded: Vec<f64> = (1..=3)
            .map(|done| ChunkProgress::new(done, 3).percent.round())
            .collect();
        assert_eq!(rounded, vec![33.0, 67.0, 100.0]);
    }

    #[test]
    fn chunk_progress_empty_plan_is_complete() {
        let p = ChunkProgress::new(0, 0);
        assert_eq!(p.percent, 100.0);
    }

    #[test]
    fn speed_calculator_no_samples() {
        let calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_calculator_single_sample() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100);
        // Need at least 2 samples.
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_eta() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.add_sample(500);
        std::thread::sleep(Duration::from_millis(50));
        calc.add_sample(500);

        assert!(calc.bytes_per_second() > 0.0);
        let eta = calc.eta(10_000);
        assert!(eta.is_some_and(|d| d.as_secs_f64() > 0.0));
    }

    #[test]
    fn speed_excludes_bytes_before_window_start() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), None);
        let start = Instant::now();
        calc.add_sample_at(4096, start);
        calc.add_sample_at(1000, start + Duration::from_secs(2));
        calc.add_sample_at(1000, start + Duration::from_secs(4));

        assert_eq!(calc.bytes_per_second(), 500.0);
        assert_eq!(calc.eta(1000), Some(Duration::from_secs(2)));
    }

    #[test]
    fn speed_calculator_max_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        let s = calc.inner.lock().unwrap();
        assert!(s.samples.len() <= 5);
    }

    #[test]
    fn speed_calculator_concurrent_access() {
        let calc = Arc::new(SpeedCalculator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&calc);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        c.add_sample(1);
                        let _ = c.bytes_per_second();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
