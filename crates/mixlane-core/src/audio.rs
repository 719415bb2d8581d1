//! Process-scoped audio engine handle.
//!
//! The scheduler never reads a global clock. It is handed an
//! `Arc<dyn AudioEngine>` at construction and only observes its time.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use crate::model::OUTPUT_SAMPLE_RATE;

pub trait AudioEngine: Send + Sync {
    /// Monotonic engine time in seconds.
    fn current_time(&self) -> f64;
    fn sample_rate(&self) -> u32;
}

/// Wall-clock engine used by the headless studio.
#[derive(Debug)]
pub struct SystemAudioEngine {
    started: Instant,
    sample_rate: u32,
}

impl SystemAudioEngine {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            started: Instant::now(),
            sample_rate: sample_rate.max(1),
        }
    }
}

impl Default for SystemAudioEngine {
    fn default() -> Self {
        Self::new(OUTPUT_SAMPLE_RATE)
    }
}

impl AudioEngine for SystemAudioEngine {
    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Engine whose clock only moves when told to. Drives block-stepped
/// rendering in the parity harness and deterministic tests.
#[derive(Debug)]
pub struct ManualAudioEngine {
    time_bits: AtomicU64,
    sample_rate: u32,
}

impl ManualAudioEngine {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            time_bits: AtomicU64::new(0.0_f64.to_bits()),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn set_time(&self, seconds: f64) {
        self.time_bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        let now = self.current_time();
        self.set_time(now + seconds.max(0.0));
    }
}

impl Default for ManualAudioEngine {
    fn default() -> Self {
        Self::new(OUTPUT_SAMPLE_RATE)
    }
}

impl AudioEngine for ManualAudioEngine {
    fn current_time(&self) -> f64 {
        f64::from_bits(self.time_bits.load(Ordering::Acquire))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
