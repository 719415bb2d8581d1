//! Render graph shared by live playback and offline mixdown.
//!
//! voice (buffer, rate, detune) -> clip gain (fades) -> [guard] ->
//! track input gain -> track volume -> stereo pan -> master

use std::{f32::consts::FRAC_PI_2, sync::Arc};

use uuid::Uuid;

use crate::{
    model::{DEFAULT_TRACK_INPUT_GAIN, DEFAULT_TRACK_PAN, DEFAULT_TRACK_VOLUME, SampleBuffer},
    param::AudioParam,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Scheduled,
    Playing,
    Finished,
    Stopped,
}

/// One scheduled buffer playback for a clip.
#[derive(Debug, Clone)]
pub struct Voice {
    pub track_id: Uuid,
    pub clip_id: Uuid,
    buffer: Arc<SampleBuffer>,
    /// Engine time at which playback begins.
    start_time: f64,
    /// Buffer seconds read at `start_time`.
    offset: f64,
    /// Buffer seconds at which playback ends.
    end_offset: f64,
    rate: f64,
    read_position: Option<f64>,
    pub detune: AudioParam,
    pub gain: AudioParam,
    pub guard: Option<AudioParam>,
    state: VoiceState,
}

impl Voice {
    #[must_use]
    pub fn new(
        track_id: Uuid,
        clip_id: Uuid,
        buffer: Arc<SampleBuffer>,
        start_time: f64,
        offset: f64,
        end_offset: f64,
        rate: f64,
    ) -> Self {
        Self {
            track_id,
            clip_id,
            buffer,
            start_time,
            offset,
            end_offset,
            rate,
            read_position: None,
            detune: AudioParam::new(0.0),
            gain: AudioParam::new(1.0),
            guard: None,
            state: VoiceState::Scheduled,
        }
    }

    #[must_use]
    pub fn state(&self) -> VoiceState {
        self.state
    }

    #[must_use]
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, VoiceState::Scheduled | VoiceState::Playing)
    }

    /// Stopping a finished or already stopped voice is a no-op.
    pub fn stop(&mut self) {
        if self.is_active() {
            self.state = VoiceState::Stopped;
        }
    }

    fn speed_at(&self, time: f64) -> f64 {
        self.rate * 2.0_f64.powf(f64::from(self.detune.value_at(time)) / 1_200.0)
    }

    /// Mix this voice into an interleaved stereo block beginning at `block_start`.
    fn render_into(&mut self, block_start: f64, sample_rate: u32, out: &mut [f32]) {
        if !self.is_active() {
            return;
        }
        let rate = f64::from(sample_rate);
        for (frame, samples) in out.chunks_exact_mut(2).enumerate() {
            let time = block_start + frame as f64 / rate;
            if time < self.start_time {
                continue;
            }
            let position = match self.read_position {
                Some(position) => position,
                None => {
                    self.state = VoiceState::Playing;
                    self.offset + (time - self.start_time) * self.speed_at(time)
                }
            };
            if position >= self.end_offset {
                self.state = VoiceState::Finished;
                return;
            }

            let (left, right) = self.buffer.stereo_at(position);
            let mut gain = self.gain.value_at(time);
            if let Some(guard) = &self.guard {
                gain *= guard.value_at(time);
            }
            samples[0] += left * gain;
            samples[1] += right * gain;
            self.read_position = Some(position + self.speed_at(time) / rate);
        }
    }
}

/// Per-track nodes. Created once per track and mutated in place.
#[derive(Debug, Clone)]
pub struct TrackBus {
    pub track_id: Uuid,
    pub input_gain: AudioParam,
    pub volume: AudioParam,
    pub pan: AudioParam,
    scratch: Vec<f32>,
}

impl TrackBus {
    #[must_use]
    pub fn new(track_id: Uuid) -> Self {
        Self {
            track_id,
            input_gain: AudioParam::new(DEFAULT_TRACK_INPUT_GAIN),
            volume: AudioParam::new(DEFAULT_TRACK_VOLUME),
            pan: AudioParam::new(DEFAULT_TRACK_PAN),
            scratch: Vec::new(),
        }
    }

    /// Release the bus' automation and scratch memory.
    pub fn disconnect(&mut self) {
        self.input_gain = AudioParam::new(DEFAULT_TRACK_INPUT_GAIN);
        self.volume = AudioParam::new(DEFAULT_TRACK_VOLUME);
        self.pan = AudioParam::new(DEFAULT_TRACK_PAN);
        self.scratch = Vec::new();
    }
}

/// Equal-power stereo panner applied to a stereo input.
#[must_use]
pub fn pan_stereo(pan: f32, left: f32, right: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan <= 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        (left + right * x.cos(), right * x.sin())
    } else {
        let x = pan * FRAC_PI_2;
        (left * x.cos(), right + left * x.sin())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderGraph {
    buses: Vec<TrackBus>,
    voices: Vec<Voice>,
}

impl RenderGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_bus(&mut self, track_id: Uuid) -> &mut TrackBus {
        let index = match self.buses.iter().position(|bus| bus.track_id == track_id) {
            Some(index) => index,
            None => {
                self.buses.push(TrackBus::new(track_id));
                self.buses.len() - 1
            }
        };
        &mut self.buses[index]
    }

    #[must_use]
    pub fn bus(&self, track_id: Uuid) -> Option<&TrackBus> {
        self.buses.iter().find(|bus| bus.track_id == track_id)
    }

    pub fn bus_mut(&mut self, track_id: Uuid) -> Option<&mut TrackBus> {
        self.buses.iter_mut().find(|bus| bus.track_id == track_id)
    }

    #[must_use]
    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    /// Stop the track's voices and disconnect its bus. Returns whether a bus existed.
    pub fn remove_bus(&mut self, track_id: Uuid) -> bool {
        for voice in self.voices.iter_mut().filter(|voice| voice.track_id == track_id) {
            voice.stop();
        }
        self.voices.retain(|voice| voice.track_id != track_id);
        let Some(index) = self.buses.iter().position(|bus| bus.track_id == track_id) else {
            return false;
        };
        let mut bus = self.buses.remove(index);
        bus.disconnect();
        true
    }

    pub fn add_voice(&mut self, voice: Voice) {
        self.ensure_bus(voice.track_id);
        self.voices.push(voice);
    }

    #[must_use]
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.iter_mut()
    }

    #[must_use]
    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|voice| voice.is_active()).count()
    }

    /// Force-stop every voice. Safe to call repeatedly.
    pub fn stop_all(&mut self) {
        for voice in &mut self.voices {
            voice.stop();
        }
        self.voices.clear();
    }

    /// Render an interleaved stereo block starting at engine time `block_start`.
    /// `out` is overwritten.
    pub fn render(&mut self, block_start: f64, sample_rate: u32, out: &mut [f32]) {
        out.fill(0.0);
        let rate = f64::from(sample_rate.max(1));

        for bus in &mut self.buses {
            bus.scratch.clear();
            bus.scratch.resize(out.len(), 0.0);
            let mut fed = false;
            for voice in self
                .voices
                .iter_mut()
                .filter(|voice| voice.track_id == bus.track_id)
            {
                voice.render_into(block_start, sample_rate, &mut bus.scratch);
                fed = true;
            }
            if !fed {
                continue;
            }

            for (frame, (mixed, input)) in out
                .chunks_exact_mut(2)
                .zip(bus.scratch.chunks_exact(2))
                .enumerate()
            {
                let time = block_start + frame as f64 / rate;
                let level = bus.input_gain.value_at(time) * bus.volume.value_at(time);
                let (left, right) =
                    pan_stereo(bus.pan.value_at(time), input[0] * level, input[1] * level);
                mixed[0] += left;
                mixed[1] += right;
            }
        }

        self.voices
            .retain(|voice| voice.state != VoiceState::Finished && voice.state != VoiceState::Stopped);
    }
}
