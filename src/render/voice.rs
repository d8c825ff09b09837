//! Voice-note playback view.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::utils::format_clock;

pub const WAVEFORM_BARS: usize = 32;
const MIN_BAR: u8 = 20;
const MAX_BAR: u8 = 100;

/// Bar heights (percent) for a voice note. There is no amplitude data from
/// the backend, so these are decorative: random, but seeded by `seed` so a
/// message keeps the same shape across renders.
pub fn decorative_waveform(seed: &str, bars: usize) -> Vec<u8> {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());
    (0..bars).map(|_| rng.gen_range(MIN_BAR..=MAX_BAR)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackSpeed {
    #[default]
    Normal,
    OneAndHalf,
    Double,
}

impl PlaybackSpeed {
    pub fn next(self) -> Self {
        match self {
            Self::Normal => Self::OneAndHalf,
            Self::OneAndHalf => Self::Double,
            Self::Double => Self::Normal,
        }
    }

    pub fn rate(self) -> f32 {
        match self {
            Self::Normal => 1.0,
            Self::OneAndHalf => 1.5,
            Self::Double => 2.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "1x",
            Self::OneAndHalf => "1.5x",
            Self::Double => "2x",
        }
    }
}

/// The platform audio element. The player reads position and state from it
/// on every render rather than keeping its own clock.
pub trait AudioElement {
    fn current_time(&self) -> f64;

    /// `None` until the media metadata has loaded.
    fn duration(&self) -> Option<f64>;

    fn is_playing(&self) -> bool;

    fn play(&mut self);

    fn pause(&mut self);

    fn set_playback_rate(&mut self, rate: f32);

    fn seek(&mut self, secs: f64);
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceView {
    pub playing: bool,
    /// 0.0 ..= 1.0
    pub progress: f32,
    pub elapsed_label: String,
    pub total_label: String,
    pub speed_label: &'static str,
    pub waveform: Vec<u8>,
    /// Bars left of the playhead, drawn highlighted.
    pub played_bars: usize,
}

pub struct VoicePlayer<E: AudioElement> {
    element: E,
    speed: PlaybackSpeed,
    declared_duration: Option<u64>,
    waveform: Vec<u8>,
}

impl<E: AudioElement> VoicePlayer<E> {
    /// `declared_duration` is the backend's value, used until the element knows better.
    pub fn new(element: E, message_id: &str, declared_duration: Option<u64>) -> Self {
        Self {
            element,
            speed: PlaybackSpeed::Normal,
            declared_duration,
            waveform: decorative_waveform(message_id, WAVEFORM_BARS),
        }
    }

    pub fn element(&self) -> &E {
        &self.element
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.speed
    }

    fn total_secs(&self) -> f64 {
        self.element
            .duration()
            .filter(|d| d.is_finite() && *d > 0.0)
            .or(self.declared_duration.map(|d| d as f64))
            .unwrap_or(0.0)
    }

    pub fn progress(&self) -> f32 {
        let total = self.total_secs();
        if total <= 0.0 {
            return 0.0;
        }
        (self.element.current_time() / total).clamp(0.0, 1.0) as f32
    }

    pub fn toggle(&mut self) {
        if self.element.is_playing() {
            self.element.pause();
        } else {
            self.element.play();
        }
    }

    pub fn cycle_speed(&mut self) -> PlaybackSpeed {
        self.speed = self.speed.next();
        self.element.set_playback_rate(self.speed.rate());
        self.speed
    }

    /// Seek in proportion to a click at `x` along a waveform `width` wide.
    pub fn seek_to(&mut self, x: f32, width: f32) {
        let total = self.total_secs();
        if !x.is_finite() || !width.is_finite() || width <= 0.0 || total <= 0.0 {
            return;
        }
        let fraction = (x / width).clamp(0.0, 1.0) as f64;
        self.element.seek(fraction * total);
    }

    pub fn view(&self) -> VoiceView {
        let progress = self.progress();
        VoiceView {
            playing: self.element.is_playing(),
            progress,
            elapsed_label: format_clock(self.element.current_time().max(0.0) as u64),
            total_label: format_clock(self.total_secs().round() as u64),
            speed_label: self.speed.label(),
            played_bars: (progress * self.waveform.len() as f32).floor() as usize,
            waveform: self.waveform.clone(),
        }
    }
}
