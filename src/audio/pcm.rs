//! In-memory track played through an output callback.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AudioError;
use crate::render::voice::AudioElement;

use super::wav;

#[derive(Debug)]
struct PlayHead {
    /// In source frames.
    position: f64,
    playing: bool,
    rate: f32,
}

/// Decoded mono audio and the play head the output device advances. The
/// reported time only moves when the device pulls samples through
/// [`render`](Self::render), so a stalled output shows as stalled progress.
#[derive(Clone)]
pub struct PcmTrack {
    samples: Arc<[f32]>,
    sample_rate: u32,
    head: Arc<Mutex<PlayHead>>,
}

impl PcmTrack {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
            head: Arc::new(Mutex::new(PlayHead {
                position: 0.0,
                playing: false,
                rate: 1.0,
            })),
        }
    }

    pub fn from_wav(bytes: &[u8]) -> Result<Self, AudioError> {
        let decoded = wav::decode(bytes)?;
        Ok(Self::new(decoded.samples, decoded.sample_rate))
    }

    fn head(&self) -> MutexGuard<'_, PlayHead> {
        self.head.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fill an interleaved output buffer, advancing the head while playing.
    /// Reaching the end pauses playback.
    pub fn render(&self, out: &mut [f32], out_rate: u32, channels: usize) {
        let mut head = self.head();
        let step = if out_rate == 0 {
            0.0
        } else {
            f64::from(head.rate) * f64::from(self.sample_rate) / f64::from(out_rate)
        };
        for frame in out.chunks_mut(channels.max(1)) {
            let mut sample = 0.0;
            if head.playing {
                match self.samples.get(head.position as usize) {
                    Some(s) => {
                        sample = *s;
                        head.position += step;
                    }
                    None => {
                        head.playing = false;
                        head.position = self.samples.len() as f64;
                    }
                }
            }
            frame.fill(sample);
        }
    }
}

impl AudioElement for PcmTrack {
    fn current_time(&self) -> f64 {
        self.head().position / f64::from(self.sample_rate)
    }

    fn duration(&self) -> Option<f64> {
        Some(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    fn is_playing(&self) -> bool {
        self.head().playing
    }

    fn play(&mut self) {
        let mut head = self.head();
        if head.position >= self.samples.len() as f64 {
            head.position = 0.0;
        }
        head.playing = true;
    }

    fn pause(&mut self) {
        self.head().playing = false;
    }

    fn set_playback_rate(&mut self, rate: f32) {
        if rate.is_finite() && rate > 0.0 {
            self.head().rate = rate;
        }
    }

    fn seek(&mut self, secs: f64) {
        if !secs.is_finite() {
            return;
        }
        let len = self.samples.len() as f64;
        self.head().position = (secs * f64::from(self.sample_rate)).clamp(0.0, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::voice::VoicePlayer;

    fn ramp(len: usize) -> PcmTrack {
        PcmTrack::new((0..len).map(|i| i as f32 / len as f32).collect(), 10)
    }

    #[test]
    fn paused_track_renders_silence_and_stays_put() {
        let track = ramp(20);
        let mut out = [1.0; 8];
        track.render(&mut out, 10, 2);
        assert_eq!(out, [0.0; 8]);
        assert_eq!(track.current_time(), 0.0);
    }

    #[test]
    fn playback_advances_with_output_and_rate() {
        let mut track = ramp(40);
        track.play();
        let mut out = [0.0; 10];
        track.render(&mut out, 10, 1);
        assert_eq!(track.current_time(), 1.0);
        assert_eq!(out[1], 1.0 / 40.0);

        track.set_playback_rate(2.0);
        track.render(&mut out, 10, 1);
        assert_eq!(track.current_time(), 3.0);
    }

    #[test]
    fn channels_get_the_same_sample() {
        let mut track = ramp(4);
        track.play();
        let mut out = [0.0; 4];
        track.render(&mut out, 10, 2);
        assert_eq!(out, [0.0, 0.0, 0.25, 0.25]);
    }

    #[test]
    fn end_of_track_pauses_and_replay_restarts() {
        let mut track = ramp(5);
        track.play();
        let mut out = [0.0; 8];
        track.render(&mut out, 10, 1);
        assert!(!track.is_playing());
        assert_eq!(track.current_time(), 0.5);
        track.play();
        assert_eq!(track.current_time(), 0.0);
    }

    #[test]
    fn seek_is_clamped_and_ignores_nan() {
        let mut track = ramp(30);
        track.seek(1.5);
        assert_eq!(track.current_time(), 1.5);
        track.seek(99.0);
        assert_eq!(track.current_time(), 3.0);
        track.seek(f64::NAN);
        assert_eq!(track.current_time(), 3.0);
    }

    #[test]
    fn player_progress_follows_rendered_audio() {
        let track = ramp(40);
        let output = track.clone();
        let mut player = VoicePlayer::new(track, "m1", None);
        player.toggle();
        assert_eq!(player.progress(), 0.0);
        let mut out = [0.0; 20];
        output.render(&mut out, 10, 1);
        assert_eq!(player.progress(), 0.5);
        assert_eq!(player.view().total_label, "00:04");
    }
}
