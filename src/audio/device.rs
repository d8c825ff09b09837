//! Microphone and speaker access through cpal.
//!
//! A cpal `Stream` is not `Send`, so each one is built on its own thread and
//! kept there until the owning handle is stopped or dropped. Dropping the
//! stream is what gives the device back.

use std::sync::mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfig};
use log::{debug, error, info};
use tokio::sync::oneshot;

use super::pcm::PcmTrack;
use super::wav::sample_to_pcm16;
use crate::error::{AudioError, RecorderError};
use crate::recorder::{AudioSource, CaptureStream, ChunkSink, Container};

enum OpenError {
    Unavailable,
    Other(String),
}

impl From<BuildStreamError> for OpenError {
    fn from(e: BuildStreamError) -> Self {
        match e {
            BuildStreamError::DeviceNotAvailable => Self::Unavailable,
            other => Self::Other(other.to_string()),
        }
    }
}

struct DeviceThread {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceThread {
    /// Run `build` on a fresh thread and hold the stream it returns. Resolves
    /// with the stream's sample rate once it is playing.
    async fn spawn<F>(build: F) -> Result<(Self, u32), OpenError>
    where
        F: FnOnce() -> Result<(Stream, u32), OpenError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = std::thread::spawn(move || {
            let stream = match build() {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Either a stop message or the sender going away.
            let _ = stop_rx.recv();
            drop(stream);
            debug!("Audio stream closed");
        });
        let mut handle = Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        };
        match ready_rx.await {
            Ok(Ok(rate)) => Ok((handle, rate)),
            Ok(Err(e)) => {
                handle.stop();
                Err(e)
            }
            Err(_) => {
                handle.stop();
                Err(OpenError::Other("audio thread exited".into()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Audio thread panicked");
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Prefer the device default; fall back to an `f32` format at the same rate.
fn pick_f32(
    default: SupportedStreamConfig,
    mut ranges: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
) -> Result<StreamConfig, OpenError> {
    if default.sample_format() == SampleFormat::F32 {
        return Ok(default.config());
    }
    let rate = default.sample_rate();
    ranges
        .find(|c| {
            c.sample_format() == SampleFormat::F32
                && c.min_sample_rate().0 <= rate.0
                && c.max_sample_rate().0 >= rate.0
        })
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| OpenError::Other("device has no f32 format".into()))
}

fn input_config(device: &Device) -> Result<StreamConfig, OpenError> {
    let default = device
        .default_input_config()
        .map_err(|e| OpenError::Other(e.to_string()))?;
    let ranges = device
        .supported_input_configs()
        .map_err(|e| OpenError::Other(e.to_string()))?;
    pick_f32(default, ranges)
}

fn output_config(device: &Device) -> Result<StreamConfig, OpenError> {
    let default = device
        .default_output_config()
        .map_err(|e| OpenError::Other(e.to_string()))?;
    let ranges = device
        .supported_output_configs()
        .map_err(|e| OpenError::Other(e.to_string()))?;
    pick_f32(default, ranges)
}

/// The host's default input device. Captures mono 16-bit PCM.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

fn build_input(sink: ChunkSink) -> Result<(Stream, u32), OpenError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(OpenError::Unavailable)?;
    info!("Using input device: {}", device.name().unwrap_or_default());

    let config = input_config(&device)?;
    let channels = usize::from(config.channels.max(1));
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mut chunk = Vec::with_capacity(data.len() / channels * 2);
            for frame in data.chunks(channels) {
                let mono = frame.iter().sum::<f32>() / frame.len() as f32;
                chunk.extend_from_slice(&sample_to_pcm16(mono));
            }
            if let Ok(mut chunks) = sink.lock() {
                chunks.push(chunk);
            }
        },
        move |err| error!("Audio input stream error: {err}"),
        None,
    )?;
    stream.play().map_err(|e| OpenError::Other(e.to_string()))?;
    Ok((stream, config.sample_rate.0))
}

#[async_trait]
impl AudioSource for CpalMicrophone {
    async fn open(&self, sink: ChunkSink) -> Result<Box<dyn CaptureStream>, RecorderError> {
        match DeviceThread::spawn(move || build_input(sink)).await {
            Ok((thread, sample_rate)) => {
                info!("Microphone open at {sample_rate} Hz");
                Ok(Box::new(CpalCapture {
                    thread,
                    sample_rate,
                }))
            }
            Err(OpenError::Unavailable) => Err(RecorderError::DeviceUnavailable),
            Err(OpenError::Other(e)) => Err(RecorderError::Device(e)),
        }
    }
}

struct CpalCapture {
    thread: DeviceThread,
    sample_rate: u32,
}

impl CaptureStream for CpalCapture {
    fn mime_type(&self) -> &str {
        "audio/wav"
    }

    fn container(&self) -> Container {
        Container::Wav {
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }

    fn release(&mut self) {
        self.thread.stop();
    }
}

/// Speaker output pulling from a [`PcmTrack`]. The track's play head only
/// moves while this is open.
pub struct PlaybackDevice {
    thread: DeviceThread,
}

fn build_output(track: PcmTrack) -> Result<(Stream, u32), OpenError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(OpenError::Unavailable)?;
    info!("Using output device: {}", device.name().unwrap_or_default());

    let config = output_config(&device)?;
    let rate = config.sample_rate.0;
    let channels = usize::from(config.channels.max(1));
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            track.render(data, rate, channels);
        },
        move |err| error!("Audio output stream error: {err}"),
        None,
    )?;
    stream.play().map_err(|e| OpenError::Other(e.to_string()))?;
    Ok((stream, rate))
}

impl PlaybackDevice {
    pub async fn open(track: PcmTrack) -> Result<Self, AudioError> {
        match DeviceThread::spawn(move || build_output(track)).await {
            Ok((thread, rate)) => {
                info!("Speaker open at {rate} Hz");
                Ok(Self { thread })
            }
            Err(OpenError::Unavailable) => Err(AudioError::NoOutputDevice),
            Err(OpenError::Other(e)) => Err(AudioError::Stream(e)),
        }
    }

    pub fn close(mut self) {
        self.thread.stop();
    }
}
