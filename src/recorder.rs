//! Voice-note capture.
//!
//! `idle -> recording -> (stopped) -> sending -> idle`. Every way out of
//! `recording` goes through [`VoiceRecorder::release`], which stops the
//! elapsed timer and hands the microphone back. Dropping the recorder does
//! the same.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::api::backend::Upload;
use crate::audio::wav;
use crate::error::RecorderError;

pub const MIN_DURATION_SECS: u64 = 1;

/// Chunks of encoded audio appended by the capture callback.
pub type ChunkSink = Arc<Mutex<Vec<Vec<u8>>>>;

/// A microphone that can be opened for exclusive capture.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Acquire the device. Captured data goes into `sink` until the
    /// returned stream is released.
    async fn open(&self, sink: ChunkSink) -> Result<Box<dyn CaptureStream>, RecorderError>;
}

/// How the captured chunks are turned into one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Chunks are already an encoded stream and are concatenated.
    Raw,
    /// Chunks are 16-bit little-endian PCM and get a WAV header.
    Wav { sample_rate: u32, channels: u16 },
}

/// An acquired microphone.
pub trait CaptureStream: Send {
    fn mime_type(&self) -> &str {
        "audio/webm"
    }

    fn container(&self) -> Container {
        Container::Raw
    }

    /// Stop capturing and give the device back. Called once per stream.
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Stopped,
    Sending,
}

impl RecorderState {
    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "already recording",
            Self::Stopped => "stopped",
            Self::Sending => "sending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioAsset {
    pub fn file_name(&self) -> String {
        let ext = self
            .mime_type
            .split(['/', ';'])
            .nth(1)
            .filter(|s| !s.is_empty())
            .unwrap_or("webm");
        format!("voice-message.{ext}")
    }

    pub fn into_upload(self) -> Upload {
        Upload {
            file_name: self.file_name(),
            mime_type: self.mime_type,
            bytes: self.bytes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecorderOptions {
    pub min_duration_secs: u64,
    /// Period of the elapsed-seconds timer.
    pub tick: Duration,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            min_duration_secs: MIN_DURATION_SECS,
            tick: Duration::from_secs(1),
        }
    }
}

pub struct VoiceRecorder<S: AudioSource> {
    source: S,
    options: RecorderOptions,
    state: RecorderState,
    stream: Option<Box<dyn CaptureStream>>,
    mime_type: String,
    container: Container,
    chunks: ChunkSink,
    elapsed: Arc<AtomicU64>,
    ticker: Option<JoinHandle<()>>,
    preview: Option<AudioAsset>,
}

impl<S: AudioSource> VoiceRecorder<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, RecorderOptions::default())
    }

    pub fn with_options(source: S, options: RecorderOptions) -> Self {
        Self {
            source,
            options,
            state: RecorderState::Idle,
            stream: None,
            mime_type: String::new(),
            container: Container::Raw,
            chunks: Arc::new(Mutex::new(Vec::new())),
            elapsed: Arc::new(AtomicU64::new(0)),
            ticker: None,
            preview: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed.load(Ordering::SeqCst)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The buffer kept by [`stop`](Self::stop) for previewing.
    pub fn preview(&self) -> Option<&AudioAsset> {
        self.preview.as_ref()
    }

    /// Whether the send control should be enabled.
    pub fn can_send(&self) -> bool {
        matches!(self.state, RecorderState::Recording | RecorderState::Stopped)
            && self.elapsed_secs() >= self.options.min_duration_secs
    }

    /// Advance the elapsed counter by one second. The background timer calls
    /// this path; hosts without a runtime can drive it themselves.
    pub fn tick(&self) {
        if self.state == RecorderState::Recording {
            self.elapsed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub async fn start(&mut self) -> Result<(), RecorderError> {
        if self.state != RecorderState::Idle {
            return Err(RecorderError::InvalidState(self.state.label()));
        }
        self.clear_buffer();
        let stream = self.source.open(self.chunks.clone()).await.inspect_err(|e| {
            warn!("microphone unavailable: {e}");
        })?;
        self.mime_type = stream.mime_type().to_string();
        self.container = stream.container();
        self.stream = Some(stream);
        self.ticker = self.spawn_ticker();
        self.state = RecorderState::Recording;
        info!("Recording started");
        Ok(())
    }

    fn spawn_ticker(&self) -> Option<JoinHandle<()>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let elapsed = self.elapsed.clone();
        let period = self.options.tick;
        Some(handle.spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                elapsed.fetch_add(1, Ordering::SeqCst);
            }
        }))
    }

    /// Stop the timer and release the microphone. Safe to call in any state.
    pub fn release(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            debug!("microphone released");
        }
    }

    fn clear_buffer(&mut self) {
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.clear();
        }
        self.elapsed.store(0, Ordering::SeqCst);
        self.preview = None;
    }

    fn assemble(&self) -> Option<AudioAsset> {
        let chunks = self.chunks.lock().map(|c| c.clone()).unwrap_or_default();
        if chunks.is_empty() {
            return None;
        }
        let bytes = match self.container {
            Container::Raw => chunks.concat(),
            Container::Wav { sample_rate, channels } => wav::encode(sample_rate, channels, &chunks.concat()),
        };
        Some(AudioAsset {
            bytes,
            mime_type: self.mime_type.clone(),
        })
    }

    fn reset(&mut self) {
        self.release();
        self.clear_buffer();
        self.state = RecorderState::Idle;
    }

    /// `recording -> stopped`, keeping the captured audio for preview.
    pub fn stop(&mut self) -> Result<Option<&AudioAsset>, RecorderError> {
        if self.state != RecorderState::Recording {
            return Err(RecorderError::InvalidState(self.state.label()));
        }
        self.release();
        self.preview = self.assemble();
        self.state = RecorderState::Stopped;
        info!("Recording stopped after {}s", self.elapsed_secs());
        Ok(self.preview.as_ref())
    }

    /// Throw the recording away and go back to idle.
    pub fn cancel(&mut self) {
        if self.state == RecorderState::Idle {
            return;
        }
        self.reset();
        warn!("Recording cancelled");
    }

    /// Stop, assemble and hand the audio to `on_send`. The recorder is idle
    /// again afterwards whether or not the callback succeeded; there is no
    /// retry. Below the minimum duration nothing happens and the recording
    /// continues.
    pub async fn send<F, Fut, E>(&mut self, on_send: F) -> Result<(), RecorderError>
    where
        F: FnOnce(AudioAsset, u64) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Stopped) {
            return Err(RecorderError::InvalidState(self.state.label()));
        }
        let elapsed = self.elapsed_secs();
        if elapsed < self.options.min_duration_secs {
            return Err(RecorderError::RecordingTooShort {
                elapsed,
                minimum: self.options.min_duration_secs,
            });
        }
        self.release();
        let asset = match self.preview.take().or_else(|| self.assemble()) {
            Some(asset) => asset,
            None => {
                self.reset();
                return Err(RecorderError::EmptyRecording);
            }
        };
        self.state = RecorderState::Sending;
        let result = on_send(asset, elapsed).await;
        self.reset();
        result.map_err(|e| {
            warn!("voice message send failed: {e}");
            RecorderError::SendFailed(e.to_string())
        })
    }
}

impl<S: AudioSource> Drop for VoiceRecorder<S> {
    fn drop(&mut self) {
        self.release();
    }
}
