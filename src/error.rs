use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Push stream error: {0}")]
    Push(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Microphone access was denied")]
    PermissionDenied,

    #[error("No audio input device found")]
    DeviceUnavailable,

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Nothing was recorded")]
    EmptyRecording,

    #[error("Recording is too short ({elapsed}s, minimum {minimum}s)")]
    RecordingTooShort { elapsed: u64, minimum: u64 },

    #[error("Failed to send voice message: {0}")]
    SendFailed(String),

    #[error("Recorder is {0}")]
    InvalidState(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("{name} is {size} bytes, the limit is {max} bytes")]
    FileTooLarge { name: String, size: u64, max: u64 },

    #[error("An upload is already in progress")]
    UploadInFlight,

    #[error("No files selected")]
    NothingStaged,

    #[error("Upload failed: {0}")]
    UploadFailed(String),
}

/// Failure part way through a batch of sends. The first `delivered`
/// items reached the backend before `error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSend<E> {
    pub delivered: usize,
    pub error: E,
}

impl<E> From<E> for PartialSend<E> {
    fn from(error: E) -> Self {
        Self { delivered: 0, error }
    }
}

impl<E: fmt::Display> fmt::Display for PartialSend<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.delivered == 0 {
            write!(f, "{}", self.error)
        } else {
            write!(f, "{} ({} sent before the failure)", self.error, self.delivered)
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Unsupported WAV data: {0}")]
    InvalidWav(&'static str),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No config dir")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid legacy JSON: {0}")]
    Legacy(#[from] serde_json::Error),
}
