//! PCM helpers shared by the voice recorder and player. The cpal device
//! backends are behind the `audio` feature.

#[cfg(feature = "audio")]
pub mod device;
pub mod pcm;
pub mod wav;
