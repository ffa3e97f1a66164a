//! # Audio Module
//!
//! Handles the audio half of the voice protocol: accumulating streamed PCM
//! fragments for one utterance and assembling them into a single decodable
//! clip for the transcription pipeline.
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 24kHz (24,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers, base64 in transport

pub mod buffer;
