//! # Audio Buffer Assembly
//!
//! Accumulates the PCM fragments of one spoken utterance and assembles them
//! into a single contiguous clip when the client commits.
//!
//! ## Key Properties:
//! - **Arrival order**: fragments are concatenated exactly as they came in.
//!   The client is the single producer for its session, so no reordering or
//!   gap-filling happens here.
//! - **Reset on commit**: a successful commit hands the whole clip out and
//!   leaves the assembler empty for the next utterance.
//! - **Bounded memory**: O(total bytes) for the current utterance, with a
//!   configurable ceiling so a runaway client cannot grow the buffer forever.
//!
//! The assembler is owned by its session's actor and only ever touched from
//! that one mailbox, so it needs no locking.

use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// One complete utterance, decoded to samples and ready for transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// 16-bit signed mono samples
    pub samples: Vec<i16>,

    /// Sample rate the clip was recorded at
    pub sample_rate: u32,
}

impl AudioClip {
    /// Duration of the clip in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Re-encode the samples as little-endian PCM bytes (the format the
    /// upstream transcription service accepts).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// Per-session fragment accumulator.
pub struct AudioAssembler {
    /// Decoded fragments in arrival order
    fragments: Vec<Vec<i16>>,

    /// Running sample count across all fragments
    total_samples: usize,

    /// Ceiling on accumulated bytes for one utterance
    max_bytes: usize,

    sample_rate: u32,
}

impl AudioAssembler {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            fragments: Vec::new(),
            total_samples: 0,
            max_bytes: config.max_utterance_bytes,
            sample_rate: config.sample_rate,
        }
    }

    /// Append one raw PCM fragment to the active utterance.
    ///
    /// ## Parameters:
    /// - **data**: raw bytes, 16-bit little-endian samples (already
    ///   base64-decoded by the protocol layer)
    ///
    /// ## Errors:
    /// `ValidationError` for an empty or odd-length fragment, or when the
    /// fragment would push the utterance past its byte ceiling. A rejected
    /// fragment leaves previously appended audio intact.
    pub fn append(&mut self, data: &[u8]) -> AppResult<()> {
        if data.is_empty() {
            return Err(AppError::ValidationError("audio fragment is empty".to_string()));
        }
        if data.len() % 2 != 0 {
            return Err(AppError::ValidationError(
                "audio fragment length must be even for 16-bit samples".to_string(),
            ));
        }
        if (self.total_samples * 2) + data.len() > self.max_bytes {
            return Err(AppError::ValidationError(format!(
                "utterance exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        // Convert raw bytes to 16-bit signed integers (little-endian).
        let mut cursor = Cursor::new(data);
        let mut samples = Vec::with_capacity(data.len() / 2);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            samples.push(sample);
        }

        self.total_samples += samples.len();
        self.fragments.push(samples);
        Ok(())
    }

    /// Concatenate every appended fragment into one clip and reset.
    ///
    /// ## Errors:
    /// `EmptyBuffer` when nothing was appended since the last commit — the
    /// protocol layer turns this into an error frame rather than invoking
    /// the pipeline with silence.
    pub fn commit(&mut self) -> AppResult<AudioClip> {
        if self.fragments.is_empty() {
            return Err(AppError::EmptyBuffer);
        }

        let mut samples = Vec::with_capacity(self.total_samples);
        for fragment in self.fragments.drain(..) {
            samples.extend(fragment);
        }
        self.total_samples = 0;

        Ok(AudioClip {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    /// Number of fragments currently accumulated.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Whether nothing has been appended since the last commit.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Drop any accumulated audio (used on error recovery and teardown).
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.total_samples = 0;
    }
}
