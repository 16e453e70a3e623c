//! Error types for the `opus-transcode` crate.
//!
//! This module defines [`TranscodeError`], the single error type returned by
//! every pipeline step. Each setup step and each stage of the frame loop maps
//! to its own variant so callers (and the CLI exit status) can tell exactly
//! where a run stopped.

use std::path::PathBuf;

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

/// The unified error type for all transcoding operations.
///
/// Every error is fatal to the run: nothing is retried locally. Variants that
/// originate in FFmpeg keep the raw FFmpeg error code so the CLI can surface
/// it as the process exit status.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TranscodeError {
    /// The input could not be opened for demuxing, or the output sink could
    /// not be opened for writing.
    #[error("Failed to open {path}: {reason}")]
    Open {
        /// Path that was being opened.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
        /// Raw FFmpeg error code.
        code: i32,
    },

    /// The container headers could not be probed for stream parameters.
    #[error("Failed to probe streams in {path}: {reason}")]
    Probe {
        /// Path of the probed input.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
        /// Raw FFmpeg error code.
        code: i32,
    },

    /// The input does not hold exactly one audio stream.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// No decoder or encoder is available for the codec.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A decoder or encoder rejected its parameters.
    #[error("Failed to open codec: {reason}")]
    CodecOpen {
        /// Underlying reason.
        reason: String,
        /// Raw FFmpeg error code.
        code: i32,
    },

    /// The output container context could not be allocated.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// No output container format matches the destination path.
    #[error("Could not find an output format for {path}")]
    UnsupportedOutput {
        /// Destination path whose extension was not recognised.
        path: PathBuf,
    },

    /// The output stream could not be created.
    #[error("Failed to create output stream: {0}")]
    StreamCreation(String),

    /// The container header could not be written.
    #[error("Failed to write container header: {reason}")]
    MuxInit {
        /// Underlying reason.
        reason: String,
        /// Raw FFmpeg error code.
        code: i32,
    },

    /// Reading or decoding the input failed.
    #[error("Failed to decode audio: {reason}")]
    Decode {
        /// Underlying reason.
        reason: String,
        /// Raw FFmpeg error code.
        code: i32,
    },

    /// Adapting or encoding audio failed.
    #[error("Failed to encode audio: {reason}")]
    Encode {
        /// Underlying reason.
        reason: String,
        /// Raw FFmpeg error code.
        code: i32,
    },

    /// An encoded packet could not be written to the container.
    #[error("Failed to write packet: {reason}")]
    MuxWrite {
        /// Underlying reason.
        reason: String,
        /// Raw FFmpeg error code.
        code: i32,
    },

    /// The container trailer could not be written.
    #[error("Failed to finalize output: {reason}")]
    MuxFinalize {
        /// Underlying reason.
        reason: String,
        /// Raw FFmpeg error code.
        code: i32,
    },

    /// A pipeline stage was invoked before the stage it depends on.
    #[error("Pipeline not ready: {0} has not been opened")]
    NotOpened(&'static str),
}

impl TranscodeError {
    /// Build a [`TranscodeError::CodecOpen`] from an FFmpeg error.
    pub(crate) fn codec_open(error: FfmpegError) -> Self {
        TranscodeError::CodecOpen {
            reason: error.to_string(),
            code: error.into(),
        }
    }

    /// Build a [`TranscodeError::Decode`] from an FFmpeg error.
    pub(crate) fn decode(error: FfmpegError) -> Self {
        TranscodeError::Decode {
            reason: error.to_string(),
            code: error.into(),
        }
    }

    /// Build a [`TranscodeError::Encode`] from an FFmpeg error.
    pub(crate) fn encode(error: FfmpegError) -> Self {
        TranscodeError::Encode {
            reason: error.to_string(),
            code: error.into(),
        }
    }

    /// The raw error code carried by this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            TranscodeError::Open { code, .. }
            | TranscodeError::Probe { code, .. }
            | TranscodeError::CodecOpen { code, .. }
            | TranscodeError::MuxInit { code, .. }
            | TranscodeError::Decode { code, .. }
            | TranscodeError::Encode { code, .. }
            | TranscodeError::MuxWrite { code, .. }
            | TranscodeError::MuxFinalize { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Process exit status for this error.
    ///
    /// FFmpeg codes are negative `AVERROR` values; the status is the low byte
    /// of their magnitude. Validation failures, and codes whose low byte is
    /// zero, exit with 1.
    pub fn exit_code(&self) -> i32 {
        match self.code() {
            Some(code) => match code.unsigned_abs() & 0xff {
                0 => 1,
                status => status as i32,
            },
            None => 1,
        }
    }
}
