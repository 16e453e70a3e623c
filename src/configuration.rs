//! Transcode configuration.
//!
//! [`TranscodeOptions`] is a builder carrying the few knobs the pipeline
//! exposes. The target codec is fixed to Opus; only its encoder parameters
//! are tunable.
//!
//! # Example
//!
//! ```
//! use opus_transcode::TranscodeOptions;
//!
//! let options = TranscodeOptions::new()
//!     .with_bitrate(96_000)
//!     .with_compression_level(10);
//! assert_eq!(options.bitrate, 96_000);
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};

use ffmpeg_next::codec::Id;

/// Default Opus bitrate in bits per second.
pub const DEFAULT_BITRATE: usize = 128_000;

/// Opus always runs its internal clock at 48 kHz.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// The codec produced by the pipeline.
///
/// There is exactly one target; the enum exists so the collaborator
/// interface names what it is asked to find instead of taking a bare id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetCodec {
    /// Opus (RFC 6716).
    #[default]
    Opus,
}

impl TargetCodec {
    /// FFmpeg codec id of the target.
    pub fn codec_id(self) -> Id {
        match self {
            TargetCodec::Opus => Id::OPUS,
        }
    }

    /// Encoder implementations to try by name, most preferred first.
    ///
    /// FFmpeg's native Opus encoder is still flagged experimental, so the
    /// libopus wrapper wins when the build has it.
    pub fn preferred_encoders(self) -> &'static [&'static str] {
        match self {
            TargetCodec::Opus => &["libopus", "opus"],
        }
    }
}

impl Display for TargetCodec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TargetCodec::Opus => write!(f, "Opus"),
        }
    }
}

/// User-facing transcode options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOptions {
    /// Target bitrate in bits per second.
    pub bitrate: usize,
    /// Encoder compression level (libopus: 0 fastest, 10 best). `None` keeps
    /// the encoder default.
    pub compression_level: Option<usize>,
    /// Preferred output sample rate. Falls back to 48 kHz when the encoder
    /// does not support it.
    pub sample_rate: u32,
    /// Delete the output file when the run fails after it was created.
    pub remove_partial_output: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            compression_level: None,
            sample_rate: OPUS_SAMPLE_RATE,
            remove_partial_output: false,
        }
    }
}

impl TranscodeOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target bitrate in bits per second.
    #[must_use]
    pub fn with_bitrate(mut self, bitrate: usize) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Set the encoder compression level.
    #[must_use]
    pub fn with_compression_level(mut self, level: usize) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Set the preferred output sample rate.
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Remove the output file if the run fails.
    #[must_use]
    pub fn with_remove_partial_output(mut self, remove: bool) -> Self {
        self.remove_partial_output = remove;
        self
    }

    /// Resolve the encoder-facing settings for an input with `channels`
    /// channels.
    pub(crate) fn encoder_settings(&self, target: TargetCodec, channels: u16) -> EncoderSettings {
        EncoderSettings {
            target,
            bitrate: self.bitrate,
            compression_level: self.compression_level,
            sample_rate: self.sample_rate,
            channels: if channels <= 1 { 1 } else { 2 },
        }
    }
}

/// Encoder parameters handed to [`MediaLibrary::open_encoder`](crate::MediaLibrary::open_encoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Codec being opened.
    pub target: TargetCodec,
    /// Target bitrate in bits per second.
    pub bitrate: usize,
    /// Optional compression level.
    pub compression_level: Option<usize>,
    /// Preferred sample rate.
    pub sample_rate: u32,
    /// Output channel count, mono or stereo.
    pub channels: u16,
}
