//! Input pipeline: open, probe, validate, and open the decoder.

use std::path::Path;

use crate::{
    error::TranscodeError,
    ledger::{InputContext, ResourceLedger},
    library::{MediaKind, MediaLibrary, StreamInfo},
};

impl<L: MediaLibrary> ResourceLedger<L> {
    /// Open `path` and prepare a decoder for its single audio stream.
    ///
    /// The demuxer is recorded in the ledger as soon as it opens, so every
    /// later failure in this method still gets it closed by
    /// [`shutdown`](ResourceLedger::shutdown).
    ///
    /// # Errors
    ///
    /// - [`TranscodeError::Open`] if the file cannot be opened or its
    ///   container is not recognised.
    /// - [`TranscodeError::Probe`] if stream parameters cannot be determined.
    /// - [`TranscodeError::UnsupportedInput`] unless there is exactly one
    ///   stream and it is audio.
    /// - [`TranscodeError::UnsupportedCodec`] if no decoder exists.
    /// - [`TranscodeError::CodecOpen`] if the decoder cannot be opened.
    pub fn open_input<P: AsRef<Path>>(&mut self, path: P) -> Result<StreamInfo, TranscodeError> {
        let path = path.as_ref();
        log::debug!("Opening input {}", path.display());

        let demuxer = self.library.open_demux(path)?;
        let input = self.input.insert(InputContext {
            path: path.to_path_buf(),
            demuxer,
            stream: None,
            decoder: None,
        });

        let streams = self.library.probe_streams(&mut input.demuxer)?;
        let stream = select_single_audio_stream(streams)?;

        let codec = self.library.find_decoder(&stream).ok_or_else(|| {
            TranscodeError::UnsupportedCodec(format!(
                "could not find a decoder for {}",
                stream.codec_name
            ))
        })?;
        let decoder = self.library.open_decoder(&input.demuxer, &stream, codec)?;

        log::info!(
            "Input {}: {} at {} Hz, {} channel(s)",
            path.display(),
            stream.codec_name,
            stream.sample_rate,
            stream.channels,
        );

        input.decoder = Some(decoder);
        input.stream = Some(stream.clone());
        Ok(stream)
    }
}

/// Enforce the one-stream contract.
fn select_single_audio_stream(mut streams: Vec<StreamInfo>) -> Result<StreamInfo, TranscodeError> {
    match streams.len() {
        0 => Err(TranscodeError::UnsupportedInput("no stream in file".to_string())),
        1 => {
            let stream = streams.remove(0);
            if stream.kind == MediaKind::Audio {
                Ok(stream)
            } else {
                Err(TranscodeError::UnsupportedInput(format!(
                    "stream {} is {}, not audio",
                    stream.index, stream.kind
                )))
            }
        }
        _ => Err(TranscodeError::UnsupportedInput(
            "more than one audio stream in file".to_string(),
        )),
    }
}
