//! Output pipeline: sink, container, encoder and stream.

use std::path::Path;

use crate::{
    configuration::{TargetCodec, TranscodeOptions},
    error::TranscodeError,
    ledger::{OutputContext, OutputStream, ResourceLedger},
    library::MediaLibrary,
};

impl<L: MediaLibrary> ResourceLedger<L> {
    /// Create the output at `path` with one Opus stream.
    ///
    /// Acquisition order is sink, container context, encoder. The sink is
    /// parked in the ledger until the context exists and then moves into it,
    /// so it is closed before the context is freed whichever step fails.
    ///
    /// # Errors
    ///
    /// - [`TranscodeError::NotOpened`] if [`open_input`](ResourceLedger::open_input)
    ///   has not succeeded.
    /// - [`TranscodeError::Open`] if the destination cannot be written.
    /// - [`TranscodeError::Allocation`] if the container cannot be allocated.
    /// - [`TranscodeError::UnsupportedOutput`] if the extension matches no
    ///   container format.
    /// - [`TranscodeError::UnsupportedCodec`] if no Opus encoder is available.
    /// - [`TranscodeError::StreamCreation`] if the stream cannot be added.
    /// - [`TranscodeError::CodecOpen`] if the encoder rejects its parameters.
    pub fn open_output<P: AsRef<Path>>(
        &mut self,
        path: P,
        options: &TranscodeOptions,
    ) -> Result<(), TranscodeError> {
        let path = path.as_ref();
        let channels = self
            .input_stream()
            .map(|stream| stream.channels)
            .ok_or(TranscodeError::NotOpened("input"))?;
        let target = TargetCodec::Opus;
        log::debug!("Opening output {} ({target})", path.display());

        self.pending_sink = Some(self.library.open_io_sink(path)?);

        let muxer = self.library.alloc_output()?;
        let output = self.output.insert(OutputContext {
            path: path.to_path_buf(),
            muxer,
            sink: None,
            stream: None,
            header_written: false,
            trailer_written: false,
        });
        if let Some(mut sink) = self.pending_sink.take() {
            self.library.attach_sink(&mut output.muxer, &mut sink);
            output.sink = Some(sink);
        }

        self.library.guess_format(&mut output.muxer, path)?;

        let codec = self.library.find_encoder(target).ok_or_else(|| {
            TranscodeError::UnsupportedCodec(format!("could not find an {target} encoder"))
        })?;

        let index = self.library.new_output_stream(&mut output.muxer, &codec)?;

        let settings = options.encoder_settings(target, channels);
        let encoder = self
            .library
            .open_encoder(&mut output.muxer, index, codec, &settings)?;

        log::info!(
            "Output {}: {target} at {} b/s, {} channel(s)",
            path.display(),
            settings.bitrate,
            settings.channels,
        );

        output.stream = Some(OutputStream { index, encoder });
        Ok(())
    }
}
