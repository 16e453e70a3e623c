//! Resource ownership and the single release path.
//!
//! [`ResourceLedger`] owns the [`MediaLibrary`] and every handle acquired from
//! it. A slot holds a value if and only if the call that acquired it
//! succeeded, and release empties slots with `Option::take`, so releasing
//! twice is harmless. Release runs in a fixed order:
//!
//! 1. the input context: decoder dropped, then the demuxer closed;
//! 2. a sink opened before its container context existed;
//! 3. the output context: stream and encoder dropped, then the I/O sink
//!    closed, then the container context freed.
//!
//! [`shutdown`](ResourceLedger::shutdown) is the explicit exit path for both
//! success and failure; `Drop` runs the same release for anything still held.

use std::path::PathBuf;

use crate::library::{MediaLibrary, StreamInfo};

/// An open input: demuxer, its single audio stream, and the decoder.
pub struct InputContext<L: MediaLibrary> {
    pub(crate) path: PathBuf,
    pub(crate) demuxer: L::Demuxer,
    pub(crate) stream: Option<StreamInfo>,
    pub(crate) decoder: Option<L::Decoder>,
}

/// The single output stream and the encoder it owns.
pub struct OutputStream<L: MediaLibrary> {
    pub(crate) index: usize,
    pub(crate) encoder: L::Encoder,
}

/// An allocated output container with its attached sink.
pub struct OutputContext<L: MediaLibrary> {
    pub(crate) path: PathBuf,
    pub(crate) muxer: L::Muxer,
    pub(crate) sink: Option<L::Sink>,
    pub(crate) stream: Option<OutputStream<L>>,
    pub(crate) header_written: bool,
    pub(crate) trailer_written: bool,
}

/// What a [`ResourceLedger::shutdown`] call released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// The input context was closed.
    pub input: bool,
    /// The output I/O sink was closed.
    pub sink: bool,
    /// The output container context was freed.
    pub output: bool,
    /// The output was closed before its trailer was written.
    pub output_incomplete: bool,
}

impl ReleaseReport {
    /// `true` when nothing was released.
    pub fn is_empty(&self) -> bool {
        !self.input && !self.sink && !self.output
    }
}

/// Owner of the media library and all resources acquired through it.
pub struct ResourceLedger<L: MediaLibrary> {
    pub(crate) library: L,
    pub(crate) input: Option<InputContext<L>>,
    /// Sink opened before the container context that will own it exists.
    pub(crate) pending_sink: Option<L::Sink>,
    pub(crate) output: Option<OutputContext<L>>,
}

impl<L: MediaLibrary> ResourceLedger<L> {
    /// Create an empty ledger around `library`.
    pub fn new(library: L) -> Self {
        Self {
            library,
            input: None,
            pending_sink: None,
            output: None,
        }
    }

    /// Whether an input context is held.
    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    /// Whether an output sink is held, attached or not.
    pub fn has_sink(&self) -> bool {
        self.pending_sink.is_some()
            || self.output.as_ref().is_some_and(|output| output.sink.is_some())
    }

    /// Whether an output container context is held.
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// The probed input stream, once the input pipeline has run.
    pub fn input_stream(&self) -> Option<&StreamInfo> {
        self.input.as_ref().and_then(|input| input.stream.as_ref())
    }

    /// Release every held resource in the fixed order.
    ///
    /// Safe to call any number of times; later calls release nothing.
    pub fn shutdown(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();

        if let Some(mut input) = self.input.take() {
            drop(input.decoder.take());
            log::debug!("Closing input {}", input.path.display());
            self.library.close_demux(input.demuxer);
            report.input = true;
        }

        if let Some(sink) = self.pending_sink.take() {
            log::debug!("Closing unattached output sink");
            self.library.close_io_sink(None, sink);
            report.sink = true;
        }

        if let Some(mut output) = self.output.take() {
            drop(output.stream.take());
            if let Some(sink) = output.sink.take() {
                log::debug!("Closing output sink for {}", output.path.display());
                self.library.close_io_sink(Some(&mut output.muxer), sink);
                report.sink = true;
            }
            if output.header_written && !output.trailer_written {
                log::warn!(
                    "Output {} is incomplete and must not be used",
                    output.path.display()
                );
                report.output_incomplete = true;
            }
            log::debug!("Freeing output context for {}", output.path.display());
            self.library.free_context(output.muxer);
            report.output = true;
        }

        report
    }
}

impl<L: MediaLibrary> Drop for ResourceLedger<L> {
    fn drop(&mut self) {
        let report = self.shutdown();
        if !report.is_empty() {
            log::debug!("Released resources on drop: {report:?}");
        }
    }
}
