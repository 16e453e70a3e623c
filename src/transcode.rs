//! Audio transcoding to Opus.
//!
//! [`Transcoder`] drives the whole run: input pipeline, output pipeline,
//! the decode → adapt → encode → mux loop, and a single
//! [`shutdown`](ResourceLedger::shutdown) on every exit path.
//!
//! # Example
//!
//! ```no_run
//! use opus_transcode::{TranscodeError, TranscodeOptions, Transcoder};
//!
//! let summary = Transcoder::new("input.flac", "output.opus")
//!     .options(TranscodeOptions::new().with_bitrate(96_000))
//!     .run()?;
//! println!("wrote {} packets", summary.packets_written);
//! # Ok::<(), TranscodeError>(())
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use ffmpeg_next::{Rational, Rescale};

use crate::{
    configuration::TranscodeOptions,
    error::TranscodeError,
    ffmpeg_library::FfmpegLibrary,
    ledger::{InputContext, OutputContext, OutputStream, ResourceLedger},
    library::{DecodedFrame, EncodedPacket, MediaLibrary},
};

/// Counters reported by a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeSummary {
    /// Samples per channel produced by the decoder.
    pub input_samples: u64,
    /// Samples per channel sent to the encoder, after resampling.
    pub encoded_samples: u64,
    /// Packets written to the container.
    pub packets_written: u64,
    /// Encoder sample rate in Hz.
    pub sample_rate: u32,
}

impl TranscodeSummary {
    /// Duration of the encoded audio.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.encoded_samples as f64 / f64::from(self.sample_rate))
    }
}

/// Restamps encoder packets for the output stream.
///
/// Packets without a pts continue from the end of the previous packet.
/// Timestamps are rescaled from the encoder time base to the stream time
/// base, and dts is kept strictly increasing.
#[derive(Debug, Clone)]
pub struct PacketTimeline {
    source: Rational,
    destination: Rational,
    stream_index: usize,
    next_pts: i64,
    last_dts: Option<i64>,
}

impl PacketTimeline {
    /// Create a timeline from `source` to `destination` for `stream_index`.
    pub fn new(source: Rational, destination: Rational, stream_index: usize) -> Self {
        Self {
            source,
            destination,
            stream_index,
            next_pts: 0,
            last_dts: None,
        }
    }

    /// Route `packet` to the output stream and rewrite its timing.
    pub fn stamp<P: EncodedPacket>(&mut self, packet: &mut P) {
        let duration = packet.duration().max(0);
        let pts = packet.pts().unwrap_or(self.next_pts);
        let dts = packet.dts().unwrap_or(pts);
        self.next_pts = self.next_pts.max(pts + duration);

        let mut pts = pts.rescale(self.source, self.destination);
        let mut dts = dts.rescale(self.source, self.destination);
        let duration = duration.rescale(self.source, self.destination);

        if let Some(last_dts) = self.last_dts
            && dts <= last_dts
        {
            log::warn!("Non-monotonic dts {dts} after {last_dts}, adjusting");
            dts = last_dts + 1;
        }
        if pts < dts {
            pts = dts;
        }
        self.last_dts = Some(dts);

        packet.set_stream_index(self.stream_index);
        packet.set_timestamps(Some(pts), Some(dts), duration);
    }
}

/// Borrowed view of everything the frame loop touches.
struct Stage<'a, L: MediaLibrary> {
    library: &'a mut L,
    demuxer: &'a mut L::Demuxer,
    input_index: usize,
    decoder: &'a mut L::Decoder,
    adapter: L::Adapter,
    encoder: &'a mut L::Encoder,
    muxer: &'a mut L::Muxer,
    timeline: PacketTimeline,
    summary: TranscodeSummary,
}

impl<L: MediaLibrary> Stage<'_, L> {
    fn pump(mut self) -> Result<TranscodeSummary, TranscodeError> {
        while let Some(packet) = self.library.read_packet(self.demuxer)? {
            if packet.stream_index() != self.input_index {
                continue;
            }
            self.decode(Some(&packet))?;
        }

        // Drain decoder, adapter and encoder in that order.
        self.decode(None)?;
        let tail = self.library.adapt_frame(&mut self.adapter, None)?;
        self.encode(tail)?;
        self.library.send_frame_to_encoder(self.encoder, None)?;
        self.mux()?;

        Ok(self.summary)
    }

    fn decode(&mut self, packet: Option<&L::Packet>) -> Result<(), TranscodeError> {
        self.library.send_packet_to_decoder(self.decoder, packet)?;
        while let Some(frame) = self.library.receive_frame(self.decoder)? {
            self.summary.input_samples += frame.samples() as u64;
            let frames = self.library.adapt_frame(&mut self.adapter, Some(frame))?;
            self.encode(frames)?;
        }
        Ok(())
    }

    fn encode(&mut self, frames: Vec<L::Frame>) -> Result<(), TranscodeError> {
        for frame in frames {
            self.summary.encoded_samples += frame.samples() as u64;
            self.library.send_frame_to_encoder(self.encoder, Some(&frame))?;
            self.mux()?;
        }
        Ok(())
    }

    fn mux(&mut self) -> Result<(), TranscodeError> {
        while let Some(mut packet) = self.library.receive_packet(self.encoder)? {
            self.timeline.stamp(&mut packet);
            self.library.write_packet(self.muxer, &mut packet)?;
            self.summary.packets_written += 1;
        }
        Ok(())
    }
}

impl<L: MediaLibrary> ResourceLedger<L> {
    /// Run the frame loop between the opened input and output.
    ///
    /// # Errors
    ///
    /// - [`TranscodeError::NotOpened`] unless both pipelines have succeeded.
    /// - [`TranscodeError::MuxInit`] if the header cannot be written.
    /// - [`TranscodeError::Decode`], [`TranscodeError::Encode`] or
    ///   [`TranscodeError::MuxWrite`] on the first failing packet or frame.
    /// - [`TranscodeError::MuxFinalize`] if the trailer cannot be written.
    pub fn run(&mut self) -> Result<TranscodeSummary, TranscodeError> {
        let InputContext {
            demuxer,
            stream,
            decoder,
            ..
        } = self.input.as_mut().ok_or(TranscodeError::NotOpened("input"))?;
        let input_index = stream
            .as_ref()
            .map(|stream| stream.index)
            .ok_or(TranscodeError::NotOpened("input stream"))?;
        let decoder = decoder.as_mut().ok_or(TranscodeError::NotOpened("decoder"))?;

        let OutputContext {
            muxer,
            stream,
            header_written,
            trailer_written,
            ..
        } = self.output.as_mut().ok_or(TranscodeError::NotOpened("output"))?;
        let OutputStream { index, encoder } = stream
            .as_mut()
            .ok_or(TranscodeError::NotOpened("output stream"))?;

        self.library.write_header(muxer)?;
        *header_written = true;

        let encoder_time_base = self.library.encoder_time_base(encoder);
        let timeline = PacketTimeline::new(
            encoder_time_base,
            self.library.stream_time_base(muxer, *index),
            *index,
        );
        let adapter = self.library.open_adapter(encoder)?;

        let sample_rate = if encoder_time_base.numerator() > 0 {
            (encoder_time_base.denominator() / encoder_time_base.numerator()) as u32
        } else {
            0
        };

        let summary = Stage {
            library: &mut self.library,
            demuxer,
            input_index,
            decoder,
            adapter,
            encoder,
            muxer: &mut *muxer,
            timeline,
            summary: TranscodeSummary {
                sample_rate,
                ..TranscodeSummary::default()
            },
        }
        .pump()?;

        self.library.write_trailer(muxer)?;
        *trailer_written = true;

        log::info!(
            "Transcoded {} samples into {} packets ({:?})",
            summary.input_samples,
            summary.packets_written,
            summary.duration(),
        );
        Ok(summary)
    }
}

/// Builder and driver for a complete transcode.
#[derive(Debug, Clone)]
pub struct Transcoder {
    input: PathBuf,
    output: PathBuf,
    options: TranscodeOptions,
}

impl Transcoder {
    /// Transcode `input` into `output`. The output container follows the
    /// extension of `output`.
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(input: P1, output: P2) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            options: TranscodeOptions::default(),
        }
    }

    /// Replace the transcode options.
    #[must_use]
    pub fn options(mut self, options: TranscodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Run with FFmpeg.
    ///
    /// # Errors
    ///
    /// Any [`TranscodeError`]; see [`run_with`](Transcoder::run_with).
    pub fn run(&self) -> Result<TranscodeSummary, TranscodeError> {
        self.run_with(FfmpegLibrary::new()?)
    }

    /// Run with the given media library.
    ///
    /// Resources are released exactly once whether the run succeeds or
    /// fails. On failure the output file stays on disk and is invalid,
    /// unless [`TranscodeOptions::remove_partial_output`] is set.
    ///
    /// # Errors
    ///
    /// The first error raised by the input pipeline, the output pipeline or
    /// the frame loop.
    pub fn run_with<L: MediaLibrary>(&self, library: L) -> Result<TranscodeSummary, TranscodeError> {
        log::info!(
            "Transcoding {} to {}",
            self.input.display(),
            self.output.display()
        );

        let mut ledger = ResourceLedger::new(library);
        let result = self.execute(&mut ledger);
        let report = ledger.shutdown();
        log::debug!("Shutdown released {report:?}");

        if result.is_err() && report.sink && self.options.remove_partial_output {
            match fs::remove_file(&self.output) {
                Ok(()) => log::info!("Removed partial output {}", self.output.display()),
                Err(error) => log::warn!(
                    "Could not remove partial output {}: {error}",
                    self.output.display()
                ),
            }
        }

        result
    }

    fn execute<L: MediaLibrary>(
        &self,
        ledger: &mut ResourceLedger<L>,
    ) -> Result<TranscodeSummary, TranscodeError> {
        ledger.open_input(&self.input)?;
        ledger.open_output(&self.output, &self.options)?;
        ledger.run()
    }
}
