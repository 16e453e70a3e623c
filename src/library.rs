//! The media library collaborator.
//!
//! The pipeline never touches FFmpeg directly. Every demux, codec and mux
//! operation goes through [`MediaLibrary`], whose associated types are the
//! owned handles the [`ResourceLedger`](crate::ResourceLedger) tracks. The
//! production implementation is [`FfmpegLibrary`](crate::FfmpegLibrary); the
//! test suite drives the same pipeline with an instrumented double that
//! counts acquisitions and releases.
//!
//! Flush is expressed as `None`: a `None` packet sent to the decoder, a
//! `None` frame sent to the adapter or the encoder.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};

use ffmpeg_next::{Rational, codec::Id, media::Type};

use crate::{
    configuration::{EncoderSettings, TargetCodec},
    error::TranscodeError,
};

/// Kind of media carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Audio samples.
    Audio,
    /// Video pictures.
    Video,
    /// Subtitles.
    Subtitle,
    /// Data, attachments or anything unknown.
    Other,
}

impl From<Type> for MediaKind {
    fn from(medium: Type) -> Self {
        match medium {
            Type::Audio => MediaKind::Audio,
            Type::Video => MediaKind::Video,
            Type::Subtitle => MediaKind::Subtitle,
            _ => MediaKind::Other,
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Subtitle => write!(f, "subtitle"),
            MediaKind::Other => write!(f, "data"),
        }
    }
}

/// Stream metadata discovered by probing.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Index of the stream in its container.
    pub index: usize,
    /// Media kind.
    pub kind: MediaKind,
    /// Codec of the stream's packets.
    pub codec_id: Id,
    /// Short codec name.
    pub codec_name: String,
    /// Time base of the stream's packet timestamps.
    pub time_base: Rational,
    /// Sample rate in Hz (0 when unknown).
    pub sample_rate: u32,
    /// Channel count (0 when unknown).
    pub channels: u16,
}

/// Timing and routing view of a compressed packet.
pub trait EncodedPacket {
    /// Index of the stream the packet belongs to.
    fn stream_index(&self) -> usize;
    /// Route the packet to another stream.
    fn set_stream_index(&mut self, index: usize);
    /// Presentation timestamp.
    fn pts(&self) -> Option<i64>;
    /// Decoding timestamp.
    fn dts(&self) -> Option<i64>;
    /// Duration in the packet's time base (0 when unknown).
    fn duration(&self) -> i64;
    /// Replace all timing fields at once.
    fn set_timestamps(&mut self, pts: Option<i64>, dts: Option<i64>, duration: i64);
}

/// Sample-count view of a raw audio frame.
pub trait DecodedFrame {
    /// Number of samples per channel.
    fn samples(&self) -> usize;
}

/// The demux/decode/encode/mux capability provider.
///
/// Acquiring methods return owned handles; releasing methods consume them.
/// Decoders and encoders are released by dropping them, since they are
/// children of the input context and the output stream respectively.
pub trait MediaLibrary {
    /// An open demuxer.
    type Demuxer;
    /// An open decoder.
    type Decoder;
    /// A resolved (not yet opened) decoder or encoder implementation.
    type Codec;
    /// An open output I/O sink.
    type Sink;
    /// An allocated output container context.
    type Muxer;
    /// An open encoder.
    type Encoder;
    /// Converter from decoder output to encoder input.
    type Adapter;
    /// A compressed packet.
    type Packet: EncodedPacket;
    /// A raw audio frame.
    type Frame: DecodedFrame;

    /// Open `path` for demuxing.
    fn open_demux(&mut self, path: &Path) -> Result<Self::Demuxer, TranscodeError>;

    /// Read enough of the container to fill in stream parameters.
    fn probe_streams(
        &mut self,
        demuxer: &mut Self::Demuxer,
    ) -> Result<Vec<StreamInfo>, TranscodeError>;

    /// Resolve a decoder for the stream's codec.
    fn find_decoder(&mut self, stream: &StreamInfo) -> Option<Self::Codec>;

    /// Open `codec` as a decoder for `stream` with default parameters.
    fn open_decoder(
        &mut self,
        demuxer: &Self::Demuxer,
        stream: &StreamInfo,
        codec: Self::Codec,
    ) -> Result<Self::Decoder, TranscodeError>;

    /// Read the next packet. `Ok(None)` is end of input.
    fn read_packet(
        &mut self,
        demuxer: &mut Self::Demuxer,
    ) -> Result<Option<Self::Packet>, TranscodeError>;

    /// Feed a packet to the decoder, or `None` to flush it.
    fn send_packet_to_decoder(
        &mut self,
        decoder: &mut Self::Decoder,
        packet: Option<&Self::Packet>,
    ) -> Result<(), TranscodeError>;

    /// Take the next decoded frame. `Ok(None)` means the decoder needs more
    /// input or is fully drained.
    fn receive_frame(
        &mut self,
        decoder: &mut Self::Decoder,
    ) -> Result<Option<Self::Frame>, TranscodeError>;

    /// Close the demuxer.
    fn close_demux(&mut self, demuxer: Self::Demuxer);

    /// Open `path` for writing, creating or truncating it.
    fn open_io_sink(&mut self, path: &Path) -> Result<Self::Sink, TranscodeError>;

    /// Allocate an empty output container context.
    fn alloc_output(&mut self) -> Result<Self::Muxer, TranscodeError>;

    /// Make `sink` the I/O target of `muxer`. Ownership of the sink stays
    /// with the caller, which must close it before freeing the muxer.
    fn attach_sink(&mut self, muxer: &mut Self::Muxer, sink: &mut Self::Sink);

    /// Pick the container format from the extension of `path`.
    fn guess_format(&mut self, muxer: &mut Self::Muxer, path: &Path)
    -> Result<(), TranscodeError>;

    /// Resolve an encoder for `target`.
    fn find_encoder(&mut self, target: TargetCodec) -> Option<Self::Codec>;

    /// Add a stream for `codec` to the container, returning its index.
    fn new_output_stream(
        &mut self,
        muxer: &mut Self::Muxer,
        codec: &Self::Codec,
    ) -> Result<usize, TranscodeError>;

    /// Open `codec` as the encoder of stream `stream_index` and publish its
    /// parameters on that stream.
    fn open_encoder(
        &mut self,
        muxer: &mut Self::Muxer,
        stream_index: usize,
        codec: Self::Codec,
        settings: &EncoderSettings,
    ) -> Result<Self::Encoder, TranscodeError>;

    /// Build the adapter that turns decoded frames into frames `encoder`
    /// accepts.
    fn open_adapter(&mut self, encoder: &Self::Encoder) -> Result<Self::Adapter, TranscodeError>;

    /// Adapt one frame, or `None` to drain everything still buffered.
    fn adapt_frame(
        &mut self,
        adapter: &mut Self::Adapter,
        frame: Option<Self::Frame>,
    ) -> Result<Vec<Self::Frame>, TranscodeError>;

    /// Feed a frame to the encoder, or `None` to flush it.
    fn send_frame_to_encoder(
        &mut self,
        encoder: &mut Self::Encoder,
        frame: Option<&Self::Frame>,
    ) -> Result<(), TranscodeError>;

    /// Take the next encoded packet. `Ok(None)` means the encoder needs more
    /// input or is fully drained.
    fn receive_packet(
        &mut self,
        encoder: &mut Self::Encoder,
    ) -> Result<Option<Self::Packet>, TranscodeError>;

    /// Time base of the packets the encoder produces.
    fn encoder_time_base(&self, encoder: &Self::Encoder) -> Rational;

    /// Time base of an output stream. Only stable after the header is
    /// written.
    fn stream_time_base(&self, muxer: &Self::Muxer, stream_index: usize) -> Rational;

    /// Write the container header.
    fn write_header(&mut self, muxer: &mut Self::Muxer) -> Result<(), TranscodeError>;

    /// Write one packet, already routed and stamped in the stream time base.
    fn write_packet(
        &mut self,
        muxer: &mut Self::Muxer,
        packet: &mut Self::Packet,
    ) -> Result<(), TranscodeError>;

    /// Write the container trailer.
    fn write_trailer(&mut self, muxer: &mut Self::Muxer) -> Result<(), TranscodeError>;

    /// Detach `sink` from `muxer` (if attached) and close it.
    fn close_io_sink(&mut self, muxer: Option<&mut Self::Muxer>, sink: Self::Sink);

    /// Free the container context.
    fn free_context(&mut self, muxer: Self::Muxer);
}
