//! The FFmpeg implementation of [`MediaLibrary`].
//!
//! Demuxing and decoding use `ffmpeg-next`'s safe wrappers. The output side
//! is built from raw `ffmpeg-sys-next` calls because the pipeline needs the
//! I/O sink and the container context as two separately owned resources,
//! which the safe `format::output` constructor fuses into one.

use std::{
    ffi::CString,
    path::{Path, PathBuf},
    ptr,
};

use ffmpeg_next::{
    ChannelLayout, Codec, Error as FfmpegError, Packet, Rational,
    codec::{Capabilities, Compliance, context::Context as CodecContext},
    decoder::Audio as AudioDecoder,
    encoder::audio::Encoder as AudioEncoder,
    format::{Sample, context::Input, sample::Type as SampleType},
    frame::Audio as AudioFrame,
    util::error::EAGAIN,
};
use ffmpeg_sys_next::{AVFormatContext, AVIOContext, AVRational, AVStream};

use crate::{
    adapter::FrameAdapter,
    configuration::{EncoderSettings, OPUS_SAMPLE_RATE, TargetCodec},
    error::TranscodeError,
    library::{DecodedFrame, EncodedPacket, MediaLibrary, StreamInfo},
};

/// Encoder frame size assumed when the codec does not report one.
const OPUS_FRAME_SIZE: usize = 960;

/// An open, writable `AVIOContext`.
///
/// Closed on drop unless it was already closed explicitly.
pub struct OutputSink {
    path: PathBuf,
    ptr: *mut AVIOContext,
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: the sink owns `ptr` alone. Any container it was attached
            // to has had its `pb` cleared by `close_io_sink` or its own drop,
            // so this is the only close.
            unsafe {
                ffmpeg_sys_next::avio_closep(&mut self.ptr);
            }
        }
    }
}

/// An allocated output `AVFormatContext`.
///
/// The context never owns its `pb`: the sink is detached before the context
/// is freed, and the drop path clears `pb` so a still-attached sink is not
/// closed twice.
pub struct OutputContainer {
    ptr: *mut AVFormatContext,
}

impl OutputContainer {
    fn stream(&self, index: usize) -> Option<*mut AVStream> {
        // SAFETY: `ptr` is a live context from `avformat_alloc_context`, and
        // `streams` holds `nb_streams` valid entries.
        unsafe {
            if index >= (*self.ptr).nb_streams as usize {
                return None;
            }
            Some(*(*self.ptr).streams.add(index))
        }
    }
}

impl Drop for OutputContainer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: `pb` is borrowed from an `OutputSink`, never owned. It
            // is cleared first so `avformat_free_context` cannot touch a sink
            // that is closed separately.
            unsafe {
                (*self.ptr).pb = ptr::null_mut();
                ffmpeg_sys_next::avformat_free_context(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// An opened Opus encoder and the properties the frame loop needs.
pub struct OpusEncoder {
    encoder: AudioEncoder,
    time_base: Rational,
    frame_size: usize,
    small_last_frame: bool,
}

/// [`MediaLibrary`] backed by the system FFmpeg libraries.
#[derive(Debug)]
pub struct FfmpegLibrary {
    _initialised: (),
}

impl FfmpegLibrary {
    /// Initialise FFmpeg (idempotent) and create the library.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::Allocation`] if FFmpeg fails to initialise.
    pub fn new() -> Result<Self, TranscodeError> {
        ffmpeg_next::init().map_err(|error| {
            TranscodeError::Allocation(format!("FFmpeg initialisation failed: {error}"))
        })?;
        Ok(Self { _initialised: () })
    }
}

fn c_path(path: &Path) -> Option<CString> {
    CString::new(path.to_string_lossy().as_bytes()).ok()
}

fn open_error(path: &Path, error: FfmpegError) -> TranscodeError {
    TranscodeError::Open {
        path: path.to_path_buf(),
        reason: error.to_string(),
        code: error.into(),
    }
}

/// Pick the encoder sample rate: the requested one when supported, else
/// 48 kHz, else whatever the encoder lists first.
fn choose_sample_rate(supported: Option<Vec<i32>>, requested: u32) -> u32 {
    let Some(rates) = supported.filter(|rates| !rates.is_empty()) else {
        return requested;
    };
    [requested, OPUS_SAMPLE_RATE]
        .into_iter()
        .find(|rate| rates.contains(&(*rate as i32)))
        .unwrap_or(rates[0].max(1) as u32)
}

impl MediaLibrary for FfmpegLibrary {
    type Demuxer = Input;
    type Decoder = AudioDecoder;
    type Codec = Codec;
    type Sink = OutputSink;
    type Muxer = OutputContainer;
    type Encoder = OpusEncoder;
    type Adapter = FrameAdapter;
    type Packet = Packet;
    type Frame = AudioFrame;

    fn open_demux(&mut self, path: &Path) -> Result<Input, TranscodeError> {
        let c_path = c_path(path).ok_or_else(|| open_error(path, FfmpegError::InvalidData))?;
        let mut context: *mut AVFormatContext = ptr::null_mut();
        // SAFETY: `c_path` outlives the call. On success `context` is a fresh
        // input context handed to `Input`, which closes it on drop.
        let code = unsafe {
            ffmpeg_sys_next::avformat_open_input(
                &mut context,
                c_path.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
            )
        };
        if code < 0 {
            return Err(open_error(path, FfmpegError::from(code)));
        }
        Ok(unsafe { Input::wrap(context) })
    }

    fn probe_streams(&mut self, demuxer: &mut Input) -> Result<Vec<StreamInfo>, TranscodeError> {
        // SAFETY: the demuxer is open; `url` is either null or a C string
        // owned by the context.
        let code =
            unsafe { ffmpeg_sys_next::avformat_find_stream_info(demuxer.as_mut_ptr(), ptr::null_mut()) };
        if code < 0 {
            let error = FfmpegError::from(code);
            let path = unsafe {
                let url = (*demuxer.as_ptr()).url;
                if url.is_null() {
                    PathBuf::new()
                } else {
                    PathBuf::from(std::ffi::CStr::from_ptr(url).to_string_lossy().into_owned())
                }
            };
            return Err(TranscodeError::Probe {
                path,
                reason: error.to_string(),
                code,
            });
        }

        Ok(demuxer
            .streams()
            .map(|stream| {
                let parameters = stream.parameters();
                // SAFETY: `codecpar` is owned by the open demuxer and only read.
                let (sample_rate, channels) = unsafe {
                    let raw = parameters.as_ptr();
                    ((*raw).sample_rate, (*raw).ch_layout.nb_channels)
                };
                let codec_id = parameters.id();
                StreamInfo {
                    index: stream.index(),
                    kind: parameters.medium().into(),
                    codec_id,
                    codec_name: codec_id.name().to_string(),
                    time_base: stream.time_base(),
                    sample_rate: sample_rate.max(0) as u32,
                    channels: channels.max(0) as u16,
                }
            })
            .collect())
    }

    fn find_decoder(&mut self, stream: &StreamInfo) -> Option<Codec> {
        ffmpeg_next::decoder::find(stream.codec_id)
    }

    fn open_decoder(
        &mut self,
        demuxer: &Input,
        stream: &StreamInfo,
        codec: Codec,
    ) -> Result<AudioDecoder, TranscodeError> {
        let input_stream = demuxer.stream(stream.index).ok_or_else(|| {
            TranscodeError::UnsupportedInput(format!("stream {} disappeared", stream.index))
        })?;
        let context = CodecContext::from_parameters(input_stream.parameters())
            .map_err(TranscodeError::codec_open)?;
        context
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.audio())
            .map_err(TranscodeError::codec_open)
    }

    fn read_packet(&mut self, demuxer: &mut Input) -> Result<Option<Packet>, TranscodeError> {
        let mut packet = Packet::empty();
        match packet.read(demuxer) {
            Ok(()) => Ok(Some(packet)),
            Err(FfmpegError::Eof) => Ok(None),
            Err(error) => Err(TranscodeError::decode(error)),
        }
    }

    fn send_packet_to_decoder(
        &mut self,
        decoder: &mut AudioDecoder,
        packet: Option<&Packet>,
    ) -> Result<(), TranscodeError> {
        match packet {
            Some(packet) => decoder.send_packet(packet),
            None => decoder.send_eof(),
        }
        .map_err(TranscodeError::decode)
    }

    fn receive_frame(
        &mut self,
        decoder: &mut AudioDecoder,
    ) -> Result<Option<AudioFrame>, TranscodeError> {
        let mut frame = AudioFrame::empty();
        match decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(FfmpegError::Eof) => Ok(None),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(None),
            Err(error) => Err(TranscodeError::decode(error)),
        }
    }

    fn close_demux(&mut self, demuxer: Input) {
        drop(demuxer);
    }

    fn open_io_sink(&mut self, path: &Path) -> Result<OutputSink, TranscodeError> {
        let c_path = c_path(path).ok_or_else(|| open_error(path, FfmpegError::InvalidData))?;
        let mut sink: *mut AVIOContext = ptr::null_mut();
        // SAFETY: on success `sink` is owned by the returned `OutputSink`.
        let code = unsafe {
            ffmpeg_sys_next::avio_open(
                &mut sink,
                c_path.as_ptr(),
                ffmpeg_sys_next::AVIO_FLAG_WRITE as i32,
            )
        };
        if code < 0 {
            return Err(open_error(path, FfmpegError::from(code)));
        }
        Ok(OutputSink {
            path: path.to_path_buf(),
            ptr: sink,
        })
    }

    fn alloc_output(&mut self) -> Result<OutputContainer, TranscodeError> {
        // SAFETY: the context starts without a format or `pb`, and is owned
        // by the returned `OutputContainer`.
        let context = unsafe { ffmpeg_sys_next::avformat_alloc_context() };
        if context.is_null() {
            return Err(TranscodeError::Allocation(
                "could not allocate output format context".to_string(),
            ));
        }
        Ok(OutputContainer { ptr: context })
    }

    fn attach_sink(&mut self, muxer: &mut OutputContainer, sink: &mut OutputSink) {
        log::debug!("Attaching sink {}", sink.path.display());
        // SAFETY: the container only borrows the sink through `pb`. The
        // `OutputSink` keeps ownership, and the ledger closes it (clearing
        // `pb`) before the container is freed.
        unsafe {
            (*muxer.ptr).pb = sink.ptr;
        }
    }

    fn guess_format(
        &mut self,
        muxer: &mut OutputContainer,
        path: &Path,
    ) -> Result<(), TranscodeError> {
        let unsupported = || TranscodeError::UnsupportedOutput {
            path: path.to_path_buf(),
        };
        let c_path = c_path(path).ok_or_else(unsupported)?;
        // SAFETY: `oformat` points at a static muxer description. `url` is
        // duplicated with `av_strdup` and freed with the context.
        unsafe {
            let format =
                ffmpeg_sys_next::av_guess_format(ptr::null(), c_path.as_ptr(), ptr::null());
            if format.is_null() {
                return Err(unsupported());
            }
            (*muxer.ptr).oformat = format;
            (*muxer.ptr).url = ffmpeg_sys_next::av_strdup(c_path.as_ptr());
        }
        Ok(())
    }

    fn find_encoder(&mut self, target: TargetCodec) -> Option<Codec> {
        target
            .preferred_encoders()
            .iter()
            .filter_map(|name| ffmpeg_next::encoder::find_by_name(name))
            .find(|codec| codec.id() == target.codec_id())
            .or_else(|| ffmpeg_next::encoder::find(target.codec_id()))
    }

    fn new_output_stream(
        &mut self,
        muxer: &mut OutputContainer,
        codec: &Codec,
    ) -> Result<usize, TranscodeError> {
        // SAFETY: the new stream is owned by the container and lives until
        // the context is freed.
        let stream = unsafe { ffmpeg_sys_next::avformat_new_stream(muxer.ptr, codec.as_ptr()) };
        if stream.is_null() {
            return Err(TranscodeError::StreamCreation(
                "could not create a new stream".to_string(),
            ));
        }
        Ok(unsafe { (*stream).index as usize })
    }

    fn open_encoder(
        &mut self,
        muxer: &mut OutputContainer,
        stream_index: usize,
        codec: Codec,
        settings: &EncoderSettings,
    ) -> Result<OpusEncoder, TranscodeError> {
        if codec.id() != settings.target.codec_id() {
            return Err(TranscodeError::UnsupportedCodec(format!(
                "{} does not encode {}",
                codec.name(),
                settings.target
            )));
        }
        let stream = muxer.stream(stream_index).ok_or_else(|| {
            TranscodeError::StreamCreation(format!("output stream {stream_index} does not exist"))
        })?;

        let audio_codec = codec.audio().map_err(TranscodeError::codec_open)?;
        let sample_format = audio_codec
            .formats()
            .and_then(|mut formats| formats.next())
            .unwrap_or(Sample::F32(SampleType::Packed));
        let sample_rate = choose_sample_rate(
            audio_codec.rates().map(|rates| rates.collect()),
            settings.sample_rate,
        );
        let channel_layout = if settings.channels <= 1 {
            ChannelLayout::MONO
        } else {
            ChannelLayout::STEREO
        };
        let time_base = Rational::new(1, sample_rate as i32);

        let mut settings_context = CodecContext::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(TranscodeError::codec_open)?;
        settings_context.set_rate(sample_rate as i32);
        settings_context.set_channel_layout(channel_layout);
        settings_context.set_format(sample_format);
        settings_context.set_bit_rate(settings.bitrate);
        settings_context.set_time_base(time_base);
        if let Some(level) = settings.compression_level {
            settings_context.set_compression(Some(level));
        }
        if codec.capabilities().contains(Capabilities::EXPERIMENTAL) {
            log::warn!("Using experimental encoder {}", codec.name());
            settings_context.compliance(Compliance::Experimental);
        }

        // Set global header flag if the format requires it.
        // SAFETY: the container and the unopened encoder context are both
        // live and exclusively borrowed here.
        let needs_global_header = unsafe {
            let format = (*muxer.ptr).oformat;
            !format.is_null()
                && (*format).flags & ffmpeg_sys_next::AVFMT_GLOBALHEADER as i32 != 0
        };
        if needs_global_header {
            unsafe {
                (*settings_context.as_mut_ptr()).flags |=
                    ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let encoder = settings_context
            .open_as(codec)
            .map_err(TranscodeError::codec_open)?;

        // Publish the opened encoder's parameters on the stream.
        // SAFETY: `stream` belongs to `muxer`, and `codecpar` is owned by it.
        let code = unsafe {
            (*stream).time_base = AVRational {
                num: time_base.numerator(),
                den: time_base.denominator(),
            };
            ffmpeg_sys_next::avcodec_parameters_from_context((*stream).codecpar, encoder.as_ptr())
        };
        if code < 0 {
            return Err(TranscodeError::codec_open(FfmpegError::from(code)));
        }

        let capabilities = codec.capabilities();
        let frame_size = if capabilities.contains(Capabilities::VARIABLE_FRAME_SIZE) {
            0
        } else {
            match encoder.frame_size() as usize {
                0 => OPUS_FRAME_SIZE,
                size => size,
            }
        };

        log::debug!(
            "Opened {} encoder {} ({:?}, {} Hz, frame size {})",
            settings.target,
            codec.name(),
            sample_format,
            sample_rate,
            frame_size,
        );

        Ok(OpusEncoder {
            encoder,
            time_base,
            frame_size,
            small_last_frame: capabilities.contains(Capabilities::SMALL_LAST_FRAME),
        })
    }

    fn open_adapter(&mut self, encoder: &OpusEncoder) -> Result<FrameAdapter, TranscodeError> {
        Ok(FrameAdapter::new(
            encoder.encoder.format(),
            encoder.encoder.channel_layout(),
            encoder.encoder.rate(),
            encoder.frame_size,
            encoder.small_last_frame,
        ))
    }

    fn adapt_frame(
        &mut self,
        adapter: &mut FrameAdapter,
        frame: Option<AudioFrame>,
    ) -> Result<Vec<AudioFrame>, TranscodeError> {
        match frame {
            Some(frame) => adapter.push(frame),
            None => adapter.flush(),
        }
    }

    fn send_frame_to_encoder(
        &mut self,
        encoder: &mut OpusEncoder,
        frame: Option<&AudioFrame>,
    ) -> Result<(), TranscodeError> {
        match frame {
            Some(frame) => encoder.encoder.send_frame(frame),
            None => encoder.encoder.send_eof(),
        }
        .map_err(TranscodeError::encode)
    }

    fn receive_packet(&mut self, encoder: &mut OpusEncoder) -> Result<Option<Packet>, TranscodeError> {
        let mut packet = Packet::empty();
        match encoder.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(packet)),
            Err(FfmpegError::Eof) => Ok(None),
            Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(None),
            Err(error) => Err(TranscodeError::encode(error)),
        }
    }

    fn encoder_time_base(&self, encoder: &OpusEncoder) -> Rational {
        encoder.time_base
    }

    fn stream_time_base(&self, muxer: &OutputContainer, stream_index: usize) -> Rational {
        // SAFETY: `stream` returns only streams the live container holds.
        muxer
            .stream(stream_index)
            .map(|stream| Rational::from(unsafe { (*stream).time_base }))
            .unwrap_or(Rational::new(1, OPUS_SAMPLE_RATE as i32))
    }

    // SAFETY (header, packets, trailer): the container has a format, an
    // attached `pb` and one stream with published parameters; the ledger
    // runs these only between `open_output` and `shutdown`.
    fn write_header(&mut self, muxer: &mut OutputContainer) -> Result<(), TranscodeError> {
        let code = unsafe { ffmpeg_sys_next::avformat_write_header(muxer.ptr, ptr::null_mut()) };
        if code < 0 {
            let error = FfmpegError::from(code);
            return Err(TranscodeError::MuxInit {
                reason: error.to_string(),
                code,
            });
        }
        Ok(())
    }

    fn write_packet(
        &mut self,
        muxer: &mut OutputContainer,
        packet: &mut Packet,
    ) -> Result<(), TranscodeError> {
        packet.set_position(-1);
        let code =
            unsafe { ffmpeg_sys_next::av_interleaved_write_frame(muxer.ptr, packet.as_mut_ptr()) };
        if code < 0 {
            let error = FfmpegError::from(code);
            return Err(TranscodeError::MuxWrite {
                reason: error.to_string(),
                code,
            });
        }
        Ok(())
    }

    fn write_trailer(&mut self, muxer: &mut OutputContainer) -> Result<(), TranscodeError> {
        let code = unsafe { ffmpeg_sys_next::av_write_trailer(muxer.ptr) };
        if code < 0 {
            let error = FfmpegError::from(code);
            return Err(TranscodeError::MuxFinalize {
                reason: error.to_string(),
                code,
            });
        }
        Ok(())
    }

    fn close_io_sink(&mut self, muxer: Option<&mut OutputContainer>, sink: OutputSink) {
        if let Some(muxer) = muxer
            && !muxer.ptr.is_null()
        {
            // SAFETY: detach before closing, so the container never holds a
            // dangling `pb`. Ownership of the sink stays with `sink`.
            unsafe {
                (*muxer.ptr).pb = ptr::null_mut();
            }
        }
        drop(sink);
    }

    fn free_context(&mut self, muxer: OutputContainer) {
        drop(muxer);
    }
}

impl EncodedPacket for Packet {
    fn stream_index(&self) -> usize {
        self.stream()
    }

    fn set_stream_index(&mut self, index: usize) {
        self.set_stream(index);
    }

    fn pts(&self) -> Option<i64> {
        Packet::pts(self)
    }

    fn dts(&self) -> Option<i64> {
        Packet::dts(self)
    }

    fn duration(&self) -> i64 {
        Packet::duration(self)
    }

    fn set_timestamps(&mut self, pts: Option<i64>, dts: Option<i64>, duration: i64) {
        self.set_pts(pts);
        self.set_dts(dts);
        self.set_duration(duration);
    }
}

impl DecodedFrame for AudioFrame {
    fn samples(&self) -> usize {
        AudioFrame::samples(self)
    }
}
