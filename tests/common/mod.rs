//! Instrumented in-memory `MediaLibrary` shared by the integration tests.
//!
//! Every acquisition and release is counted in a [`Calls`] record that the
//! test keeps a handle to after the library has moved into the pipeline.
//! [`Step`] selects the single call that fails.

#![allow(dead_code)]

pub mod fixtures;

use std::{cell::RefCell, collections::VecDeque, path::Path, rc::Rc};

use ffmpeg_next::{Rational, codec::Id};
use opus_transcode::{
    DecodedFrame, EncodedPacket, EncoderSettings, MediaKind, MediaLibrary, StreamInfo,
    TargetCodec, TranscodeError,
};

/// Samples per frame accepted by the mock encoder.
pub const FRAME_SIZE: usize = 960;
/// Pre-skip the mock encoder starts its timestamps with.
pub const LOOKAHEAD: i64 = 312;
/// Samples in each packet produced by the mock demuxer.
pub const PACKET_SAMPLES: usize = 1024;

/// Calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    OpenDemux,
    Probe,
    FindDecoder,
    OpenDecoder,
    OpenSink,
    AllocOutput,
    GuessFormat,
    FindEncoder,
    NewStream,
    OpenEncoder,
    OpenAdapter,
    WriteHeader,
    ReadPacket,
    Decode,
    Encode,
    WritePacket,
    WriteTrailer,
}

impl Step {
    pub const ALL: [Step; 17] = [
        Step::OpenDemux,
        Step::Probe,
        Step::FindDecoder,
        Step::OpenDecoder,
        Step::OpenSink,
        Step::AllocOutput,
        Step::GuessFormat,
        Step::FindEncoder,
        Step::NewStream,
        Step::OpenEncoder,
        Step::OpenAdapter,
        Step::WriteHeader,
        Step::ReadPacket,
        Step::Decode,
        Step::Encode,
        Step::WritePacket,
        Step::WriteTrailer,
    ];
}

/// Everything the mock observed.
#[derive(Debug, Default)]
pub struct Calls {
    pub demux_opened: usize,
    pub demux_closed: usize,
    pub decoder_opened: usize,
    pub decoder_released: usize,
    pub sink_opened: usize,
    pub sink_closed: usize,
    pub context_allocated: usize,
    pub context_freed: usize,
    pub encoder_opened: usize,
    pub encoder_released: usize,
    pub header_written: bool,
    pub trailer_written: bool,
    pub freed_with_sink_attached: bool,
    pub written_dts: Vec<i64>,
    pub events: Vec<&'static str>,
}

impl Calls {
    pub fn acquisitions(&self) -> usize {
        self.demux_opened
            + self.decoder_opened
            + self.sink_opened
            + self.context_allocated
            + self.encoder_opened
    }

    pub fn releases(&self) -> usize {
        self.demux_closed
            + self.decoder_released
            + self.sink_closed
            + self.context_freed
            + self.encoder_released
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.iter().position(|recorded| *recorded == event)
    }
}

/// Shape of the fake input and where to fail.
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub streams: Vec<StreamInfo>,
    pub packets: usize,
    pub fail: Option<Step>,
    /// Packet (0-based) at which `Step::Decode`, `Step::Encode`,
    /// `Step::ReadPacket` or `Step::WritePacket` fails.
    pub fail_at: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            streams: vec![audio_stream(0)],
            packets: 10,
            fail: None,
            fail_at: 3,
        }
    }
}

impl MockConfig {
    pub fn failing_at(step: Step) -> Self {
        Self {
            fail: Some(step),
            ..Self::default()
        }
    }
}

pub fn audio_stream(index: usize) -> StreamInfo {
    stream(index, MediaKind::Audio)
}

pub fn stream(index: usize, kind: MediaKind) -> StreamInfo {
    StreamInfo {
        index,
        kind,
        codec_id: Id::PCM_S16LE,
        codec_name: "pcm_s16le".to_string(),
        time_base: Rational::new(1, 48_000),
        sample_rate: 48_000,
        channels: 2,
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockPacket {
    pub stream: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub samples: usize,
}

impl EncodedPacket for MockPacket {
    fn stream_index(&self) -> usize {
        self.stream
    }

    fn set_stream_index(&mut self, index: usize) {
        self.stream = index;
    }

    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn dts(&self) -> Option<i64> {
        self.dts
    }

    fn duration(&self) -> i64 {
        self.duration
    }

    fn set_timestamps(&mut self, pts: Option<i64>, dts: Option<i64>, duration: i64) {
        self.pts = pts;
        self.dts = dts;
        self.duration = duration;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MockFrame {
    pub samples: usize,
}

impl DecodedFrame for MockFrame {
    fn samples(&self) -> usize {
        self.samples
    }
}

pub struct MockDemuxer {
    read: usize,
}

/// Holds one packet back, like a decoder with a frame of delay.
pub struct MockDecoder {
    calls: Rc<RefCell<Calls>>,
    held: Option<usize>,
    ready: VecDeque<usize>,
}

impl Drop for MockDecoder {
    fn drop(&mut self) {
        let mut calls = self.calls.borrow_mut();
        calls.decoder_released += 1;
        calls.events.push("release_decoder");
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MockCodec;

pub struct MockSink;

pub struct MockMuxer {
    sink_attached: bool,
    format: bool,
    streams: usize,
}

/// Emits a frame's packet only once the next frame arrives.
pub struct MockEncoder {
    calls: Rc<RefCell<Calls>>,
    queued: VecDeque<usize>,
    ready: VecDeque<MockPacket>,
    next_pts: i64,
}

impl MockEncoder {
    fn emit(&mut self, samples: usize) {
        let packet = MockPacket {
            stream: 0,
            pts: Some(self.next_pts),
            dts: Some(self.next_pts),
            duration: samples as i64,
            samples,
        };
        self.next_pts += samples as i64;
        self.ready.push_back(packet);
    }
}

impl Drop for MockEncoder {
    fn drop(&mut self) {
        let mut calls = self.calls.borrow_mut();
        calls.encoder_released += 1;
        calls.events.push("release_encoder");
    }
}

/// Re-chunks into `FRAME_SIZE` frames with a short last frame.
pub struct MockAdapter {
    buffered: usize,
}

pub struct MockLibrary {
    config: MockConfig,
    calls: Rc<RefCell<Calls>>,
    packets_decoded: usize,
    frames_encoded: usize,
    packets_written: usize,
}

impl MockLibrary {
    pub fn new(config: MockConfig) -> (Self, Rc<RefCell<Calls>>) {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let library = Self {
            config,
            calls: Rc::clone(&calls),
            packets_decoded: 0,
            frames_encoded: 0,
            packets_written: 0,
        };
        (library, calls)
    }

    fn fails(&self, step: Step) -> bool {
        self.config.fail == Some(step)
    }

    fn event(&self, event: &'static str) {
        self.calls.borrow_mut().events.push(event);
    }
}

impl MediaLibrary for MockLibrary {
    type Demuxer = MockDemuxer;
    type Decoder = MockDecoder;
    type Codec = MockCodec;
    type Sink = MockSink;
    type Muxer = MockMuxer;
    type Encoder = MockEncoder;
    type Adapter = MockAdapter;
    type Packet = MockPacket;
    type Frame = MockFrame;

    fn open_demux(&mut self, path: &Path) -> Result<MockDemuxer, TranscodeError> {
        if self.fails(Step::OpenDemux) {
            return Err(TranscodeError::Open {
                path: path.to_path_buf(),
                reason: "No such file or directory".to_string(),
                code: -2,
            });
        }
        self.calls.borrow_mut().demux_opened += 1;
        self.event("open_demux");
        Ok(MockDemuxer { read: 0 })
    }

    fn probe_streams(&mut self, _demuxer: &mut MockDemuxer) -> Result<Vec<StreamInfo>, TranscodeError> {
        if self.fails(Step::Probe) {
            return Err(TranscodeError::Probe {
                path: "mock".into(),
                reason: "Invalid data found when processing input".to_string(),
                code: -1_094_995_529,
            });
        }
        Ok(self.config.streams.clone())
    }

    fn find_decoder(&mut self, _stream: &StreamInfo) -> Option<MockCodec> {
        (!self.fails(Step::FindDecoder)).then_some(MockCodec)
    }

    fn open_decoder(
        &mut self,
        _demuxer: &MockDemuxer,
        _stream: &StreamInfo,
        _codec: MockCodec,
    ) -> Result<MockDecoder, TranscodeError> {
        if self.fails(Step::OpenDecoder) {
            return Err(TranscodeError::CodecOpen {
                reason: "Invalid argument".to_string(),
                code: -22,
            });
        }
        self.calls.borrow_mut().decoder_opened += 1;
        self.event("open_decoder");
        Ok(MockDecoder {
            calls: Rc::clone(&self.calls),
            held: None,
            ready: VecDeque::new(),
        })
    }

    fn read_packet(&mut self, demuxer: &mut MockDemuxer) -> Result<Option<MockPacket>, TranscodeError> {
        if demuxer.read >= self.config.packets {
            return Ok(None);
        }
        if self.fails(Step::ReadPacket) && demuxer.read == self.config.fail_at {
            return Err(TranscodeError::Decode {
                reason: "I/O error".to_string(),
                code: -5,
            });
        }
        let pts = (demuxer.read * PACKET_SAMPLES) as i64;
        demuxer.read += 1;
        Ok(Some(MockPacket {
            stream: 0,
            pts: Some(pts),
            dts: Some(pts),
            duration: PACKET_SAMPLES as i64,
            samples: PACKET_SAMPLES,
        }))
    }

    fn send_packet_to_decoder(
        &mut self,
        decoder: &mut MockDecoder,
        packet: Option<&MockPacket>,
    ) -> Result<(), TranscodeError> {
        match packet {
            Some(packet) => {
                if self.fails(Step::Decode) && self.packets_decoded == self.config.fail_at {
                    return Err(TranscodeError::Decode {
                        reason: "Invalid data found when processing input".to_string(),
                        code: -1_094_995_529,
                    });
                }
                self.packets_decoded += 1;
                if let Some(held) = decoder.held.replace(packet.samples) {
                    decoder.ready.push_back(held);
                }
            }
            None => {
                if let Some(held) = decoder.held.take() {
                    decoder.ready.push_back(held);
                }
            }
        }
        Ok(())
    }

    fn receive_frame(&mut self, decoder: &mut MockDecoder) -> Result<Option<MockFrame>, TranscodeError> {
        Ok(decoder.ready.pop_front().map(|samples| MockFrame { samples }))
    }

    fn close_demux(&mut self, _demuxer: MockDemuxer) {
        self.calls.borrow_mut().demux_closed += 1;
        self.event("close_demux");
    }

    fn open_io_sink(&mut self, path: &Path) -> Result<MockSink, TranscodeError> {
        if self.fails(Step::OpenSink) {
            return Err(TranscodeError::Open {
                path: path.to_path_buf(),
                reason: "Permission denied".to_string(),
                code: -13,
            });
        }
        self.calls.borrow_mut().sink_opened += 1;
        self.event("open_sink");
        Ok(MockSink)
    }

    fn alloc_output(&mut self) -> Result<MockMuxer, TranscodeError> {
        if self.fails(Step::AllocOutput) {
            return Err(TranscodeError::Allocation(
                "could not allocate output format context".to_string(),
            ));
        }
        self.calls.borrow_mut().context_allocated += 1;
        self.event("alloc_output");
        Ok(MockMuxer {
            sink_attached: false,
            format: false,
            streams: 0,
        })
    }

    fn attach_sink(&mut self, muxer: &mut MockMuxer, _sink: &mut MockSink) {
        muxer.sink_attached = true;
    }

    fn guess_format(&mut self, muxer: &mut MockMuxer, path: &Path) -> Result<(), TranscodeError> {
        if self.fails(Step::GuessFormat) {
            return Err(TranscodeError::UnsupportedOutput {
                path: path.to_path_buf(),
            });
        }
        muxer.format = true;
        Ok(())
    }

    fn find_encoder(&mut self, _target: TargetCodec) -> Option<MockCodec> {
        (!self.fails(Step::FindEncoder)).then_some(MockCodec)
    }

    fn new_output_stream(&mut self, muxer: &mut MockMuxer, _codec: &MockCodec) -> Result<usize, TranscodeError> {
        if self.fails(Step::NewStream) {
            return Err(TranscodeError::StreamCreation(
                "could not create a new stream".to_string(),
            ));
        }
        muxer.streams += 1;
        Ok(muxer.streams - 1)
    }

    fn open_encoder(
        &mut self,
        _muxer: &mut MockMuxer,
        _stream_index: usize,
        _codec: MockCodec,
        settings: &EncoderSettings,
    ) -> Result<MockEncoder, TranscodeError> {
        assert_eq!(settings.target, TargetCodec::Opus);
        if self.fails(Step::OpenEncoder) {
            return Err(TranscodeError::CodecOpen {
                reason: "Invalid argument".to_string(),
                code: -22,
            });
        }
        self.calls.borrow_mut().encoder_opened += 1;
        self.event("open_encoder");
        Ok(MockEncoder {
            calls: Rc::clone(&self.calls),
            queued: VecDeque::new(),
            ready: VecDeque::new(),
            next_pts: -LOOKAHEAD,
        })
    }

    fn open_adapter(&mut self, _encoder: &MockEncoder) -> Result<MockAdapter, TranscodeError> {
        if self.fails(Step::OpenAdapter) {
            return Err(TranscodeError::Allocation(
                "could not allocate resampler".to_string(),
            ));
        }
        Ok(MockAdapter { buffered: 0 })
    }

    fn adapt_frame(
        &mut self,
        adapter: &mut MockAdapter,
        frame: Option<MockFrame>,
    ) -> Result<Vec<MockFrame>, TranscodeError> {
        let mut frames = Vec::new();
        match frame {
            Some(frame) => {
                adapter.buffered += frame.samples;
                while adapter.buffered >= FRAME_SIZE {
                    adapter.buffered -= FRAME_SIZE;
                    frames.push(MockFrame {
                        samples: FRAME_SIZE,
                    });
                }
            }
            None if adapter.buffered > 0 => {
                frames.push(MockFrame {
                    samples: adapter.buffered,
                });
                adapter.buffered = 0;
            }
            None => {}
        }
        Ok(frames)
    }

    fn send_frame_to_encoder(
        &mut self,
        encoder: &mut MockEncoder,
        frame: Option<&MockFrame>,
    ) -> Result<(), TranscodeError> {
        match frame {
            Some(frame) => {
                if self.fails(Step::Encode) && self.frames_encoded == self.config.fail_at {
                    return Err(TranscodeError::Encode {
                        reason: "Invalid argument".to_string(),
                        code: -22,
                    });
                }
                self.frames_encoded += 1;
                encoder.queued.push_back(frame.samples);
                while encoder.queued.len() > 1 {
                    if let Some(samples) = encoder.queued.pop_front() {
                        encoder.emit(samples);
                    }
                }
            }
            None => {
                while let Some(samples) = encoder.queued.pop_front() {
                    encoder.emit(samples);
                }
            }
        }
        Ok(())
    }

    fn receive_packet(&mut self, encoder: &mut MockEncoder) -> Result<Option<MockPacket>, TranscodeError> {
        Ok(encoder.ready.pop_front())
    }

    fn encoder_time_base(&self, _encoder: &MockEncoder) -> Rational {
        Rational::new(1, 48_000)
    }

    fn stream_time_base(&self, _muxer: &MockMuxer, _stream_index: usize) -> Rational {
        Rational::new(1, 1000)
    }

    fn write_header(&mut self, muxer: &mut MockMuxer) -> Result<(), TranscodeError> {
        assert!(muxer.format && muxer.sink_attached && muxer.streams == 1);
        if self.fails(Step::WriteHeader) {
            return Err(TranscodeError::MuxInit {
                reason: "Invalid argument".to_string(),
                code: -22,
            });
        }
        self.calls.borrow_mut().header_written = true;
        Ok(())
    }

    fn write_packet(&mut self, _muxer: &mut MockMuxer, packet: &mut MockPacket) -> Result<(), TranscodeError> {
        if self.fails(Step::WritePacket) && self.packets_written == self.config.fail_at {
            return Err(TranscodeError::MuxWrite {
                reason: "No space left on device".to_string(),
                code: -28,
            });
        }
        self.packets_written += 1;
        let dts = packet.dts.unwrap_or(i64::MIN);
        self.calls.borrow_mut().written_dts.push(dts);
        Ok(())
    }

    fn write_trailer(&mut self, _muxer: &mut MockMuxer) -> Result<(), TranscodeError> {
        if self.fails(Step::WriteTrailer) {
            return Err(TranscodeError::MuxFinalize {
                reason: "No space left on device".to_string(),
                code: -28,
            });
        }
        self.calls.borrow_mut().trailer_written = true;
        Ok(())
    }

    fn close_io_sink(&mut self, muxer: Option<&mut MockMuxer>, _sink: MockSink) {
        if let Some(muxer) = muxer {
            muxer.sink_attached = false;
        }
        self.calls.borrow_mut().sink_closed += 1;
        self.event("close_sink");
    }

    fn free_context(&mut self, muxer: MockMuxer) {
        let mut calls = self.calls.borrow_mut();
        calls.context_freed += 1;
        calls.freed_with_sink_attached |= muxer.sink_attached;
        calls.events.push("free_context");
    }
}
