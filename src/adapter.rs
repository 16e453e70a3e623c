//! Decoder-to-encoder frame adaptation.
//!
//! Decoded frames rarely match what the Opus encoder accepts: the sample
//! format, rate or channel layout may differ, and the encoder takes a fixed
//! number of samples per frame while decoders emit whatever their packets
//! hold. [`FrameAdapter`] resamples only when the decoded format differs,
//! then re-chunks the samples through a [`SampleFifo`].

use ffmpeg_next::{
    ChannelLayout, Error as FfmpegError, format::Sample, frame::Audio as AudioFrame,
    software::resampling::Context as ResamplingContext,
};

use crate::error::TranscodeError;

/// Headroom, in samples, added to resampler output buffers so a frame's
/// worth of filter delay never has to wait for the next call.
const RESAMPLER_HEADROOM: usize = 256;

/// Output buffer size used while draining the resampler.
const FLUSH_CHUNK: usize = 1024;

/// First-in first-out buffer of raw samples in one fixed format.
///
/// Stores one byte vector per plane: one for packed formats, one per
/// channel for planar formats.
#[derive(Debug)]
pub struct SampleFifo {
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
    /// Bytes occupied by one sample in one plane.
    stride: usize,
    planes: Vec<Vec<u8>>,
}

impl SampleFifo {
    /// Create an empty FIFO for frames of `format`, `layout` and `rate`.
    pub fn new(format: Sample, layout: ChannelLayout, rate: u32) -> Self {
        let channels = layout.channels().max(1) as usize;
        let (plane_count, stride) = if format.is_planar() {
            (channels, format.bytes())
        } else {
            (1, format.bytes() * channels)
        };
        Self {
            format,
            layout,
            rate,
            stride,
            planes: vec![Vec::new(); plane_count],
        }
    }

    /// Buffered samples per channel.
    pub fn len(&self) -> usize {
        match self.planes.first() {
            Some(plane) if self.stride > 0 => plane.len() / self.stride,
            _ => 0,
        }
    }

    /// `true` when no samples are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append every sample of `frame`.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::Encode`] if the frame's plane layout does not match
    /// the FIFO's.
    pub fn push(&mut self, frame: &AudioFrame) -> Result<(), TranscodeError> {
        if frame.samples() == 0 {
            return Ok(());
        }
        if frame.planes() != self.planes.len() {
            return Err(TranscodeError::Encode {
                reason: format!(
                    "frame has {} planes, expected {}",
                    frame.planes(),
                    self.planes.len()
                ),
                code: FfmpegError::InvalidData.into(),
            });
        }

        let bytes = frame.samples() * self.stride;
        for (index, plane) in self.planes.iter_mut().enumerate() {
            plane.extend_from_slice(&frame.data(index)[..bytes]);
        }
        Ok(())
    }

    /// Remove up to `samples` samples into a new frame of `frame_samples`
    /// samples, filling the remainder with silence.
    pub fn pop(&mut self, samples: usize, frame_samples: usize) -> AudioFrame {
        let samples = samples.min(self.len());
        let frame_samples = frame_samples.max(samples);

        let mut frame = AudioFrame::new(self.format, frame_samples, self.layout);
        frame.set_rate(self.rate);

        let taken = samples * self.stride;
        let total = frame_samples * self.stride;
        for (index, plane) in self.planes.iter_mut().enumerate() {
            let data = frame.data_mut(index);
            data[..taken].copy_from_slice(&plane[..taken]);
            data[taken..total].fill(0);
            plane.drain(..taken);
        }
        frame
    }
}

/// Converts decoded frames into encoder-ready frames.
pub struct FrameAdapter {
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
    /// Samples per encoder frame; 0 when the encoder accepts any size.
    frame_size: usize,
    /// The encoder accepts a short final frame.
    small_last_frame: bool,
    resampler: Option<ResamplingContext>,
    fifo: SampleFifo,
    next_pts: i64,
}

impl FrameAdapter {
    /// Create an adapter producing frames of `format`/`layout`/`rate` with
    /// `frame_size` samples each.
    pub fn new(
        format: Sample,
        layout: ChannelLayout,
        rate: u32,
        frame_size: usize,
        small_last_frame: bool,
    ) -> Self {
        Self {
            format,
            layout,
            rate,
            frame_size,
            small_last_frame,
            resampler: None,
            fifo: SampleFifo::new(format, layout, rate),
            next_pts: 0,
        }
    }

    /// Whether a resampler has been created.
    pub fn is_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    /// Adapt one decoded frame, returning every complete encoder frame now
    /// available.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::Encode`] if resampling fails.
    pub fn push(&mut self, mut frame: AudioFrame) -> Result<Vec<AudioFrame>, TranscodeError> {
        if frame.channel_layout().bits() == 0 {
            frame.set_channel_layout(ChannelLayout::default(i32::from(frame.channels())));
        }

        if self.resampler.is_none() && self.matches(&frame) {
            self.fifo.push(&frame)?;
        } else {
            let resampler = match self.resampler.take() {
                Some(resampler) => resampler,
                None => {
                    log::debug!(
                        "Resampling {:?} {} Hz {} ch to {:?} {} Hz {} ch",
                        frame.format(),
                        frame.rate(),
                        frame.channels(),
                        self.format,
                        self.rate,
                        self.layout.channels(),
                    );
                    ResamplingContext::get(
                        frame.format(),
                        frame.channel_layout(),
                        frame.rate(),
                        self.format,
                        self.layout,
                        self.rate,
                    )
                    .map_err(TranscodeError::encode)?
                }
            };
            let resampler = self.resampler.insert(resampler);

            let capacity = (frame.samples() as u64 * u64::from(self.rate)
                / u64::from(frame.rate().max(1))) as usize
                + RESAMPLER_HEADROOM;
            let mut converted = AudioFrame::new(self.format, capacity, self.layout);
            resampler
                .run(&frame, &mut converted)
                .map_err(TranscodeError::encode)?;
            self.fifo.push(&converted)?;
        }

        Ok(self.drain(false))
    }

    /// Drain the resampler and the FIFO, including a final partial frame.
    ///
    /// # Errors
    ///
    /// [`TranscodeError::Encode`] if buffered samples cannot be queued.
    pub fn flush(&mut self) -> Result<Vec<AudioFrame>, TranscodeError> {
        if let Some(resampler) = self.resampler.as_mut() {
            loop {
                let mut tail = AudioFrame::new(self.format, FLUSH_CHUNK, self.layout);
                match resampler.flush(&mut tail) {
                    Ok(_) if tail.samples() > 0 => self.fifo.push(&tail)?,
                    Ok(_) => break,
                    Err(error) => {
                        log::debug!("Resampler flush ended: {error}");
                        break;
                    }
                }
            }
        }
        Ok(self.drain(true))
    }

    fn matches(&self, frame: &AudioFrame) -> bool {
        frame.format() == self.format
            && frame.rate() == self.rate
            && frame.channel_layout() == self.layout
    }

    fn drain(&mut self, flush: bool) -> Vec<AudioFrame> {
        let mut frames = Vec::new();

        if self.frame_size == 0 {
            if !self.fifo.is_empty() {
                let samples = self.fifo.len();
                frames.push(self.emit(samples, samples));
            }
            return frames;
        }

        while self.fifo.len() >= self.frame_size {
            frames.push(self.emit(self.frame_size, self.frame_size));
        }

        if flush && !self.fifo.is_empty() {
            let samples = self.fifo.len();
            let frame_samples = if self.small_last_frame {
                samples
            } else {
                self.frame_size
            };
            frames.push(self.emit(samples, frame_samples));
        }

        frames
    }

    fn emit(&mut self, samples: usize, frame_samples: usize) -> AudioFrame {
        let mut frame = self.fifo.pop(samples, frame_samples);
        frame.set_pts(Some(self.next_pts));
        self.next_pts += frame_samples as i64;
        frame
    }
}
