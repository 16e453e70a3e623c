//! Media fixtures generated on the fly.

use std::{f64::consts::TAU, fs, path::Path};

use ffmpeg_next::{
    ChannelLayout, Rational,
    codec::{Id, context::Context as CodecContext},
    format::{Sample, sample::Type as SampleType},
};
use opus_transcode::{FfmpegLibrary, MediaLibrary, TargetCodec};

/// `true` when FFmpeg is usable and was built with an Opus encoder.
pub fn opus_available() -> bool {
    match FfmpegLibrary::new() {
        Ok(mut library) => library.find_encoder(TargetCodec::Opus).is_some(),
        Err(_) => false,
    }
}

/// Write a 16-bit PCM WAV file holding a 440 Hz tone.
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, seconds: f64) {
    let frames = (f64::from(sample_rate) * seconds).round() as usize;
    let block_align = channels * 2;
    let data_len = (frames * usize::from(block_align)) as u32;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for frame in 0..frames {
        let phase = TAU * 440.0 * frame as f64 / f64::from(sample_rate);
        let value = (phase.sin() * 8_000.0) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    fs::write(path, bytes).expect("Failed to write WAV fixture");
}

/// Write a Matroska file declaring two mono PCM audio tracks.
pub fn write_two_track_matroska(path: &Path) {
    ffmpeg_next::init().expect("Failed to initialise FFmpeg");
    let codec = ffmpeg_next::encoder::find(Id::PCM_S16LE).expect("pcm_s16le encoder");
    let mut output = ffmpeg_next::format::output(&path).expect("Failed to create Matroska output");

    for _ in 0..2 {
        let mut encoder_context = CodecContext::new_with_codec(codec)
            .encoder()
            .audio()
            .expect("audio encoder context");
        encoder_context.set_rate(48_000);
        encoder_context.set_channel_layout(ChannelLayout::MONO);
        encoder_context.set_format(Sample::I16(SampleType::Packed));
        encoder_context.set_time_base(Rational::new(1, 48_000));
        let encoder = encoder_context
            .open_as(codec)
            .expect("Failed to open pcm_s16le encoder");

        let mut stream = output.add_stream(codec).expect("Failed to add stream");
        stream.set_parameters(&encoder);
    }

    output.write_header().expect("Failed to write Matroska header");
    output.write_trailer().expect("Failed to write Matroska trailer");
}
