//! Output container writer
//!
//! Composited RGBA frames are converted to YUV with swscale and encoded
//! (H.264 by default). One audio stream from the host is carried over: copied
//! when the container can hold its codec, re-encoded to AAC otherwise. The
//! container is picked from the output extension.

use crate::{Error, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Sample;
use ffmpeg_next::software::resampling::Context as SamplerContext;
use ffmpeg_next::{
    codec, decoder, encoder, format, frame, threading, ChannelLayout, Dictionary, Packet, Rational,
};
use image::RgbaImage;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, trace, warn};

const AAC_SAMPLE_FORMAT: Sample = Sample::F32(format::sample::Type::Planar);
const AAC_BIT_RATE: usize = 128_000;
const AAC_FALLBACK_FRAME_SIZE: usize = 1024;

// FF_COMPLIANCE_NORMAL
const COMPLIANCE_NORMAL: c_int = 0;

static NUM_CPUS: LazyLock<usize> = LazyLock::new(|| {
    let n = num_cpus::get();
    let num = n.min(16);
    debug!(num, "Detecting CPU cores for encoder threads");
    num
});

/// Video codecs the sink can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// H.264 through libx264 (or whatever H.264 encoder FFmpeg provides)
    H264,
    /// MPEG-4 Part 2, built into every FFmpeg
    Mpeg4,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::Mpeg4 => "mpeg4",
        }
    }
}

/// Encoder settings
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderProfile {
    pub codec: VideoCodec,
    /// x264 preset, ignored for MPEG-4
    pub preset: String,
    /// Constant rate factor, ignored for MPEG-4
    pub crf: u8,
    /// Target bit rate in bits per second, used by MPEG-4 only
    pub bit_rate: usize,
}

impl Default for EncoderProfile {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            preset: "medium".to_string(),
            crf: 23,
            bit_rate: 2_000_000,
        }
    }
}

impl EncoderProfile {
    /// Profile using the built-in MPEG-4 encoder
    pub fn mpeg4() -> Self {
        Self {
            codec: VideoCodec::Mpeg4,
            ..Self::default()
        }
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    fn find_codec(&self) -> Result<ffmpeg::Codec> {
        match self.codec {
            VideoCodec::H264 => encoder::find_by_name("libx264")
                .or_else(|| encoder::find(codec::Id::H264))
                .ok_or_else(|| Error::Encode("no H.264 encoder available".to_string())),
            VideoCodec::Mpeg4 => encoder::find(codec::Id::MPEG4)
                .ok_or_else(|| Error::Encode("no MPEG-4 encoder available".to_string())),
        }
    }

    fn options(&self) -> Dictionary<'static> {
        let mut opts = Dictionary::new();
        if self.codec == VideoCodec::H264 {
            opts.set("preset", &self.preset);
            opts.set("crf", &self.crf.to_string());
        }
        opts
    }
}

/// Geometry and timing of the output video stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
}

impl SinkConfig {
    pub fn new(width: u32, height: u32, frame_rate: Rational) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }

    /// Encoder time base: one tick per nominal frame
    pub fn time_base(&self) -> Rational {
        self.frame_rate.invert()
    }
}

/// Pixel format fed to the encoder.
///
/// 4:2:0 needs even sizes, so odd sizes switch to 4:4:4 when the encoder
/// lists it. Otherwise the encoder gets 4:2:0 and decides for itself.
fn pixel_format_for(width: u32, height: u32, supported: &[format::Pixel]) -> format::Pixel {
    let odd = width % 2 != 0 || height % 2 != 0;
    if odd && supported.contains(&format::Pixel::YUV444P) {
        format::Pixel::YUV444P
    } else {
        format::Pixel::YUV420P
    }
}

fn supported_pixel_formats(codec: ffmpeg::Codec) -> Vec<format::Pixel> {
    codec
        .video()
        .ok()
        .and_then(|video| video.formats())
        .map(|formats| formats.collect())
        .unwrap_or_default()
}

/// Whether the output muxer can store `id` as-is
fn muxer_accepts(octx: &format::context::Output, id: codec::Id) -> bool {
    let supported = unsafe { ffmpeg::ffi::avformat_query_codec(octx.format().as_ptr(), id.into(), COMPLIANCE_NORMAL) };
    supported == 1
}

fn stream_time_base(octx: &format::context::Output, index: usize) -> Result<Rational> {
    octx.stream(index)
        .map(|stream| stream.time_base())
        .ok_or_else(|| Error::Encode(format!("output stream {index} missing")))
}

/// Decodes host audio and re-encodes it to AAC
struct AudioTranscoder {
    output_index: usize,
    decoder: decoder::Audio,
    encoder: encoder::Audio,
    resampler: SamplerContext,
    layout: ChannelLayout,
    rate: u32,
    frame_size: usize,
    /// Resampled samples waiting for a full encoder frame, one buffer per channel
    pending: Vec<Vec<f32>>,
    next_pts: i64,
}

impl AudioTranscoder {
    fn new(octx: &mut format::context::Output, ist: &ffmpeg::Stream<'_>, global_header: bool) -> Result<Self> {
        let decoder = codec::context::Context::from_parameters(ist.parameters())
            .and_then(|context| context.decoder().audio())
            .map_err(|e| Error::encode("opening host audio decoder", e))?;

        let rate = decoder.rate();
        if rate == 0 || decoder.channels() == 0 {
            return Err(Error::Encode(format!(
                "host audio has {} Hz and {} channels",
                rate,
                decoder.channels()
            )));
        }
        let layout = if decoder.channel_layout().is_empty() {
            ChannelLayout::default(i32::from(decoder.channels()))
        } else {
            decoder.channel_layout()
        };

        let codec = encoder::find(codec::Id::AAC)
            .ok_or_else(|| Error::Encode("no AAC encoder available".to_string()))?;
        let time_base = Rational(1, rate as i32);

        let mut audio = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| Error::encode("creating AAC encoder", e))?;
        audio.set_rate(rate as i32);
        audio.set_channel_layout(layout);
        audio.set_format(AAC_SAMPLE_FORMAT);
        audio.set_bit_rate(AAC_BIT_RATE);
        audio.set_time_base(time_base);
        if global_header {
            audio.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        debug!(
            source = ?decoder.id(),
            rate,
            channels = decoder.channels(),
            bit_rate = AAC_BIT_RATE,
            "Opening AAC encoder"
        );
        let encoder = audio
            .open_as(codec)
            .map_err(|e| Error::encode("opening AAC encoder", e))?;

        let frame_size = match encoder.frame_size() {
            0 => {
                warn!("AAC encoder reported frame size 0, using {}", AAC_FALLBACK_FRAME_SIZE);
                AAC_FALLBACK_FRAME_SIZE
            }
            n => n as usize,
        };

        let output_index = {
            let mut ost = octx
                .add_stream(codec)
                .map_err(|e| Error::encode("adding audio stream", e))?;
            ost.set_parameters(&encoder);
            ost.set_time_base(time_base);
            ost.index()
        };

        let resampler = SamplerContext::get(decoder.format(), layout, rate, AAC_SAMPLE_FORMAT, layout, rate)
            .map_err(|e| Error::encode("creating audio resampler", e))?;

        Ok(Self {
            output_index,
            pending: vec![Vec::new(); layout.channels().max(1) as usize],
            decoder,
            encoder,
            resampler,
            layout,
            rate,
            frame_size,
            next_pts: 0,
        })
    }

    fn push(&mut self, packet: &Packet, octx: &mut format::context::Output) -> Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(|e| Error::encode("decoding host audio", e))?;
        self.receive_decoded(octx)
    }

    fn receive_decoded(&mut self, octx: &mut format::context::Output) -> Result<()> {
        let mut decoded = frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            if decoded.channel_layout().is_empty() {
                decoded.set_channel_layout(self.layout);
            }
            let mut resampled = frame::Audio::empty();
            self.resampler
                .run(&decoded, &mut resampled)
                .map_err(|e| Error::encode("resampling host audio", e))?;
            self.buffer(&resampled);
            self.encode_ready(octx, false)?;
        }
        Ok(())
    }

    fn buffer(&mut self, resampled: &frame::Audio) {
        if resampled.samples() == 0 {
            return;
        }
        for (channel, pending) in self.pending.iter_mut().enumerate() {
            pending.extend_from_slice(resampled.plane::<f32>(channel));
        }
    }

    /// Encodes every full frame in the buffer. With `flush`, a trailing
    /// partial frame is padded with silence and encoded too.
    fn encode_ready(&mut self, octx: &mut format::context::Output, flush: bool) -> Result<()> {
        loop {
            let buffered = self.pending[0].len();
            if buffered == 0 || (buffered < self.frame_size && !flush) {
                return Ok(());
            }

            let take = buffered.min(self.frame_size);
            let mut input = frame::Audio::new(AAC_SAMPLE_FORMAT, self.frame_size, self.layout);
            input.set_rate(self.rate);
            for (channel, pending) in self.pending.iter_mut().enumerate() {
                let plane = input.plane_mut::<f32>(channel);
                plane[..take].copy_from_slice(&pending[..take]);
                plane[take..].fill(0.0);
                pending.drain(..take);
            }
            input.set_pts(Some(self.next_pts));
            self.next_pts += self.frame_size as i64;

            self.encoder
                .send_frame(&input)
                .map_err(|e| Error::encode("sending audio to encoder", e))?;
            self.drain(octx)?;
        }
    }

    fn drain(&mut self, octx: &mut format::context::Output) -> Result<()> {
        let ost_time_base = stream_time_base(octx, self.output_index)?;
        let mut encoded = Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(self.output_index);
            encoded.rescale_ts(Rational(1, self.rate as i32), ost_time_base);
            encoded
                .write_interleaved(octx)
                .map_err(|e| Error::encode("writing audio packet", e))?;
        }
        Ok(())
    }

    fn finish(&mut self, octx: &mut format::context::Output) -> Result<()> {
        self.decoder
            .send_eof()
            .map_err(|e| Error::encode("flushing audio decoder", e))?;
        self.receive_decoded(octx)?;

        let mut tail = frame::Audio::empty();
        if self.resampler.delay().is_some() {
            self.resampler
                .flush(&mut tail)
                .map_err(|e| Error::encode("flushing audio resampler", e))?;
            self.buffer(&tail);
        }
        self.encode_ready(octx, true)?;

        self.encoder
            .send_eof()
            .map_err(|e| Error::encode("flushing AAC encoder", e))?;
        self.drain(octx)
    }
}

/// Where host audio packets go
enum AudioRoute {
    Copy { input_index: usize, output_index: usize },
    Transcode { input_index: usize, transcoder: Box<AudioTranscoder> },
}

impl AudioRoute {
    fn input_index(&self) -> usize {
        match self {
            AudioRoute::Copy { input_index, .. } | AudioRoute::Transcode { input_index, .. } => *input_index,
        }
    }
}

/// Writes encoded video (and the host's audio) to an output file
pub struct EncoderSink {
    path: PathBuf,
    octx: format::context::Output,
    encoder: encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    config: SinkConfig,
    pixel_format: format::Pixel,
    video_index: usize,
    audio: Option<AudioRoute>,
    last_pts: Option<i64>,
    frames_written: u64,
    audio_packets: u64,
}

impl EncoderSink {
    /// Creates the output file, opens the encoder and writes the header.
    ///
    /// When `audio` is given it gets a second output stream and its packets
    /// can later be fed through [`Self::copy_packet`]. The stream is copied
    /// if the container accepts its codec and re-encoded to AAC otherwise.
    pub fn create(
        path: &Path,
        config: &SinkConfig,
        profile: &EncoderProfile,
        audio: Option<ffmpeg::Stream<'_>>,
    ) -> Result<Self> {
        crate::video_reader::init_ffmpeg()?;

        if config.width == 0 || config.height == 0 {
            return Err(Error::Encode(format!(
                "output dimensions {}x{} must be non-zero",
                config.width, config.height
            )));
        }
        if config.frame_rate.numerator() <= 0 || config.frame_rate.denominator() <= 0 {
            return Err(Error::Encode(format!(
                "invalid frame rate {}/{}",
                config.frame_rate.numerator(),
                config.frame_rate.denominator()
            )));
        }

        let mut octx = format::output(&path).map_err(|e| Error::encode("creating output container", e))?;
        let global_header = octx.format().flags().contains(format::Flags::GLOBAL_HEADER);

        let codec = profile.find_codec()?;
        let time_base = config.time_base();
        let pixel_format = pixel_format_for(config.width, config.height, &supported_pixel_formats(codec));

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| Error::encode("creating video encoder", e))?;
        video.set_width(config.width);
        video.set_height(config.height);
        video.set_format(pixel_format);
        video.set_time_base(time_base);
        video.set_frame_rate(Some(config.frame_rate));
        video.set_threading(threading::Config::count(*NUM_CPUS));
        if profile.codec == VideoCodec::Mpeg4 {
            video.set_bit_rate(profile.bit_rate);
        }
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        debug!(
            codec = profile.codec.as_str(),
            width = config.width,
            height = config.height,
            pixel_format = ?pixel_format,
            time_base = %format!("{}/{}", time_base.numerator(), time_base.denominator()),
            "Opening video encoder"
        );

        let encoder = video
            .open_as_with(codec, profile.options())
            .map_err(|e| Error::encode(&format!("opening {} encoder", profile.codec.as_str()), e))?;

        let video_index = {
            let mut ost = octx
                .add_stream(codec)
                .map_err(|e| Error::encode("adding video stream", e))?;
            ost.set_parameters(&encoder);
            ost.set_time_base(time_base);
            ost.index()
        };

        let audio = match audio {
            Some(ist) if muxer_accepts(&octx, ist.parameters().id()) => {
                let mut ost = octx
                    .add_stream(encoder::find(codec::Id::None))
                    .map_err(|e| Error::encode("adding audio stream", e))?;
                ost.set_parameters(ist.parameters());
                // Codec tags rarely carry over between containers.
                unsafe {
                    (*ost.parameters().as_mut_ptr()).codec_tag = 0;
                }
                Some(AudioRoute::Copy {
                    input_index: ist.index(),
                    output_index: ost.index(),
                })
            }
            Some(ist) => {
                info!(
                    codec = ?ist.parameters().id(),
                    "Container cannot hold host audio codec, re-encoding to AAC"
                );
                let transcoder = AudioTranscoder::new(&mut octx, &ist, global_header)?;
                Some(AudioRoute::Transcode {
                    input_index: ist.index(),
                    transcoder: Box::new(transcoder),
                })
            }
            None => None,
        };

        octx.write_header().map_err(|e| Error::encode("writing container header", e))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            format::Pixel::RGBA,
            config.width,
            config.height,
            pixel_format,
            config.width,
            config.height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| Error::encode("creating colour converter", e))?;

        info!(
            path = %path.display(),
            codec = profile.codec.as_str(),
            audio = audio.is_some(),
            audio_transcoded = matches!(audio, Some(AudioRoute::Transcode { .. })),
            "Writing output"
        );

        Ok(Self {
            path: path.to_path_buf(),
            octx,
            encoder,
            scaler,
            config: *config,
            pixel_format,
            video_index,
            audio,
            last_pts: None,
            frames_written: 0,
            audio_packets: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Whether host audio is re-encoded to AAC rather than copied
    pub fn audio_transcoded(&self) -> bool {
        matches!(self.audio, Some(AudioRoute::Transcode { .. }))
    }

    /// Pixel format handed to the video encoder
    pub fn pixel_format(&self) -> format::Pixel {
        self.pixel_format
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Encodes one RGBA frame.
    ///
    /// `pts` is in units of [`SinkConfig::time_base`]. Timestamps that do not
    /// increase are bumped to one past the previous frame.
    pub fn write_frame(&mut self, image: &RgbaImage, pts: i64) -> Result<()> {
        if image.width() != self.config.width || image.height() != self.config.height {
            return Err(Error::Encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                image.width(),
                image.height(),
                self.config.width,
                self.config.height
            )));
        }

        let pts = match self.last_pts {
            Some(last) if pts <= last => last + 1,
            _ => pts,
        };
        self.last_pts = Some(pts);

        let mut rgba = frame::Video::new(format::Pixel::RGBA, self.config.width, self.config.height);
        {
            let stride = rgba.stride(0);
            let dst = rgba.data_mut(0);
            let src = image.as_raw();
            let row_bytes = self.config.width as usize * 4;
            for y in 0..self.config.height as usize {
                let src_off = y * row_bytes;
                let dst_off = y * stride;
                dst[dst_off..dst_off + row_bytes].copy_from_slice(&src[src_off..src_off + row_bytes]);
            }
        }

        let mut yuv = frame::Video::empty();
        self.scaler
            .run(&rgba, &mut yuv)
            .map_err(|e| Error::encode("converting frame to YUV", e))?;
        yuv.set_pts(Some(pts));

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| Error::encode("sending frame to encoder", e))?;
        self.frames_written += 1;
        trace!(pts, "Frame queued");

        self.drain_encoder()
    }

    /// Carries a packet from the host's audio stream into the output, either
    /// as-is or through the AAC encoder.
    ///
    /// Returns `false` when the packet belongs to a stream that is not routed.
    pub fn copy_packet(&mut self, input_index: usize, input_time_base: Rational, mut packet: Packet) -> Result<bool> {
        let route = match self.audio.as_mut() {
            Some(route) if route.input_index() == input_index => route,
            _ => return Ok(false),
        };

        match route {
            AudioRoute::Copy { output_index, .. } => {
                let output_index = *output_index;
                let ost_time_base = stream_time_base(&self.octx, output_index)?;
                packet.rescale_ts(input_time_base, ost_time_base);
                packet.set_position(-1);
                packet.set_stream(output_index);
                packet
                    .write_interleaved(&mut self.octx)
                    .map_err(|e| Error::encode("writing audio packet", e))?;
            }
            AudioRoute::Transcode { transcoder, .. } => transcoder.push(&packet, &mut self.octx)?,
        }
        self.audio_packets += 1;
        Ok(true)
    }

    /// Flushes the encoders and writes the trailer. Returns the number of
    /// video frames written.
    pub fn finish(mut self) -> Result<u64> {
        self.encoder
            .send_eof()
            .map_err(|e| Error::encode("flushing encoder", e))?;
        self.drain_encoder()?;
        if let Some(AudioRoute::Transcode { transcoder, .. }) = self.audio.as_mut() {
            transcoder.finish(&mut self.octx)?;
        }
        self.octx
            .write_trailer()
            .map_err(|e| Error::encode("writing container trailer", e))?;

        debug!(
            path = %self.path.display(),
            frames = self.frames_written,
            audio_packets = self.audio_packets,
            "Output finalized"
        );
        Ok(self.frames_written)
    }

    fn drain_encoder(&mut self) -> Result<()> {
        let ost_time_base = stream_time_base(&self.octx, self.video_index)?;
        let encoder_time_base = self.config.time_base();
        let mut encoded = Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(self.video_index);
            encoded.rescale_ts(encoder_time_base, ost_time_base);
            encoded
                .write_interleaved(&mut self.octx)
                .map_err(|e| Error::encode("writing video packet", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_h264_medium_crf_23() {
        let profile = EncoderProfile::default();
        assert_eq!(profile.codec, VideoCodec::H264);
        assert_eq!(profile.preset, "medium");
        assert_eq!(profile.crf, 23);
    }

    #[test]
    fn test_sink_time_base_is_inverse_frame_rate() {
        let config = SinkConfig::new(640, 360, Rational(30000, 1001));
        assert_eq!(config.time_base(), Rational(1001, 30000));
    }

    #[test]
    fn test_odd_sizes_pick_yuv444_when_offered() {
        use format::Pixel::{YUV420P, YUV444P};
        let x264_like = [YUV420P, YUV444P];
        let mpeg4_like = [YUV420P];

        assert_eq!(pixel_format_for(320, 180, &x264_like), YUV420P);
        assert_eq!(pixel_format_for(321, 181, &x264_like), YUV444P);
        assert_eq!(pixel_format_for(320, 181, &x264_like), YUV444P);
        assert_eq!(pixel_format_for(321, 181, &mpeg4_like), YUV420P);
        assert_eq!(pixel_format_for(321, 181, &[]), YUV420P);
    }

    #[test]
    fn test_odd_dimensions_open_an_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("odd.mp4");
        let config = SinkConfig::new(321, 181, Rational(10, 1));
        let mut sink = EncoderSink::create(&out, &config, &EncoderProfile::mpeg4(), None).unwrap();
        let image = RgbaImage::from_pixel(321, 181, image::Rgba([90, 90, 90, 255]));
        for pts in 0..5 {
            sink.write_frame(&image, pts).unwrap();
        }
        assert_eq!(sink.finish().unwrap(), 5);
        assert!(out.exists());
    }

    #[test]
    fn test_zero_dimensions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("empty.mp4");
        let config = SinkConfig::new(0, 180, Rational(10, 1));
        let result = EncoderSink::create(&out, &config, &EncoderProfile::mpeg4(), None);
        assert!(matches!(result, Err(Error::Encode(_))));
        assert!(!out.exists());
    }

    #[test]
    fn test_muxer_accepts_native_codecs_only() {
        crate::video_reader::init_ffmpeg().unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mp4 = format::output(&dir.path().join("a.mp4")).unwrap();
        assert!(muxer_accepts(&mp4, codec::Id::AAC));
        assert!(!muxer_accepts(&mp4, codec::Id::WMAV2));

        let mkv = format::output(&dir.path().join("a.mkv")).unwrap();
        assert!(muxer_accepts(&mkv, codec::Id::PCM_S16LE));

        let three_gp = format::output(&dir.path().join("a.3gp")).unwrap();
        assert!(muxer_accepts(&three_gp, codec::Id::AAC));
        assert!(!muxer_accepts(&three_gp, codec::Id::PCM_S16LE));
    }
}
