//! Video reading and frame extraction using FFmpeg

use crate::{Error, Result};
use ffmpeg_next as ffmpeg;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, trace, warn};
use wmark_compositor::TimedFrame;
use wmark_core::Dimensions;

static FFMPEG_INIT: OnceLock<std::result::Result<(), ffmpeg::Error>> = OnceLock::new();

/// Initialize FFmpeg once per process
pub(crate) fn init_ffmpeg() -> Result<()> {
    let init = *FFMPEG_INIT.get_or_init(|| {
        let result = ffmpeg::init();
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        result
    });
    init.map_err(|e| Error::Unexpected(format!("FFmpeg initialization failed: {e}")))
}

/// Frame rate used when a stream reports none
const FALLBACK_FRAME_RATE: ffmpeg::Rational = ffmpeg::Rational(25, 1);

fn is_rational_valid(r: ffmpeg::Rational) -> bool {
    r.numerator() > 0 && r.denominator() > 0
}

fn rational_to_f64(r: ffmpeg::Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

/// A decoded host frame
pub struct DecodedFrame {
    /// Zero-based decode order index
    pub index: u64,
    /// Presentation timestamp in stream time base, if known
    pub pts: Option<i64>,
    /// Seconds since the first frame
    pub seconds: f64,
    /// RGBA pixels
    pub image: RgbaImage,
}

/// One unit of demuxer output
pub enum Demuxed {
    /// A decoded frame of the video stream
    Frame(DecodedFrame),
    /// A packet of any other stream, with that stream's time base
    Packet {
        stream_index: usize,
        time_base: ffmpeg::Rational,
        packet: ffmpeg::Packet,
    },
}

/// Converts decoded frames of any pixel format to RGBA images
struct RgbaConverter {
    scaler: Option<(ffmpeg::format::Pixel, u32, u32, ffmpeg::software::scaling::Context)>,
    rgba: ffmpeg::frame::Video,
}

impl RgbaConverter {
    fn new() -> Self {
        Self {
            scaler: None,
            rgba: ffmpeg::frame::Video::empty(),
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> std::result::Result<RgbaImage, ffmpeg::Error> {
        let (format, width, height) = (decoded.format(), decoded.width(), decoded.height());

        let stale = !matches!(&self.scaler, Some((f, w, h, _)) if *f == format && *w == width && *h == height);
        if stale {
            let scaler = ffmpeg::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg::format::Pixel::RGBA,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )?;
            self.scaler = Some((format, width, height, scaler));
        }

        if let Some((_, _, _, scaler)) = self.scaler.as_mut() {
            scaler.run(decoded, &mut self.rgba)?;
        }

        // Copy row by row; FFmpeg pads lines to its own stride.
        let stride = self.rgba.stride(0);
        let row_bytes = width as usize * 4;
        let src = self.rgba.data(0);
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for y in 0..height as usize {
            let offset = y * stride;
            pixels.extend_from_slice(&src[offset..offset + row_bytes]);
        }

        RgbaImage::from_raw(width, height, pixels).ok_or(ffmpeg::Error::InvalidData)
    }
}

/// Host videos are read through the same reader as video watermarks
pub type HostVideo = VideoReader;

/// Video reader that extracts frames from video files
pub struct VideoReader {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    video_stream_index: usize,
    audio_stream_index: Option<usize>,
    decoder: ffmpeg::codec::decoder::Video,
    time_base: ffmpeg::Rational,
    frame_rate: ffmpeg::Rational,
    duration_secs: f64,
}

impl VideoReader {
    /// Opens a video file.
    ///
    /// Fails with [`Error::AssetOpen`] if the file is unreadable, has no video
    /// stream or uses an unsupported codec.
    pub fn open(path: &Path) -> Result<Self> {
        init_ffmpeg()?;

        let input = ffmpeg::format::input(path).map_err(|e| Error::asset_open(path, e))?;

        // Find the video stream
        let video_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| Error::asset_open(path, "no video stream found"))?;

        let video_stream_index = video_stream.index();
        let time_base = video_stream.time_base();

        let avg_rate = video_stream.avg_frame_rate();
        let frame_rate = if is_rational_valid(avg_rate) {
            avg_rate
        } else if is_rational_valid(video_stream.rate()) {
            video_stream.rate()
        } else {
            warn!(path = %path.display(), "No usable frame rate, assuming 25 fps");
            FALLBACK_FRAME_RATE
        };

        let duration = video_stream.duration();
        let duration_secs = if duration > 0 && is_rational_valid(time_base) {
            duration as f64 * rational_to_f64(time_base)
        } else if input.duration() > 0 {
            // Fallback to container duration
            input.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
        } else {
            0.0
        };

        // Create decoder
        let context = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .map_err(|e| Error::asset_open(path, e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| Error::asset_open(path, format!("unsupported video codec: {e}")))?;

        let audio_stream_index = input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .map(|stream| stream.index());

        debug!(
            path = %path.display(),
            width = decoder.width(),
            height = decoder.height(),
            fps = rational_to_f64(frame_rate),
            duration_secs,
            has_audio = audio_stream_index.is_some(),
            "Opened video"
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            video_stream_index,
            audio_stream_index,
            decoder,
            time_base,
            frame_rate,
            duration_secs,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gets the video width
    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    /// Gets the video height
    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width(), self.height())
    }

    /// Gets the frame rate as a rational number
    pub fn frame_rate(&self) -> ffmpeg::Rational {
        self.frame_rate
    }

    /// Frames per second as a float
    pub fn fps(&self) -> f64 {
        rational_to_f64(self.frame_rate)
    }

    /// Time base of the video stream
    pub fn time_base(&self) -> ffmpeg::Rational {
        self.time_base
    }

    /// Gets the total duration in seconds (zero if unknown)
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn has_audio(&self) -> bool {
        self.audio_stream_index.is_some()
    }

    /// The audio stream carried through to the output, if any
    pub fn audio_stream(&self) -> Option<ffmpeg::Stream<'_>> {
        self.audio_stream_index.and_then(|index| self.input.stream(index))
    }

    /// Reads all frames of the video stream into memory.
    ///
    /// Other streams, including audio, are skipped.
    pub fn read_frames(&mut self) -> Result<Vec<TimedFrame>> {
        let mut frames = Vec::new();
        self.demux(|item| {
            if let Demuxed::Frame(frame) = item {
                frames.push(TimedFrame::new(frame.seconds, frame.image));
            }
            Ok(())
        })?;
        Ok(frames)
    }

    /// Demuxes the whole file once.
    ///
    /// Video packets are decoded and handed over as RGBA frames in
    /// presentation order. Every other packet is handed over untouched.
    /// Returns the number of decoded video frames.
    pub fn demux<F>(&mut self, mut handle: F) -> Result<u64>
    where
        F: FnMut(Demuxed) -> Result<()>,
    {
        let mut state = DecodeState {
            path: self.path.clone(),
            converter: RgbaConverter::new(),
            time_base: self.time_base,
            fps: self.fps(),
            origin: None,
            next_index: 0,
        };

        for (stream, packet) in self.input.packets() {
            if stream.index() == self.video_stream_index {
                self.decoder
                    .send_packet(&packet)
                    .map_err(|e| Error::asset_open(&self.path, format!("decode failed: {e}")))?;
                state.drain(&mut self.decoder, &mut handle)?;
            } else {
                handle(Demuxed::Packet {
                    stream_index: stream.index(),
                    time_base: stream.time_base(),
                    packet,
                })?;
            }
        }

        // Flush decoder
        self.decoder
            .send_eof()
            .map_err(|e| Error::asset_open(&self.path, format!("decoder flush failed: {e}")))?;
        state.drain(&mut self.decoder, &mut handle)?;

        trace!(path = %self.path.display(), frames = state.next_index, "Finished demuxing");
        Ok(state.next_index)
    }
}

struct DecodeState {
    path: PathBuf,
    converter: RgbaConverter,
    time_base: ffmpeg::Rational,
    fps: f64,
    origin: Option<i64>,
    next_index: u64,
}

impl DecodeState {
    fn drain<F>(&mut self, decoder: &mut ffmpeg::decoder::Video, handle: &mut F) -> Result<()>
    where
        F: FnMut(Demuxed) -> Result<()>,
    {
        let mut decoded = ffmpeg::frame::Video::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let image = self
                .converter
                .convert(&decoded)
                .map_err(|e| Error::asset_open(&self.path, format!("frame conversion failed: {e}")))?;

            let index = self.next_index;
            self.next_index += 1;

            let pts = decoded.timestamp();
            let seconds = match pts {
                Some(ts) if is_rational_valid(self.time_base) => {
                    let origin = *self.origin.get_or_insert(ts);
                    (ts - origin) as f64 * rational_to_f64(self.time_base)
                }
                _ if self.fps > 0.0 => index as f64 / self.fps,
                _ => 0.0,
            };

            handle(Demuxed::Frame(DecodedFrame {
                index,
                pts,
                seconds,
                image,
            }))?;
        }
        Ok(())
    }
}
