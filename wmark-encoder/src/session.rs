//! Compositing sessions
//!
//! A session takes one host video and one watermark and produces one output
//! file. It walks `Idle -> AssetsLoaded -> GeometryResolved -> Compositing`
//! and ends in `Finalized` or `Failed`. On any failure, including a panic
//! inside the pipeline, the partially written output is removed.

use crate::asset_loader::{load_watermark, watermark_mode_for};
use crate::encoder_sink::{EncoderProfile, EncoderSink, SinkConfig};
use crate::progress_tracker::ProgressTracker;
use crate::video_reader::{Demuxed, VideoReader};
use crate::{Error, Result};
use ffmpeg_next::Rescale;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use wmark_compositor::{CacheKey, FrameCompositor, ScaledWatermark, WatermarkCache};
use wmark_core::timing::estimated_frame_count;
use wmark_core::{Anchor, CompositionConfig, Dimensions, WatermarkMode};

/// Lifecycle of a compositing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AssetsLoaded,
    GeometryResolved,
    Compositing,
    Finalized,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AssetsLoaded => "assets_loaded",
            SessionState::GeometryResolved => "geometry_resolved",
            SessionState::Compositing => "compositing",
            SessionState::Finalized => "finalized",
            SessionState::Failed => "failed",
        }
    }
}

/// Settings for a compositing session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeOptions {
    pub config: CompositionConfig,
    pub profile: EncoderProfile,
}

impl ComposeOptions {
    pub fn with_config(mut self, config: CompositionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_profile(mut self, profile: EncoderProfile) -> Self {
        self.profile = profile;
        self
    }
}

/// The anchor an animated watermark moved to, and when
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorChange {
    /// Host time in seconds of the first frame at the new anchor
    pub at: f64,
    pub anchor: Anchor,
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct ComposeReport {
    pub output: PathBuf,
    pub mode: WatermarkMode,
    /// Watermark size on the host, in pixels
    pub watermark_size: Dimensions,
    pub frames: u64,
    /// Host audio made it into the output
    pub audio_copied: bool,
    /// Host audio was re-encoded to AAC instead of stream-copied
    pub audio_transcoded: bool,
    pub elapsed: Duration,
    /// Anchor at the first frame, then every change after it
    pub anchor_changes: Vec<AnchorChange>,
}

/// Removes the output file on drop unless committed
struct PartialOutput {
    path: PathBuf,
    committed: bool,
}

impl PartialOutput {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove partial output"),
        }
    }
}

/// Runs compositing sessions.
///
/// A compositor is cheap to share across threads; give several of them the
/// same [`WatermarkCache`] to prepare each watermark once per host size.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    options: ComposeOptions,
    cache: Option<Arc<WatermarkCache>>,
}

impl Compositor {
    pub fn new(options: ComposeOptions) -> Self {
        Self { options, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<WatermarkCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &ComposeOptions {
        &self.options
    }

    /// Overlays `watermark` onto `host` and writes the result to `output`.
    ///
    /// No file is left at `output` when this returns an error.
    pub fn compose(&self, host: &Path, watermark: &Path, output: &Path) -> Result<ComposeReport> {
        let mut session = Session::new(host, watermark, output);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            session.run(&self.options, self.cache.as_deref())
        }));

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(Error::Unexpected(panic_message(payload.as_ref()))),
        };

        if let Err(e) = &result {
            session.transition(SessionState::Failed);
            warn!(
                host = %host.display(),
                watermark = %watermark.display(),
                kind = e.kind().as_str(),
                error = %e,
                "Compositing failed"
            );
        }
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic during compositing: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic during compositing: {msg}")
    } else {
        "panic during compositing".to_string()
    }
}

struct Session<'a> {
    host: &'a Path,
    watermark: &'a Path,
    output: &'a Path,
    state: SessionState,
    started: Instant,
}

impl<'a> Session<'a> {
    fn new(host: &'a Path, watermark: &'a Path, output: &'a Path) -> Self {
        Self {
            host,
            watermark,
            output,
            state: SessionState::Idle,
            started: Instant::now(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "Session state");
        self.state = next;
    }

    fn prepare(&mut self, host: Dimensions, mode: WatermarkMode, scale: f64) -> Result<ScaledWatermark> {
        let asset = load_watermark(self.watermark)?;
        self.transition(SessionState::AssetsLoaded);

        let prepared = ScaledWatermark::prepare(&asset, host, scale)
            .map_err(|e| Error::from_compositor(e, self.watermark))?;
        debug_assert_eq!(prepared.mode(), mode);
        self.transition(SessionState::GeometryResolved);
        Ok(prepared)
    }

    fn run(&mut self, options: &ComposeOptions, cache: Option<&WatermarkCache>) -> Result<ComposeReport> {
        info!(
            host = %self.host.display(),
            watermark = %self.watermark.display(),
            output = %self.output.display(),
            "Starting compositing session"
        );

        let mut reader = VideoReader::open(self.host)?;
        let host_dims = reader.dimensions();
        let host_duration = reader.duration_secs();

        let config = &options.config;
        let mode = watermark_mode_for(self.watermark);
        let scale = config.scale_for(mode);
        if config.opacity_out_of_range(mode) {
            warn!(
                opacity = config.opacity_for(mode),
                "Opacity outside [0, 1], clamping"
            );
        }

        let watermark = match cache {
            Some(cache) => {
                let key = CacheKey::new(self.watermark, mode, scale, host_dims);
                let mut built = false;
                let entry = cache.get_or_try_insert_with(key, || {
                    built = true;
                    self.prepare(host_dims, mode, scale)
                })?;
                if !built {
                    debug!(watermark = %self.watermark.display(), "Prepared watermark cache hit");
                    self.transition(SessionState::AssetsLoaded);
                    self.transition(SessionState::GeometryResolved);
                }
                entry
            }
            None => Arc::new(self.prepare(host_dims, mode, scale)?),
        };
        let watermark_size = watermark.size();

        let compositor = FrameCompositor::new(Arc::clone(&watermark), host_dims, host_duration, config);
        debug!(
            mode = %mode,
            size = %watermark_size,
            opacity = compositor.opacity(),
            loop_period = compositor.loop_period(),
            "Compositor ready"
        );

        let sink_config = SinkConfig::new(host_dims.width, host_dims.height, reader.frame_rate());
        let host_time_base = reader.time_base();
        let sink_time_base = sink_config.time_base();

        // Declared before the sink so it is dropped after the file is closed.
        let guard = PartialOutput::new(self.output);
        let mut sink = EncoderSink::create(self.output, &sink_config, &options.profile, reader.audio_stream())?;
        self.transition(SessionState::Compositing);

        let total = estimated_frame_count(host_duration, reader.fps());
        let progress = ProgressTracker::new(total, "Compositing", ProgressTracker::interval_for(total));
        let mut anchor_changes: Vec<AnchorChange> = Vec::new();

        let decoded = reader.demux(|item| match item {
            Demuxed::Frame(mut frame) => {
                let placement = compositor
                    .composite(&mut frame.image, frame.seconds)
                    .map_err(|e| Error::from_compositor(e, self.watermark))?;
                trace!(
                    index = frame.index,
                    t = frame.seconds,
                    anchor = %placement.anchor,
                    x = placement.x,
                    y = placement.y,
                    watermark_frame = placement.frame_index,
                    "Composited frame"
                );

                if anchor_changes.last().map(|c| c.anchor) != Some(placement.anchor) {
                    anchor_changes.push(AnchorChange {
                        at: frame.seconds,
                        anchor: placement.anchor,
                    });
                }

                let pts = match frame.pts {
                    Some(ts) => ts.rescale(host_time_base, sink_time_base),
                    None => frame.index as i64,
                };
                sink.write_frame(&frame.image, pts)?;
                progress.increment();
                Ok(())
            }
            Demuxed::Packet {
                stream_index,
                time_base,
                packet,
            } => {
                sink.copy_packet(stream_index, time_base, packet)?;
                Ok(())
            }
        })?;

        if decoded == 0 {
            return Err(Error::asset_open(self.host, "no decodable video frames"));
        }

        let audio_copied = sink.has_audio();
        let audio_transcoded = sink.audio_transcoded();
        let frames = sink.finish()?;
        guard.commit();
        self.transition(SessionState::Finalized);
        progress.finish();

        let report = ComposeReport {
            output: self.output.to_path_buf(),
            mode,
            watermark_size,
            frames,
            audio_copied,
            audio_transcoded,
            elapsed: self.started.elapsed(),
            anchor_changes,
        };
        info!(
            output = %report.output.display(),
            frames = report.frames,
            mode = %report.mode,
            audio = report.audio_copied,
            audio_transcoded = report.audio_transcoded,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Compositing finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_output_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("dropped.mp4");
        let kept = dir.path().join("kept.mp4");
        std::fs::write(&dropped, b"partial").unwrap();
        std::fs::write(&kept, b"done").unwrap();

        drop(PartialOutput::new(&dropped));
        PartialOutput::new(&kept).commit();

        assert!(!dropped.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_partial_output_missing_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        drop(PartialOutput::new(&dir.path().join("never_created.mp4")));
    }

    #[test]
    fn test_panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "panic during compositing: boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "panic during compositing: bang");
    }

    #[test]
    fn test_missing_host_is_asset_open() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let err = Compositor::default()
            .compose(Path::new("/nonexistent/host.mp4"), Path::new("logo.png"), &out)
            .unwrap_err();
        assert!(matches!(err, Error::AssetOpen { .. }));
        assert!(!out.exists());
    }

    #[test]
    fn test_options_builders() {
        let options = ComposeOptions::default()
            .with_config(CompositionConfig::default().with_opacity(0.5))
            .with_profile(EncoderProfile::mpeg4());
        assert_eq!(options.config.opacity, 0.5);
        assert_eq!(options.profile, EncoderProfile::mpeg4());
    }
}
