//! End-to-end compositing tests on synthesized clips

use ffmpeg_next::format::{sample, Sample};
use ffmpeg_next::{codec, encoder, format, frame, media, ChannelLayout, Packet, Rational};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use wmark_compositor::WatermarkCache;
use wmark_core::{CompositionConfig, WatermarkMode};
use wmark_encoder::{
    probe_host, probe_watermark, ComposeOptions, Compositor, EncoderProfile, EncoderSink, Error,
    SinkConfig, VideoReader,
};

const HOST_GRAY: [u8; 4] = [40, 40, 40, 255];
const TONE_RATE: i32 = 48_000;
const TONE_FORMAT: Sample = Sample::I16(sample::Type::Packed);

fn write_clip(path: &Path, width: u32, height: u32, fps: i32, frames: u32, pixel: [u8; 4]) {
    let config = SinkConfig::new(width, height, Rational(fps, 1));
    let mut sink = EncoderSink::create(path, &config, &EncoderProfile::mpeg4(), None).unwrap();
    let image = RgbaImage::from_pixel(width, height, Rgba(pixel));
    for i in 0..frames {
        sink.write_frame(&image, i as i64).unwrap();
    }
    sink.finish().unwrap();
}

/// 320x180, 10 fps, 10 s of flat gray
fn write_host(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("host.mp4");
    write_clip(&path, 320, 180, 10, 100, HOST_GRAY);
    path
}

/// 64x32, 10 fps, 2 s of white
fn write_animated_watermark(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("watermark.mp4");
    write_clip(&path, 64, 32, 10, 20, [255, 255, 255, 255]);
    path
}

fn mpeg4_options() -> ComposeOptions {
    ComposeOptions::default().with_profile(EncoderProfile::mpeg4())
}

fn has_libx264() -> bool {
    ffmpeg_next::init().unwrap();
    encoder::find_by_name("libx264").is_some()
}

fn drain_tone(encoder: &mut encoder::Audio, octx: &mut format::context::Output, index: usize) {
    let ost_time_base = octx.stream(index).unwrap().time_base();
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(index);
        packet.rescale_ts(Rational(1, TONE_RATE), ost_time_base);
        packet.write_interleaved(octx).unwrap();
    }
}

/// Audio-only Matroska file holding a mono 16-bit PCM sine tone
fn write_tone(path: &Path, seconds: u32) {
    ffmpeg_next::init().unwrap();
    let mut octx = format::output(&path).unwrap();
    let pcm = encoder::find(codec::Id::PCM_S16LE).unwrap();
    let mut audio = codec::context::Context::new_with_codec(pcm)
        .encoder()
        .audio()
        .unwrap();
    audio.set_rate(TONE_RATE);
    audio.set_channel_layout(ChannelLayout::MONO);
    audio.set_format(TONE_FORMAT);
    audio.set_time_base(Rational(1, TONE_RATE));
    let mut encoder = audio.open_as(pcm).unwrap();
    let index = {
        let mut ost = octx.add_stream(pcm).unwrap();
        ost.set_parameters(&encoder);
        ost.index()
    };
    octx.write_header().unwrap();

    let chunk = TONE_RATE as usize / 10;
    for i in 0..seconds as usize * 10 {
        let mut tone = frame::Audio::new(TONE_FORMAT, chunk, ChannelLayout::MONO);
        tone.set_rate(TONE_RATE as u32);
        let start = i * chunk;
        for (n, sample) in tone.plane_mut::<i16>(0).iter_mut().enumerate() {
            let t = (start + n) as f32 / TONE_RATE as f32;
            *sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
        }
        tone.set_pts(Some(start as i64));
        encoder.send_frame(&tone).unwrap();
        drain_tone(&mut encoder, &mut octx, index);
    }
    encoder.send_eof().unwrap();
    drain_tone(&mut encoder, &mut octx, index);
    octx.write_trailer().unwrap();
}

/// 320x180, 10 fps, 10 s of flat gray with a PCM tone, in Matroska
fn write_host_with_audio(dir: &Path) -> PathBuf {
    let tone = dir.join("tone.mkv");
    write_tone(&tone, 10);

    let path = dir.join("host_audio.mkv");
    let mut ictx = format::input(&tone).unwrap();
    let stream = ictx.streams().best(media::Type::Audio).unwrap();
    let (audio_index, audio_time_base) = (stream.index(), stream.time_base());
    let config = SinkConfig::new(320, 180, Rational(10, 1));
    let mut sink = EncoderSink::create(&path, &config, &EncoderProfile::mpeg4(), Some(stream)).unwrap();
    assert!(!sink.audio_transcoded());

    let mut audio: Vec<(f64, Packet)> = ictx
        .packets()
        .filter(|(stream, _)| stream.index() == audio_index)
        .map(|(_, packet)| {
            let secs = packet.pts().unwrap_or(0) as f64 * f64::from(audio_time_base);
            (secs, packet)
        })
        .collect();
    audio.reverse();

    let image = RgbaImage::from_pixel(320, 180, Rgba(HOST_GRAY));
    for i in 0..100 {
        sink.write_frame(&image, i).unwrap();
        let until = (i + 1) as f64 / 10.0;
        while audio.last().is_some_and(|(secs, _)| *secs < until) {
            if let Some((_, packet)) = audio.pop() {
                sink.copy_packet(audio_index, audio_time_base, packet).unwrap();
            }
        }
    }
    while let Some((_, packet)) = audio.pop() {
        sink.copy_packet(audio_index, audio_time_base, packet).unwrap();
    }
    sink.finish().unwrap();
    path
}

fn output_audio_codec(path: &Path) -> Option<codec::Id> {
    let ictx = format::input(&path).unwrap();
    let stream = ictx.streams().best(media::Type::Audio)?;
    Some(stream.parameters().id())
}

fn luma(image: &RgbaImage, x: u32, y: u32) -> u8 {
    let p = image.get_pixel(x, y);
    ((p[0] as u32 + p[1] as u32 + p[2] as u32) / 3) as u8
}

#[test]
fn test_fixture_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let host = write_host(dir.path());
    let watermark = write_animated_watermark(dir.path());

    let info = probe_host(&host).unwrap();
    assert_eq!((info.dimensions.width, info.dimensions.height), (320, 180));
    assert!((info.fps() - 10.0).abs() < 1e-6);
    assert!((info.duration - 10.0).abs() < 0.2, "duration {}", info.duration);
    assert!(!info.has_audio);

    let wm = probe_watermark(&watermark).unwrap();
    assert_eq!(wm.mode, WatermarkMode::Animated);
    assert_eq!(wm.frame_count, 20);
    assert!((wm.duration - 2.0).abs() < 0.05, "duration {}", wm.duration);
}

#[test]
fn test_animated_watermark_cycles_anchors() {
    let dir = tempfile::tempdir().unwrap();
    let host = write_host(dir.path());
    let watermark = write_animated_watermark(dir.path());
    let output = dir.path().join("out.mp4");

    let report = Compositor::new(mpeg4_options())
        .compose(&host, &watermark, &output)
        .unwrap();

    assert_eq!(report.mode, WatermarkMode::Animated);
    assert_eq!(report.frames, 100);
    assert!(!report.audio_copied);
    // max(44.8, 25.2, 52.5) rounds to 53; 53 * 32 / 64 rounds to 27
    assert_eq!((report.watermark_size.width, report.watermark_size.height), (53, 27));

    let names: Vec<&str> = report.anchor_changes.iter().map(|c| c.anchor.name()).collect();
    assert_eq!(
        names,
        ["left-top", "right-center", "left-bottom", "left-top", "right-center"]
    );
    for (k, change) in report.anchor_changes.iter().enumerate() {
        assert!((change.at - 2.0 * k as f64).abs() < 0.15, "change {k} at {}", change.at);
    }
}

#[test]
fn test_output_keeps_host_timing_and_shows_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let host = write_host(dir.path());
    let watermark = write_animated_watermark(dir.path());
    let output = dir.path().join("out.mp4");

    Compositor::new(mpeg4_options())
        .compose(&host, &watermark, &output)
        .unwrap();

    let info = probe_host(&output).unwrap();
    assert_eq!((info.dimensions.width, info.dimensions.height), (320, 180));
    assert!((info.fps() - 10.0).abs() < 1e-6);
    assert!((info.duration - 10.0).abs() < 0.2, "duration {}", info.duration);

    let frames = VideoReader::open(&output).unwrap().read_frames().unwrap();
    assert_eq!(frames.len(), 100);

    // Left-top at margin 6: the watermark covers (6..59, 6..33).
    let first = &frames[0].image;
    assert!(luma(first, 32, 19) > 150, "watermark luma {}", luma(first, 32, 19));
    assert!(luma(first, 300, 160) < 80, "background luma {}", luma(first, 300, 160));

    // Right-center during the second cycle: x from 260, y from 76.
    let second_cycle = &frames[25].image;
    assert!(luma(second_cycle, 287, 90) > 150);
    assert!(luma(second_cycle, 32, 19) < 80);
}

#[test]
fn test_static_watermark_bottom_right() {
    let dir = tempfile::tempdir().unwrap();
    let host = dir.path().join("host.mp4");
    write_clip(&host, 320, 180, 10, 10, HOST_GRAY);
    let logo = dir.path().join("logo.png");
    image::RgbImage::from_pixel(100, 50, image::Rgb([255, 255, 255]))
        .save(&logo)
        .unwrap();
    let output = dir.path().join("out.mp4");

    let report = Compositor::new(mpeg4_options())
        .compose(&host, &logo, &output)
        .unwrap();

    assert_eq!(report.mode, WatermarkMode::Static);
    // 320 * 0.15 = 48 wide, half as tall
    assert_eq!((report.watermark_size.width, report.watermark_size.height), (48, 24));
    assert_eq!(report.anchor_changes.len(), 1);
    assert_eq!(report.anchor_changes[0].anchor.name(), "right-bottom");

    // Padding 6.4: top-left at (265, 149)
    let frames = VideoReader::open(&output).unwrap().read_frames().unwrap();
    let last = &frames[frames.len() - 1].image;
    assert!(luma(last, 290, 162) > 200, "watermark luma {}", luma(last, 290, 162));
    assert!(luma(last, 20, 20) < 80);
}

#[test]
fn test_empty_watermark_file_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let host = write_host(dir.path());
    let watermark = dir.path().join("empty.mp4");
    std::fs::write(&watermark, b"").unwrap();
    let output = dir.path().join("out.mp4");

    let err = Compositor::new(mpeg4_options())
        .compose(&host, &watermark, &output)
        .unwrap_err();
    assert!(matches!(err, Error::AssetOpen { .. }), "got {err:?}");
    assert!(!output.exists());
}

#[test]
fn test_corrupt_image_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let host = write_host(dir.path());
    let logo = dir.path().join("logo.png");
    std::fs::write(&logo, b"definitely not a png").unwrap();
    let output = dir.path().join("out.mp4");

    let err = Compositor::new(mpeg4_options())
        .compose(&host, &logo, &output)
        .unwrap_err();
    assert!(matches!(err, Error::AssetOpen { .. }), "got {err:?}");
    assert!(!output.exists());
}

#[test]
fn test_zero_scale_is_degenerate_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let host = write_host(dir.path());
    let watermark = write_animated_watermark(dir.path());
    let output = dir.path().join("out.mp4");

    let options = mpeg4_options().with_config(CompositionConfig::default().with_scale(0.0));
    let err = Compositor::new(options)
        .compose(&host, &watermark, &output)
        .unwrap_err();
    assert!(matches!(err, Error::DegenerateGeometry { .. }), "got {err:?}");
    assert!(!output.exists());
}

#[test]
fn test_concurrent_sessions_share_prepared_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let host = dir.path().join("host.mp4");
    write_clip(&host, 320, 180, 10, 20, HOST_GRAY);
    let watermark = write_animated_watermark(dir.path());
    let cache = Arc::new(WatermarkCache::new());

    let reports: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let compositor = Compositor::new(mpeg4_options()).with_cache(Arc::clone(&cache));
                let (host, watermark) = (&host, &watermark);
                let output = dir.path().join(format!("out_{i}.mp4"));
                scope.spawn(move || compositor.compose(host, watermark, &output))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for report in reports {
        let report = report.unwrap();
        assert_eq!(report.frames, 20);
        assert!(report.output.exists());
    }
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_odd_host_dimensions_are_composited() {
    let dir = tempfile::tempdir().unwrap();
    let host = dir.path().join("odd.mp4");
    write_clip(&host, 321, 181, 10, 30, HOST_GRAY);
    let watermark = write_animated_watermark(dir.path());

    let output = dir.path().join("out.mp4");
    let report = Compositor::new(mpeg4_options())
        .compose(&host, &watermark, &output)
        .unwrap();
    assert_eq!(report.frames, 30);
    let info = probe_host(&output).unwrap();
    assert_eq!((info.dimensions.width, info.dimensions.height), (321, 181));

    // libx264 takes odd sizes through 4:4:4
    if has_libx264() {
        let output = dir.path().join("out_h264.mp4");
        let report = Compositor::new(ComposeOptions::default())
            .compose(&host, &watermark, &output)
            .unwrap();
        assert_eq!(report.frames, 30);
        let frames = VideoReader::open(&output).unwrap().read_frames().unwrap();
        assert_eq!(frames.len(), 30);
        assert_eq!(frames[0].image.dimensions(), (321, 181));
    }
}

#[test]
fn test_host_audio_is_copied_when_container_accepts_it() {
    let dir = tempfile::tempdir().unwrap();
    let host = write_host_with_audio(dir.path());
    assert!(probe_host(&host).unwrap().has_audio);
    let watermark = write_animated_watermark(dir.path());
    let output = dir.path().join("out.mkv");

    let report = Compositor::new(mpeg4_options())
        .compose(&host, &watermark, &output)
        .unwrap();

    assert!(report.audio_copied);
    assert!(!report.audio_transcoded);
    assert_eq!(report.frames, 100);
    let info = probe_host(&output).unwrap();
    assert!(info.has_audio);
    assert!((info.duration - 10.0).abs() < 0.3, "duration {}", info.duration);
    assert_eq!(output_audio_codec(&output), Some(codec::Id::PCM_S16LE));
}

#[test]
fn test_host_audio_is_reencoded_when_container_rejects_it() {
    let dir = tempfile::tempdir().unwrap();
    let host = write_host_with_audio(dir.path());
    let watermark = write_animated_watermark(dir.path());
    // 3GP has no tag for PCM
    let output = dir.path().join("out.3gp");

    let report = Compositor::new(mpeg4_options())
        .compose(&host, &watermark, &output)
        .unwrap();

    assert!(report.audio_copied);
    assert!(report.audio_transcoded);
    assert_eq!(report.frames, 100);
    assert!(probe_host(&output).unwrap().has_audio);
    assert_eq!(output_audio_codec(&output), Some(codec::Id::AAC));
}

#[test]
fn test_unwritable_output_is_encode_error() {
    let dir = tempfile::tempdir().unwrap();
    let host = write_host(dir.path());
    let watermark = write_animated_watermark(dir.path());
    let output = dir.path().join("missing").join("out.mp4");

    let err = Compositor::new(mpeg4_options())
        .compose(&host, &watermark, &output)
        .unwrap_err();
    assert!(matches!(err, Error::Encode(_)), "got {err:?}");
    assert!(!output.exists());
}

#[test]
fn test_encoder_open_failure_removes_partial_output() {
    if !has_libx264() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let host = write_host(dir.path());
    let watermark = write_animated_watermark(dir.path());
    let output = dir.path().join("out.mp4");

    let options = ComposeOptions::default().with_profile(EncoderProfile::default().with_preset("not-a-preset"));
    let err = Compositor::new(options)
        .compose(&host, &watermark, &output)
        .unwrap_err();
    assert!(matches!(err, Error::Encode(_)), "got {err:?}");
    assert!(!output.exists());
}
