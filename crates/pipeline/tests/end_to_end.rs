//! Full-flow tests: capture through delivery on synthetic sources.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cinemagraph_capture_engine::{FnSource, FrameSource, GifFileSource, MemorySource};
use cinemagraph_common::config::PipelineConfig;
use cinemagraph_common::logging::init_default_logging;
use cinemagraph_common::error::{CinemagraphError, CinemagraphResult};
use cinemagraph_frame_model::{Stroke, Zone};
use cinemagraph_pipeline::{Orchestrator, PipelineEvent, PipelineState};
use cinemagraph_render_engine::{ArtifactSink, EncodeProgress};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, Rgba, RgbaImage};

const RED: [u8; 4] = [255, 0, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];
const FRAME_NS: u64 = 33_333_333;

/// Remembers what it was given and answers with a fixed URL.
#[derive(Default)]
struct RecordingSink {
    received: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl ArtifactSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, gif: &[u8]) -> CinemagraphResult<String> {
        self.received.lock().unwrap().push(gif.to_vec());
        Ok("https://example.invalid/uploads/1.gif".to_string())
    }
}

struct RefusingSink;

#[async_trait]
impl ArtifactSink for RefusingSink {
    fn name(&self) -> &str {
        "refusing"
    }

    async fn deliver(&self, _gif: &[u8]) -> CinemagraphResult<String> {
        Err(CinemagraphError::upload_fault(
            "There was an error uploading the file.",
        ))
    }
}

/// Red on the first grab, blue afterwards.
fn red_then_blue(width: u32, height: u32) -> Box<dyn FrameSource> {
    let mut grabs = 0usize;
    Box::new(FnSource::new("red-then-blue", (width, height), move |_| {
        let color = if grabs == 0 { RED } else { BLUE };
        grabs += 1;
        Ok(RgbaImage::from_pixel(width, height, Rgba(color)))
    }))
}

fn record(o: &mut Orchestrator, ticks: u64, duration_ns: u64) {
    o.start_recording().unwrap();
    for i in 0..ticks {
        o.capture_tick_at(i * FRAME_NS).unwrap();
    }
    assert_eq!(o.stop_recording_at(duration_ns).unwrap(), PipelineState::Editing);
}

fn decode(gif: &[u8]) -> Vec<RgbaImage> {
    GifDecoder::new(Cursor::new(gif.to_vec()))
        .unwrap()
        .into_frames()
        .collect_frames()
        .unwrap()
        .into_iter()
        .map(|f| f.into_buffer())
        .collect()
}

#[test]
fn sixty_refreshes_over_two_seconds_resample_to_thirty_two() {
    let mut grabs = 0u8;
    let source = FnSource::new("counter", (2, 2), move |_| {
        let img = RgbaImage::from_pixel(2, 2, Rgba([grabs, 0, 0, 255]));
        grabs += 1;
        Ok(img)
    });
    let mut o = Orchestrator::new(PipelineConfig::default(), Box::new(source)).unwrap();
    record(&mut o, 60, 2_000_000_000);

    let sequence = o.sequence().unwrap();
    assert_eq!(sequence.len(), 32);
    let picked: Vec<u8> = sequence.iter().map(|f| f.pixel(0, 0)[0]).collect();
    assert_eq!(picked[0], 0);
    assert_eq!(picked[1], 1);
    assert_eq!(picked[2], 3);
    assert_eq!(*picked.last().unwrap(), 58);
    assert!(picked.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn left_half_freeze_encodes_and_delivers() {
    init_default_logging();
    let sink = Arc::new(RecordingSink::default());
    let mut o = Orchestrator::new(PipelineConfig::default(), red_then_blue(8, 4))
        .unwrap()
        .with_sink(sink.clone());

    let reports = Arc::new(Mutex::new(Vec::<EncodeProgress>::new()));
    let seen = Arc::clone(&reports);
    o.set_progress_observer(Box::new(move |p| seen.lock().unwrap().push(p)));

    record(&mut o, 30, 1_000_000_000);
    assert_eq!(o.sequence().unwrap().len(), 16);

    let mut mask = o.new_mask().unwrap();
    mask.fill_rect(0, 0, 4, 4, 255);
    o.handle(PipelineEvent::AddZone(Zone::freeze(mask))).await.unwrap();
    assert_eq!(
        o.handle(PipelineEvent::Composite).await.unwrap(),
        PipelineState::Encoding
    );
    assert_eq!(o.poll_encoder().await.unwrap(), PipelineState::Complete);

    let reports = reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 16);
    assert!(reports
        .windows(2)
        .all(|w| w[0].frames_encoded < w[1].frames_encoded));

    let frames = decode(o.gif().unwrap());
    assert_eq!(frames.len(), 16);
    let later = &frames[5];
    for y in 0..4 {
        assert_eq!(later.get_pixel(0, y).0, RED);
        assert_eq!(later.get_pixel(3, y).0, RED);
        assert_eq!(later.get_pixel(4, y).0, BLUE);
        assert_eq!(later.get_pixel(7, y).0, BLUE);
    }

    let state = o.handle(PipelineEvent::Deliver).await.unwrap();
    assert_eq!(state, PipelineState::Complete);
    assert_eq!(
        o.delivered_url(),
        Some("https://example.invalid/uploads/1.gif")
    );
    assert_eq!(sink.received.lock().unwrap().len(), 1);
    assert_eq!(sink.received.lock().unwrap()[0], o.gif().unwrap());
}

#[tokio::test]
async fn brush_zone_with_nothing_painted_passes_through() {
    let mut o = Orchestrator::new(PipelineConfig::default(), red_then_blue(6, 6)).unwrap();
    record(&mut o, 20, 1_000_000_000);

    let mut mask = o.new_mask().unwrap();
    mask.erase(&Stroke::new(vec![(3.0, 3.0)], 2.0, 255));
    o.add_zone(Zone::freeze(mask)).unwrap();
    o.composite().unwrap();
    o.poll_encoder().await.unwrap();

    let frames = decode(o.gif().unwrap());
    assert_eq!(frames[0].get_pixel(2, 2).0, RED);
    assert_eq!(frames[3].get_pixel(2, 2).0, BLUE);
}

#[tokio::test]
async fn restart_during_encoding_discards_the_job() {
    let noise = |seed: u32| {
        RgbaImage::from_fn(200, 150, move |x, y| {
            let v = x.wrapping_mul(2_654_435_761).wrapping_add(y.wrapping_mul(40_503)) ^ seed;
            Rgba([v as u8, (v >> 8) as u8, (v >> 16) as u8, 255])
        })
    };
    let source = MemorySource::new("noise", (0..4).map(noise).collect()).unwrap();
    let mut o = Orchestrator::new(PipelineConfig::default(), Box::new(source)).unwrap();

    let reports = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&reports);
    o.set_progress_observer(Box::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    record(&mut o, 60, 2_000_000_000);
    let mut mask = o.new_mask().unwrap();
    mask.fill_rect(0, 0, 100, 150, 255);
    o.add_zone(Zone::freeze(mask)).unwrap();
    o.composite().unwrap();
    assert_eq!(o.state(), PipelineState::Encoding);

    assert_eq!(
        o.handle(PipelineEvent::Restart).await.unwrap(),
        PipelineState::Recording
    );
    let tail: Vec<_> = o
        .transitions()
        .iter()
        .rev()
        .take(2)
        .map(|t| (t.from, t.to))
        .collect();
    assert_eq!(
        tail,
        vec![
            (PipelineState::Error, PipelineState::Recording),
            (PipelineState::Encoding, PipelineState::Error),
        ]
    );
    assert!(o.gif().is_none());
    assert!(o.sequence().is_none());
    assert!(o.zones().is_empty());
    assert_eq!(reports.load(Ordering::SeqCst), 0);

    // The encoder slot is free again: a second run completes.
    for i in 0..20 {
        o.capture_tick_at(i * FRAME_NS).unwrap();
    }
    o.stop_recording_at(700_000_000).unwrap();
    let mask = o.new_mask().unwrap();
    o.add_zone(Zone::freeze(mask)).unwrap();
    o.composite().unwrap();
    assert_eq!(o.poll_encoder().await.unwrap(), PipelineState::Complete);
    assert_eq!(decode(o.gif().unwrap()).len(), 11);
}

#[tokio::test]
async fn failed_delivery_stays_complete() {
    let mut o = Orchestrator::new(PipelineConfig::default(), red_then_blue(4, 4))
        .unwrap()
        .with_sink(Arc::new(RefusingSink));
    record(&mut o, 20, 1_000_000_000);
    let mask = o.new_mask().unwrap();
    o.add_zone(Zone::freeze(mask)).unwrap();
    o.composite().unwrap();
    o.poll_encoder().await.unwrap();

    let err = o.deliver().await.unwrap_err();
    assert!(matches!(err, CinemagraphError::UploadFault { .. }));
    assert_eq!(o.state(), PipelineState::Complete);
    assert!(o.last_error().unwrap().contains("error uploading"));
    assert!(o.gif().is_some());

    // Start over from COMPLETE.
    assert_eq!(o.restart().unwrap(), PipelineState::Recording);
}

#[tokio::test]
async fn pumping_from_a_render_loop_reaches_complete() {
    let mut o = Orchestrator::new(PipelineConfig::default(), red_then_blue(4, 4)).unwrap();
    record(&mut o, 20, 1_000_000_000);
    let mask = o.new_mask().unwrap();
    o.add_zone(Zone::freeze(mask)).unwrap();
    o.composite().unwrap();

    while o.pump_encoder().unwrap() == PipelineState::Encoding {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(o.state(), PipelineState::Complete);
}

#[tokio::test]
async fn uploaded_gif_becomes_a_cinemagraph() {
    // First run produces a GIF that the second run uses as its source.
    let mut first = Orchestrator::new(PipelineConfig::default(), red_then_blue(6, 4)).unwrap();
    record(&mut first, 20, 1_000_000_000);
    let mask = first.new_mask().unwrap();
    first.add_zone(Zone::freeze(mask)).unwrap();
    first.composite().unwrap();
    first.poll_encoder().await.unwrap();
    let uploaded = first.gif().unwrap().to_vec();

    let source = GifFileSource::from_bytes("upload.gif", &uploaded).unwrap();
    let mut second = Orchestrator::new(PipelineConfig::default(), Box::new(source)).unwrap();
    record(&mut second, 30, 1_000_000_000);
    assert_eq!(second.sequence().unwrap().dimensions(), Some((6, 4)));

    let mut mask = second.new_mask().unwrap();
    mask.fill_rect(0, 0, 6, 4, 255);
    second.add_zone(Zone::freeze(mask)).unwrap();
    second.composite().unwrap();
    second.poll_encoder().await.unwrap();

    // Fully frozen: every frame matches the first.
    let frames = decode(second.gif().unwrap());
    let reference = frames[0].clone();
    assert!(frames.iter().all(|f| *f == reference));
}
