use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::*;
use crate::backend::LookaheadEncoder;
use crate::error::BackendError;
use crate::logging::{StreamSink, Verbosity};

fn quiet() -> Arc<dyn LogSink> {
    Arc::new(StreamSink::new(std::io::sink(), std::io::sink()))
}

fn settings(width: u32, height: u32, pixel_format: &str) -> Settings {
    Settings {
        width,
        height,
        pixel_format: pixel_format.to_string(),
        ..Default::default()
    }
}

/// Packed 8-bit picture whose samples count up from `seed`.
fn frame_8bit(width: u32, height: u32, seed: u8) -> RawVideoFrame {
    let size = PixelFormat::Yuv420p.frame_size(width, height);
    let data: Vec<u8> = (0..size).map(|i| (i as u8).wrapping_add(seed)).collect();
    RawVideoFrame::from_packed(PixelFormat::Yuv420p, width, height, Bytes::from(data)).unwrap()
}

#[derive(Default)]
struct Calls {
    opened: bool,
    closed: bool,
    verbosity: Option<Verbosity>,
    luma: Vec<i16>,
    chroma: Vec<i16>,
    cts: Option<(i64, bool)>,
    sequence_number: u64,
    encodes: usize,
}

enum Step {
    Empty,
    Unit { size: usize, cts: i64, dts: i64, intra: bool },
    Fail,
}

/// Scripted backend recording what the adapter hands it.
struct Scripted {
    calls: Arc<Mutex<Calls>>,
    steps: VecDeque<Step>,
    fail_open: bool,
    fail_close: bool,
}

impl Scripted {
    fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        (
            Self {
                calls: calls.clone(),
                steps: steps.into(),
                fail_open: false,
                fail_close: false,
            },
            calls,
        )
    }
}

struct VerbosityRecorder(Mutex<Option<Verbosity>>);

impl EncoderBackend for Scripted {
    fn open(
        &mut self,
        config: &mut EncoderConfig,
        _log: Arc<dyn LogSink>,
    ) -> std::result::Result<(), BackendError> {
        if self.fail_open {
            return Err(BackendError::new(-7, "rejected"));
        }
        let mut calls = self.calls.lock().unwrap();
        calls.opened = true;
        calls.verbosity = Some(config.verbosity);
        Ok(())
    }

    fn encode(
        &mut self,
        picture: Option<&YuvBuffer>,
        au: &mut AccessUnit,
    ) -> std::result::Result<bool, BackendError> {
        let mut calls = self.calls.lock().unwrap();
        calls.encodes += 1;
        if let Some(picture) = picture {
            calls.luma = picture.plane(0).samples().to_vec();
            calls.chroma = picture.plane(1).samples().to_vec();
            calls.cts = Some((picture.cts, picture.cts_valid));
            calls.sequence_number = picture.sequence_number;
        }
        au.reset();
        match self.steps.pop_front().unwrap_or(Step::Empty) {
            Step::Empty => {}
            Step::Unit {
                size,
                cts,
                dts,
                intra,
            } => {
                au.append(&vec![0xab; size])?;
                au.cts = cts;
                au.dts = dts;
                au.cts_valid = true;
                au.is_intra = intra;
                au.is_ref_pic = true;
            }
            Step::Fail => return Err(BackendError::new(-1, "boom")),
        }
        Ok(picture.is_none() && self.steps.is_empty())
    }

    fn close(&mut self) -> std::result::Result<(), BackendError> {
        self.calls.lock().unwrap().closed = true;
        if self.fail_close {
            return Err(BackendError::new(-1, "close failed"));
        }
        Ok(())
    }
}

/// Backend that accepts pictures but never reports itself drained.
struct Stuck;

impl EncoderBackend for Stuck {
    fn open(
        &mut self,
        _config: &mut EncoderConfig,
        _log: Arc<dyn LogSink>,
    ) -> std::result::Result<(), BackendError> {
        Ok(())
    }

    fn encode(
        &mut self,
        _picture: Option<&YuvBuffer>,
        au: &mut AccessUnit,
    ) -> std::result::Result<bool, BackendError> {
        au.reset();
        Ok(false)
    }

    fn close(&mut self) -> std::result::Result<(), BackendError> {
        Ok(())
    }
}

impl LogSink for VerbosityRecorder {
    fn log(&self, level: Verbosity, _message: &str) {
        *self.0.lock().unwrap() = Some(level);
    }
}

#[test]
fn test_ten_frames_at_25fps() -> anyhow::Result<()> {
    let mut encoder = Encoder::new(
        &settings(64, 64, "yuv420p"),
        LookaheadEncoder::new(),
        quiet(),
    )?;
    assert_eq!(encoder.time_base(), Rational::new(1, 25));

    let mut packets = Vec::new();
    for i in 0..10u8 {
        let frame = frame_8bit(64, 64, i)
            .with_pts(Some(i as i64), Rational::new(1, 25))
            .with_sequence_number(i as u64);
        let output = encoder.encode_frame(Some(&frame))?;
        assert!(!output.drained);
        packets.extend(output.packet);
    }
    // the default gop holds all ten frames back
    assert!(packets.is_empty());

    packets.extend(encoder.flush()?);
    assert!(encoder.is_drained());
    assert_eq!(packets.len(), 10);
    assert_eq!(encoder.packets_emitted(), 10);

    let dts: Vec<i64> = packets.iter().map(|p| p.dts().unwrap()).collect();
    assert!(dts.windows(2).all(|w| w[0] <= w[1]), "dts {:?}", dts);
    assert_eq!(dts, (0..10).collect::<Vec<i64>>());
    assert!(packets[0].is_key());
    assert!(packets[1..].iter().all(|p| !p.is_key()));
    assert!(packets.iter().all(|p| p.duration() == 1 && p.size() > 0));

    encoder.close()?;
    Ok(())
}

#[test]
fn test_timestamps_round_trip_through_ticks() -> anyhow::Result<()> {
    let mut s = settings(32, 32, "yuv420p");
    s.gop_size = 1;
    s.time_base = Some(Rational::new(1, 1000));
    let mut encoder = Encoder::new(&s, LookaheadEncoder::new(), quiet())?;

    let pts = [0i64, 40, 80, 120, 160, 200];
    let mut out = Vec::new();
    for (i, p) in pts.iter().enumerate() {
        let frame = frame_8bit(32, 32, 0)
            .with_pts(Some(*p), Rational::new(1, 1000))
            .with_sequence_number(i as u64);
        out.extend(encoder.encode_frame(Some(&frame))?.packet);
    }
    out.extend(encoder.flush()?);
    let got: Vec<i64> = out.iter().map(|p| p.pts().unwrap()).collect();
    assert_eq!(got, pts);
    assert!(out.iter().all(|p| p.time_base() == Rational::new(1, 1000)));
    assert!(out.iter().all(|p| p.duration() == 40));
    Ok(())
}

#[test]
fn test_eight_bit_samples_are_widened() -> anyhow::Result<()> {
    let (backend, calls) = Scripted::new(vec![]);
    let mut encoder = Encoder::new(&settings(16, 16, "yuv420p"), backend, quiet())?;

    // every byte value appears in the luma plane
    let mut data: Vec<u8> = (0..=255u8).collect();
    data.extend(std::iter::repeat_n(200u8, 128));
    let frame = RawVideoFrame::from_packed(PixelFormat::Yuv420p, 16, 16, Bytes::from(data))?
        .with_pts(Some(3), Rational::new(1, 25))
        .with_sequence_number(7);
    let output = encoder.encode_frame(Some(&frame))?;
    assert_eq!(output.packet, None);

    let calls = calls.lock().unwrap();
    let expected: Vec<i16> = (0..=255i16).collect();
    assert_eq!(calls.luma, expected);
    assert!(calls.chroma.iter().all(|s| *s == 200));
    assert_eq!(calls.cts, Some((3 * 3600, true)));
    assert_eq!(calls.sequence_number, 7);
    Ok(())
}

#[test]
fn test_ten_bit_samples_are_copied() -> anyhow::Result<()> {
    let (backend, calls) = Scripted::new(vec![]);
    let mut encoder = Encoder::new(&settings(2, 2, "yuv420p10le"), backend, quiet())?;

    // luma with a padded stride of 6 bytes
    let luma = Bytes::from(vec![0xff, 0x03, 0x00, 0x02, 0xee, 0xee, 0x01, 0x00, 0x00, 0x00, 0xee, 0xee]);
    let cb = Bytes::from(vec![0x00, 0x01]);
    let cr = Bytes::from(vec![0x10, 0x00]);
    let frame = RawVideoFrame::new(PixelFormat::Yuv420p10le, 2, 2, [luma, cb, cr], [6, 2, 2])?;
    encoder.encode_frame(Some(&frame))?;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.luma, vec![1023, 512, 1, 0]);
    assert_eq!(calls.chroma, vec![256]);
    // no pts
    assert_eq!(calls.cts, Some((0, false)));
    Ok(())
}

#[test]
fn test_unsupported_format_opens_nothing() {
    let (backend, calls) = Scripted::new(vec![]);
    let result = Encoder::new(&settings(64, 64, "nv12"), backend, quiet());
    assert!(matches!(result, Err(Error::Configuration(_))));
    let calls = calls.lock().unwrap();
    assert!(!calls.opened);
    assert!(!calls.closed);
}

#[test]
fn test_backend_open_failure_is_configuration_error() {
    let (mut backend, _) = Scripted::new(vec![]);
    backend.fail_open = true;
    let result = Encoder::new(&settings(64, 64, "yuv420p"), backend, quiet());
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_verbosity_follows_host_level() -> anyhow::Result<()> {
    let (backend, calls) = Scripted::new(vec![]);
    let mut s = settings(16, 16, "yuv420p");
    s.log_level = crate::logging::HostLogLevel::Warning;
    let _encoder = Encoder::new(&s, backend, quiet())?;
    assert_eq!(calls.lock().unwrap().verbosity, Some(Verbosity::Silent));
    Ok(())
}

#[test]
fn test_filtered_sink_reaches_backend() -> anyhow::Result<()> {
    let recorder = Arc::new(VerbosityRecorder(Mutex::new(None)));
    let mut s = settings(66, 64, "yuv420p");
    s.log_level = crate::logging::HostLogLevel::Info;
    // the padding warning passes the warning filter
    let mut encoder = Encoder::new(&s, LookaheadEncoder::new(), recorder.clone())?;
    assert_eq!(*recorder.0.lock().unwrap(), Some(Verbosity::Warning));
    encoder.close()?;
    Ok(())
}

#[test]
fn test_keyframe_iff_intra() -> anyhow::Result<()> {
    let (backend, _) = Scripted::new(vec![
        Step::Unit { size: 10, cts: 0, dts: -3600, intra: true },
        Step::Unit { size: 12, cts: 7200, dts: 0, intra: false },
    ]);
    let mut encoder = Encoder::new(&settings(16, 16, "yuv420p"), backend, quiet())?;
    let frame = frame_8bit(16, 16, 0).with_pts(Some(0), Rational::new(1, 25));

    let first = encoder.encode_frame(Some(&frame))?.packet.unwrap();
    assert!(first.is_key());
    assert_eq!(first.size(), 10);
    assert_eq!(first.dts(), Some(-1));
    assert_eq!(first.pts(), Some(0));

    let second = encoder.encode_frame(Some(&frame))?.packet.unwrap();
    assert!(!second.is_key());
    assert_eq!(second.data(), Bytes::from(vec![0xab; 12]));
    assert_eq!(second.pts(), Some(2));
    Ok(())
}

#[test]
fn test_more_units_than_frames_is_an_error() -> anyhow::Result<()> {
    let (backend, _) = Scripted::new(vec![Step::Unit { size: 4, cts: 0, dts: 0, intra: true }]);
    let mut encoder = Encoder::new(&settings(16, 16, "yuv420p"), backend, quiet())?;
    assert!(matches!(encoder.encode_frame(None), Err(Error::Encode(_))));
    Ok(())
}

#[test]
fn test_backend_failure_is_encode_error() -> anyhow::Result<()> {
    let (backend, _) = Scripted::new(vec![Step::Empty, Step::Fail]);
    let mut encoder = Encoder::new(&settings(16, 16, "yuv420p"), backend, quiet())?;
    let frame = frame_8bit(16, 16, 0);
    let output = encoder.encode_frame(Some(&frame))?;
    assert_eq!(output, EncodeOutput { packet: None, drained: false });
    assert!(matches!(encoder.encode_frame(Some(&frame)), Err(Error::Encode(_))));
    // the failed call does not count as a submitted frame
    assert_eq!(encoder.frames_submitted(), 1);
    Ok(())
}

#[test]
fn test_mismatched_frame_is_rejected() -> anyhow::Result<()> {
    let (backend, calls) = Scripted::new(vec![]);
    let mut encoder = Encoder::new(&settings(16, 16, "yuv420p"), backend, quiet())?;
    let frame = frame_8bit(32, 32, 0);
    assert!(matches!(
        encoder.encode_frame(Some(&frame)),
        Err(Error::Precondition(_))
    ));
    assert_eq!(calls.lock().unwrap().encodes, 0);
    Ok(())
}

#[test]
fn test_use_after_close() -> anyhow::Result<()> {
    let (backend, calls) = Scripted::new(vec![]);
    let mut encoder = Encoder::new(&settings(16, 16, "yuv420p"), backend, quiet())?;
    encoder.close()?;
    assert!(calls.lock().unwrap().closed);
    assert!(encoder.is_closed());

    let frame = frame_8bit(16, 16, 0);
    assert!(matches!(
        encoder.encode_frame(Some(&frame)),
        Err(Error::Precondition(_))
    ));
    assert!(matches!(encoder.encode_frame(None), Err(Error::Precondition(_))));
    assert!(matches!(encoder.close(), Err(Error::Precondition(_))));
    Ok(())
}

#[test]
fn test_close_error_still_closes() -> anyhow::Result<()> {
    let (mut backend, calls) = Scripted::new(vec![]);
    backend.fail_close = true;
    let mut encoder = Encoder::new(&settings(16, 16, "yuv420p"), backend, quiet())?;
    assert!(matches!(encoder.close(), Err(Error::Encode(_))));
    assert!(calls.lock().unwrap().closed);
    assert!(encoder.is_closed());
    Ok(())
}

#[test]
fn test_drop_closes_backend() -> anyhow::Result<()> {
    let (backend, calls) = Scripted::new(vec![]);
    let encoder = Encoder::new(&settings(16, 16, "yuv420p"), backend, quiet())?;
    drop(encoder);
    assert!(calls.lock().unwrap().closed);
    Ok(())
}

#[test]
fn test_frame_after_drain_is_rejected() -> anyhow::Result<()> {
    let mut s = settings(16, 16, "yuv420p");
    s.gop_size = 2;
    let mut encoder = Encoder::new(&s, LookaheadEncoder::new(), quiet())?;
    let frame = frame_8bit(16, 16, 0).with_pts(Some(0), Rational::new(1, 25));
    encoder.encode_frame(Some(&frame))?;
    let packets = encoder.flush()?;
    assert_eq!(packets.len(), 1);

    // further drain calls stay empty
    let output = encoder.encode_frame(None)?;
    assert_eq!(output, EncodeOutput { packet: None, drained: true });
    assert!(matches!(
        encoder.encode_frame(Some(&frame)),
        Err(Error::Precondition(_))
    ));
    Ok(())
}

#[test]
fn test_adjusted_resolution_is_padded() -> anyhow::Result<()> {
    let mut s = settings(6, 4, "yuv420p");
    s.gop_size = 1;
    let mut encoder = Encoder::new(&s, LookaheadEncoder::new(), quiet())?;
    assert_eq!(
        (encoder.config().source_width, encoder.config().source_height),
        (8, 8)
    );
    assert_eq!(encoder.config().max_payload_size(), 2 * 8 * 8 + 1024);

    let frame = frame_8bit(6, 4, 0);
    encoder.encode_frame(Some(&frame))?;
    let yuv = encoder.yuv.as_ref().unwrap();
    let luma = yuv.plane(0);
    assert_eq!(luma.row(0), &[0, 1, 2, 3, 4, 5, 5, 5]);
    assert_eq!(luma.row(7), &[18, 19, 20, 21, 22, 23, 23, 23]);
    Ok(())
}

#[test]
fn test_descriptor() {
    let d = Encoder::<LookaheadEncoder>::descriptor();
    assert_eq!(d.name, "libvvenc");
    assert_eq!(d.pixel_formats, &[PixelFormat::Yuv420p, PixelFormat::Yuv420p10le]);
    assert!(d.capabilities.other_threads);
    assert!(d.capabilities.auto_threads);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_encoder_task_drains_on_eof() -> anyhow::Result<()> {
    let mut s = settings(32, 32, "yuv420p");
    s.gop_size = 4;
    let encoder = Encoder::new(&s, LookaheadEncoder::new(), quiet())?;

    let task = EncoderTask::new();
    let (frame_tx, frame_rx) = tokio::sync::mpsc::channel(8);
    let (mut packets, handle) = task.start(encoder, frame_rx);

    let producer = tokio::spawn(async move {
        for i in 0..12u8 {
            let frame = frame_8bit(32, 32, i)
                .with_pts(Some(i as i64), Rational::new(1, 25))
                .with_sequence_number(i as u64);
            frame_tx
                .send(RawFrameCmd::Data(frame))
                .await
                .map_err(|_| anyhow::anyhow!("frame channel closed"))?;
        }
        frame_tx
            .send(RawFrameCmd::EOF)
            .await
            .map_err(|_| anyhow::anyhow!("frame channel closed"))?;
        anyhow::Ok(())
    });

    let mut count = 0;
    let mut got_eof = false;
    while let Some(cmd) = packets.recv().await {
        match cmd {
            RawPacketCmd::Data(packet) => {
                assert_eq!(packet.dts(), Some(count));
                count += 1;
            }
            RawPacketCmd::EOF => {
                got_eof = true;
                break;
            }
        }
    }
    producer.await??;
    handle.await??;
    assert!(got_eof);
    assert_eq!(count, 12);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_encoder_task_cancel_closes() -> anyhow::Result<()> {
    let (backend, calls) = Scripted::new(vec![]);
    let encoder = Encoder::new(&settings(16, 16, "yuv420p"), backend, quiet())?;

    let task = EncoderTask::new();
    let (_frame_tx, frame_rx) = tokio::sync::mpsc::channel::<RawFrameCmd>(8);
    let (mut packets, handle) = task.start(encoder, frame_rx);
    task.stop();

    let cmd = tokio::time::timeout(std::time::Duration::from_secs(5), packets.recv()).await?;
    assert!(matches!(cmd, Some(RawPacketCmd::EOF)));
    handle.await??;
    assert!(calls.lock().unwrap().closed);
    Ok(())
}

#[test]
fn test_flush_gives_up_on_stuck_backend() -> anyhow::Result<()> {
    let mut encoder = Encoder::new(&settings(16, 16, "yuv420p"), Stuck, quiet())?;
    encoder.encode_frame(Some(&frame_8bit(16, 16, 0)))?;
    assert!(matches!(encoder.flush(), Err(Error::Encode(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_encoder_task_stops_on_stuck_drain() -> anyhow::Result<()> {
    let encoder = Encoder::new(&settings(16, 16, "yuv420p"), Stuck, quiet())?;

    let task = EncoderTask::new();
    let (frame_tx, frame_rx) = tokio::sync::mpsc::channel(8);
    let (mut packets, handle) = task.start(encoder, frame_rx);
    frame_tx
        .send(RawFrameCmd::Data(frame_8bit(16, 16, 0)))
        .await
        .map_err(|_| anyhow::anyhow!("frame channel closed"))?;
    frame_tx
        .send(RawFrameCmd::EOF)
        .await
        .map_err(|_| anyhow::anyhow!("frame channel closed"))?;

    let cmd = tokio::time::timeout(std::time::Duration::from_secs(5), packets.recv()).await?;
    assert!(matches!(cmd, Some(RawPacketCmd::EOF)));
    let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await??;
    let err = result.expect_err("stuck drain must fail the task");
    assert!(err.to_string().contains("not drained"), "{}", err);
    Ok(())
}
