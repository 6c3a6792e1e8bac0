//! Raw YUV (or FFmpeg-decoded) file → encoder task → elementary stream file.
//!
//! ```text
//! reader task ──RawFrameCmd──► EncoderTask (blocking) ──RawPacketCmd──► writer
//! ```

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use vvenc_bus::{
    backend::LookaheadEncoder,
    encoder::{Encoder, EncoderTask},
    frame::{PixelFormat, RawFrameCmd, RawFrameSender, RawVideoFrame},
    logging::{LogCrateSink, LogSink, StdStreamSink},
    packet::RawPacketCmd,
    rational::{Rational, rescale},
};

use crate::config::{InputFormat, JobConfig, LibraryLog};

/// Frames read ahead of the encoder.
const FRAME_QUEUE_BOUND: usize = 16;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub frames: u64,
    pub packets: u64,
    pub key_frames: u64,
    pub bytes: u64,
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "frames: {}, packets: {}, key frames: {}, bytes: {}",
            self.frames, self.packets, self.key_frames, self.bytes
        )
    }
}

struct ReaderConfig {
    path: PathBuf,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_rate: Rational,
    time_base: Rational,
    max_frames: Option<u64>,
    #[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
    demuxer: Option<String>,
    #[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
    demuxer_options: BTreeMap<String, String>,
}

pub async fn run(job: JobConfig, cancel: CancellationToken) -> anyhow::Result<Summary> {
    let settings = job.settings;
    let format: PixelFormat = settings.pixel_format.parse()?;
    if job.input_format == InputFormat::Ffmpeg && !cfg!(feature = "ffmpeg") {
        anyhow::bail!("ffmpeg input needs vvenc-pipe built with the `ffmpeg` feature");
    }
    let sink: Arc<dyn LogSink> = match job.library_log {
        LibraryLog::Stdio => Arc::new(StdStreamSink::stdio()),
        LibraryLog::Log => Arc::new(LogCrateSink),
    };
    let encoder = Encoder::new(&settings, LookaheadEncoder::new(), sink)?;

    let mut output = tokio::fs::File::create(&job.output)
        .await
        .map_err(|e| anyhow::anyhow!("create {}: {}", job.output.display(), e))?;

    let task = EncoderTask::with_cancel(cancel.clone());
    let (frame_tx, frame_rx) = tokio::sync::mpsc::channel(FRAME_QUEUE_BOUND);
    let (packets, encode_handle) = task.start(encoder, frame_rx);

    let reader = ReaderConfig {
        path: job.input.clone(),
        format,
        width: settings.width,
        height: settings.height,
        frame_rate: settings.frame_rate,
        time_base: settings.time_base(),
        max_frames: job.max_frames,
        demuxer: job.demuxer,
        demuxer_options: job.demuxer_options,
    };
    let reader_cancel = cancel.clone();
    let read_handle = match job.input_format {
        InputFormat::Raw => {
            tokio::spawn(async move { read_frames(reader, frame_tx, reader_cancel).await })
        }
        InputFormat::Ffmpeg => spawn_decoder(reader, frame_tx, reader_cancel),
    };

    let mut summary = Summary::default();
    let mut packets = ReceiverStream::new(packets);
    while let Some(cmd) = packets.next().await {
        match cmd {
            RawPacketCmd::Data(packet) => {
                output.write_all(&packet.data()).await?;
                summary.packets += 1;
                summary.bytes += packet.size() as u64;
                if packet.is_key() {
                    summary.key_frames += 1;
                }
                log::debug!("{}", packet);
            }
            RawPacketCmd::EOF => break,
        }
    }
    output.flush().await?;
    output.sync_all().await?;

    let read_result = read_handle.await?;
    let encode_result = encode_handle.await?;
    summary.frames = read_result?;
    encode_result?;
    Ok(summary)
}

async fn read_frames(
    config: ReaderConfig,
    frames: RawFrameSender,
    cancel: CancellationToken,
) -> anyhow::Result<u64> {
    let mut file = tokio::fs::File::open(&config.path)
        .await
        .map_err(|e| anyhow::anyhow!("open {}: {}", config.path.display(), e))?;
    let frame_size = config.format.frame_size(config.width, config.height);
    let frame_duration = config.frame_rate.invert();
    let mut buf = vec![0u8; frame_size];
    let mut index: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            log::info!("reader cancelled after {} frames", index);
            return Ok(index);
        }
        if config.max_frames.is_some_and(|max| index >= max) {
            break;
        }
        match file.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let pts = rescale(index as i64, frame_duration, config.time_base);
        let frame = RawVideoFrame::from_packed(
            config.format,
            config.width,
            config.height,
            Bytes::copy_from_slice(&buf),
        )?
        .with_pts(Some(pts), config.time_base)
        .with_sequence_number(index);
        if frames.send(RawFrameCmd::Data(frame)).await.is_err() {
            log::warn!("encoder stopped before frame {}", index);
            return Ok(index);
        }
        index += 1;
    }

    log::info!("read {} frames from {}", index, config.path.display());
    let _ = frames.send(RawFrameCmd::EOF).await;
    Ok(index)
}

#[cfg(feature = "ffmpeg")]
fn spawn_decoder(
    config: ReaderConfig,
    frames: RawFrameSender,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<anyhow::Result<u64>> {
    tokio::task::spawn_blocking(move || decode_frames(config, frames, cancel))
}

#[cfg(not(feature = "ffmpeg"))]
fn spawn_decoder(
    _config: ReaderConfig,
    _frames: RawFrameSender,
    _cancel: CancellationToken,
) -> tokio::task::JoinHandle<anyhow::Result<u64>> {
    tokio::spawn(async { anyhow::bail!("built without the `ffmpeg` feature") })
}

/// Decodes `config.path` with FFmpeg on a blocking thread. Frames keep the
/// stream's own time base.
#[cfg(feature = "ffmpeg")]
fn decode_frames(
    config: ReaderConfig,
    frames: RawFrameSender,
    cancel: CancellationToken,
) -> anyhow::Result<u64> {
    vvenc_bus::ffmpeg::init()?;
    let options: Vec<(&str, &str)> = config
        .demuxer_options
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let mut source = vvenc_bus::ffmpeg::VideoSource::open(
        &config.path,
        config.demuxer.as_deref(),
        &options,
        config.format,
        config.width,
        config.height,
    )?;
    let mut index: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            log::info!("decoder cancelled after {} frames", index);
            return Ok(index);
        }
        if config.max_frames.is_some_and(|max| index >= max) {
            break;
        }
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if frames.blocking_send(RawFrameCmd::Data(frame)).is_err() {
            log::warn!("encoder stopped before frame {}", index);
            return Ok(index);
        }
        index += 1;
    }

    log::info!("decoded {} frames from {}", index, config.path.display());
    let _ = frames.blocking_send(RawFrameCmd::EOF);
    Ok(index)
}

#[cfg(test)]
#[path = "pipe_test.rs"]
mod pipe_test;
