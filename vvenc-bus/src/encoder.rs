use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::{
    backend::EncoderBackend,
    buffer::{AccessUnit, YuvBuffer},
    config::{CodecDescriptor, EncoderConfig, Settings, VVENC_DESCRIPTOR},
    error::{Error, Result},
    frame::{PixelFormat, RawFrameCmd, RawFrameReceiver, RawVideoFrame},
    logging::{FilteredSink, LogSink},
    packet::{RawPacket, RawPacketCmd, RawPacketReceiver, RawPacketSender},
    rational::{Rational, rescale},
};

/// Consecutive empty drain calls tolerated before giving up on a backend that
/// never reports itself drained.
const MAX_IDLE_DRAIN_CALLS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ready,
    Closed,
}

/// Result of one [`Encoder::encode_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOutput {
    /// `None` while the encoder is still filling its lookahead.
    pub packet: Option<RawPacket>,
    /// Set once every submitted frame has been emitted after a drain request.
    pub drained: bool,
}

/// Drives one encoder backend: converts host frames into the backend's sample
/// buffer and its access units back into host packets.
pub struct Encoder<B: EncoderBackend> {
    backend: B,
    config: EncoderConfig,
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    time_base: Rational,
    yuv: Option<YuvBuffer>,
    au: Option<AccessUnit>,
    state: State,
    drained: bool,
    frames_submitted: u64,
    packets_emitted: u64,
}

impl<B: EncoderBackend> Encoder<B> {
    pub fn new(settings: &Settings, mut backend: B, sink: Arc<dyn LogSink>) -> Result<Self> {
        let (mut config, pixel_format) = EncoderConfig::from_settings(settings)?;
        let log: Arc<dyn LogSink> = Arc::new(FilteredSink::new(config.verbosity, sink));

        backend
            .open(&mut config, log)
            .map_err(|e| Error::Configuration(format!("cannot open encoder: {}", e)))?;

        let buffers = YuvBuffer::alloc(
            config.chroma_format,
            config.source_width,
            config.source_height,
        )
        .and_then(|yuv| Ok((yuv, AccessUnit::alloc(config.max_payload_size())?)));
        let (yuv, au) = match buffers {
            Ok(buffers) => buffers,
            Err(e) => {
                if let Err(close_err) = backend.close() {
                    log::warn!("vvenc encoder close after failed init: {}", close_err);
                }
                return Err(e);
            }
        };

        log::info!(
            "vvenc encoder opened: {} {}x{} (coded {}x{}) {} fps, {}, threads {}",
            backend.version(),
            settings.width,
            settings.height,
            config.source_width,
            config.source_height,
            settings.frame_rate,
            pixel_format,
            config.num_threads
        );

        Ok(Self {
            backend,
            config,
            pixel_format,
            width: settings.width,
            height: settings.height,
            time_base: settings.time_base(),
            yuv: Some(yuv),
            au: Some(au),
            state: State::Ready,
            drained: false,
            frames_submitted: 0,
            packets_emitted: 0,
        })
    }

    pub fn descriptor() -> CodecDescriptor {
        VVENC_DESCRIPTOR
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn packets_emitted(&self) -> u64 {
        self.packets_emitted
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Submits `frame`, or a drain request when `None`, and returns the packet
    /// the encoder produced, if any.
    pub fn encode_frame(&mut self, frame: Option<&RawVideoFrame>) -> Result<EncodeOutput> {
        if self.state == State::Closed {
            return Err(Error::Precondition("encode after close".to_string()));
        }
        let (Some(yuv), Some(au)) = (self.yuv.as_mut(), self.au.as_mut()) else {
            return Err(Error::Precondition("encoder buffers released".to_string()));
        };

        let picture = match frame {
            Some(frame) => {
                if self.drained {
                    return Err(Error::Precondition(
                        "frame submitted after the encoder was drained".to_string(),
                    ));
                }
                if frame.format() != self.pixel_format
                    || frame.width() != self.width
                    || frame.height() != self.height
                {
                    return Err(Error::Precondition(format!(
                        "frame {}x{} {} does not match encoder {}x{} {}",
                        frame.width(),
                        frame.height(),
                        frame.format(),
                        self.width,
                        self.height,
                        self.pixel_format
                    )));
                }

                for i in 0..3 {
                    let (w, h) = self.pixel_format.plane_size(i, frame.width(), frame.height());
                    let plane = yuv.plane_mut(i);
                    match self.pixel_format {
                        PixelFormat::Yuv420p10le => {
                            plane.fill_from_16bit_le(frame.data(i), frame.stride(i), w, h)
                        }
                        PixelFormat::Yuv420p => {
                            plane.fill_from_8bit(frame.data(i), frame.stride(i), w, h)
                        }
                    }
                }

                yuv.sequence_number = frame.sequence_number();
                match frame.pts() {
                    Some(pts) => {
                        let time_base = if frame.time_base().is_positive() {
                            frame.time_base()
                        } else {
                            self.time_base
                        };
                        yuv.cts = rescale(pts, time_base, Rational::ticks());
                        yuv.cts_valid = true;
                    }
                    None => {
                        yuv.cts = 0;
                        yuv.cts_valid = false;
                    }
                }
                Some(&*yuv)
            }
            None => None,
        };

        let drained = self
            .backend
            .encode(picture, au)
            .map_err(|e| Error::Encode(e.to_string()))?;
        self.drained = drained;
        if frame.is_some() {
            self.frames_submitted += 1;
        }

        if au.used_size() == 0 {
            return Ok(EncodeOutput {
                packet: None,
                drained,
            });
        }

        if self.packets_emitted >= self.frames_submitted {
            return Err(Error::Encode(format!(
                "encoder emitted more units than the {} frames submitted",
                self.frames_submitted
            )));
        }
        self.packets_emitted += 1;

        let ticks = Rational::ticks();
        let mut packet = RawPacket::new(Bytes::copy_from_slice(au.payload()), self.time_base);
        packet.set_dts(Some(rescale(au.dts, ticks, self.time_base)));
        packet.set_pts(
            au.cts_valid
                .then(|| rescale(au.cts, ticks, self.time_base)),
        );
        packet.set_duration(rescale(self.config.ticks_per_frame(), ticks, self.time_base));
        packet.set_key(au.is_intra);

        log::trace!(
            "vvenc packet poc {} {}-slice: {}",
            au.poc,
            au.slice_type.as_char(),
            packet
        );

        Ok(EncodeOutput {
            packet: Some(packet),
            drained,
        })
    }

    /// Drains the encoder, returning every packet still buffered.
    pub fn flush(&mut self) -> Result<Vec<RawPacket>> {
        let mut packets = Vec::new();
        let mut idle = 0;
        loop {
            let output = self.drain_step(&mut idle)?;
            packets.extend(output.packet);
            if output.drained {
                break;
            }
        }
        Ok(packets)
    }

    /// One drain request. `idle` counts consecutive calls that produced no
    /// packet; past `MAX_IDLE_DRAIN_CALLS` the backend is treated as stuck.
    fn drain_step(&mut self, idle: &mut usize) -> Result<EncodeOutput> {
        let output = self.encode_frame(None)?;
        if output.packet.is_some() {
            *idle = 0;
        } else if !output.drained {
            *idle += 1;
            if *idle > MAX_IDLE_DRAIN_CALLS {
                return Err(Error::Encode(format!(
                    "encoder not drained after {} empty drain calls",
                    idle
                )));
            }
        }
        Ok(output)
    }

    /// Closes the backend and releases both buffers. Backend errors are logged
    /// and returned, but the encoder is closed either way.
    pub fn close(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Err(Error::Precondition("encoder already closed".to_string()));
        }
        self.state = State::Closed;
        let result = self.backend.close();
        self.yuv = None;
        self.au = None;
        log::info!(
            "vvenc encoder closed: {} frames in, {} packets out",
            self.frames_submitted,
            self.packets_emitted
        );
        result.map_err(|e| {
            log::warn!("vvenc encoder close error: {}", e);
            Error::Encode(format!("close: {}", e))
        })
    }
}

impl<B: EncoderBackend> Drop for Encoder<B> {
    fn drop(&mut self) {
        if self.state == State::Ready {
            let _ = self.close();
        }
    }
}

pub struct EncoderTask {
    cancel: CancellationToken,
}

impl EncoderTask {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// Task stopped by `cancel`, e.g. a pipeline-wide token.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Moves `encoder` onto a blocking thread fed by `frames`. `RawFrameCmd::EOF`
    /// (or a closed frame channel) drains the encoder; cancellation closes it
    /// with frames still buffered. `RawPacketCmd::EOF` is always sent last.
    pub fn start<B>(
        &self,
        encoder: Encoder<B>,
        frames: RawFrameReceiver,
    ) -> (RawPacketReceiver, tokio::task::JoinHandle<anyhow::Result<()>>)
    where
        B: EncoderBackend + 'static,
    {
        /// Encoded packets are small; moderate capacity for bursts after a drain.
        const PACKET_CHAN_CAP: usize = 64;
        let (tx, rx) = tokio::sync::mpsc::channel(PACKET_CHAN_CAP);
        let cancel = self.cancel.clone();
        log::info!("encoder loop started");
        let handle =
            tokio::task::spawn_blocking(move || Self::encoder_loop(encoder, cancel, frames, tx));
        (rx, handle)
    }

    fn encoder_loop<B: EncoderBackend>(
        mut encoder: Encoder<B>,
        cancel: CancellationToken,
        mut frames: RawFrameReceiver,
        out: RawPacketSender,
    ) -> anyhow::Result<()> {
        let result = Self::pump(&mut encoder, &cancel, &mut frames, &out);
        if let Err(e) = &result {
            log::error!("encoder loop error: {}", e);
        }
        if let Err(e) = encoder.close() {
            log::warn!("encoder close error: {}", e);
        }
        log::info!(
            "end of encode task loop, frames: {}, packets: {}",
            encoder.frames_submitted(),
            encoder.packets_emitted()
        );
        let _ = out.blocking_send(RawPacketCmd::EOF);
        result
    }

    fn pump<B: EncoderBackend>(
        encoder: &mut Encoder<B>,
        cancel: &CancellationToken,
        frames: &mut RawFrameReceiver,
        out: &RawPacketSender,
    ) -> anyhow::Result<()> {
        let send = |packet: Option<RawPacket>| -> anyhow::Result<()> {
            if let Some(packet) = packet {
                out.blocking_send(RawPacketCmd::Data(packet))
                    .map_err(|_| anyhow::anyhow!("packet receiver closed"))?;
            }
            Ok(())
        };

        loop {
            if cancel.is_cancelled() {
                log::info!("encoder task cancelled");
                return Ok(());
            }
            match frames.try_recv() {
                Ok(RawFrameCmd::Data(frame)) => {
                    let output = encoder.encode_frame(Some(&frame))?;
                    send(output.packet)?;
                }
                Ok(RawFrameCmd::EOF) | Err(TryRecvError::Disconnected) => {
                    log::debug!("encoder draining");
                    let mut idle = 0;
                    loop {
                        if cancel.is_cancelled() {
                            log::info!("encoder task cancelled while draining");
                            return Ok(());
                        }
                        let output = encoder.drain_step(&mut idle)?;
                        send(output.packet)?;
                        if output.drained {
                            return Ok(());
                        }
                    }
                }
                Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(1)),
            }
        }
    }
}

impl Default for EncoderTask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "encoder_test.rs"]
mod encoder_test;
