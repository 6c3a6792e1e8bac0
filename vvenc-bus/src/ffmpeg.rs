//! Conversions between `ffmpeg-next` frames/packets and the bus types, and a
//! decoding [`VideoSource`] for hosts that read their pictures through FFmpeg.

use std::ffi::CString;
use std::path::Path;

use bytes::Bytes;
use ffmpeg_next::Dictionary;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;

use crate::{
    frame::{PixelFormat, RawVideoFrame},
    packet::RawPacket,
    rational::Rational,
};

pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

impl From<ffmpeg_next::Rational> for Rational {
    fn from(r: ffmpeg_next::Rational) -> Self {
        Rational::new(r.numerator(), r.denominator())
    }
}

impl From<Rational> for ffmpeg_next::Rational {
    fn from(r: Rational) -> Self {
        ffmpeg_next::Rational::new(r.numerator(), r.denominator())
    }
}

impl TryFrom<Pixel> for PixelFormat {
    type Error = crate::error::Error;

    fn try_from(pixel: Pixel) -> Result<Self, Self::Error> {
        match pixel {
            Pixel::YUV420P => Ok(PixelFormat::Yuv420p),
            Pixel::YUV420P10LE => Ok(PixelFormat::Yuv420p10le),
            other => Err(crate::error::Error::Configuration(format!(
                "unsupported pixel format: {:?}",
                other
            ))),
        }
    }
}

impl From<PixelFormat> for Pixel {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Yuv420p => Pixel::YUV420P,
            PixelFormat::Yuv420p10le => Pixel::YUV420P10LE,
        }
    }
}

/// Copies a decoded FFmpeg picture into a [`RawVideoFrame`], keeping its
/// line sizes.
pub fn raw_frame_from_video(
    frame: &ffmpeg_next::frame::Video,
    time_base: ffmpeg_next::Rational,
    sequence_number: u64,
) -> anyhow::Result<RawVideoFrame> {
    let format = PixelFormat::try_from(frame.format())?;
    let planes = [
        Bytes::copy_from_slice(frame.data(0)),
        Bytes::copy_from_slice(frame.data(1)),
        Bytes::copy_from_slice(frame.data(2)),
    ];
    let strides = [frame.stride(0), frame.stride(1), frame.stride(2)];
    Ok(
        RawVideoFrame::new(format, frame.width(), frame.height(), planes, strides)?
            .with_pts(frame.pts(), time_base.into())
            .with_sequence_number(sequence_number),
    )
}

impl From<&RawPacket> for ffmpeg_next::Packet {
    fn from(packet: &RawPacket) -> Self {
        let mut out = ffmpeg_next::Packet::copy(&packet.data());
        out.set_pts(packet.pts());
        out.set_dts(packet.dts());
        out.set_duration(packet.duration());
        if packet.is_key() {
            out.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
        }
        out
    }
}

/// Converts decoded pictures to the encoder's pixel format and size, scaling
/// only when they differ.
pub struct FrameConverter {
    format: PixelFormat,
    width: u32,
    height: u32,
    scaler: Option<scaling::Context>,
}

impl FrameConverter {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            scaler: None,
        }
    }

    pub fn convert(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        time_base: ffmpeg_next::Rational,
        sequence_number: u64,
    ) -> anyhow::Result<RawVideoFrame> {
        let target = Pixel::from(self.format);
        if frame.format() == target && frame.width() == self.width && frame.height() == self.height
        {
            return raw_frame_from_video(frame, time_base, sequence_number);
        }

        if self.scaler.is_none() {
            log::debug!(
                "scaling {:?} {}x{} to {} {}x{}",
                frame.format(),
                frame.width(),
                frame.height(),
                self.format,
                self.width,
                self.height
            );
            self.scaler = Some(scaling::Context::get(
                frame.format(),
                frame.width(),
                frame.height(),
                target,
                self.width,
                self.height,
                scaling::flag::Flags::BILINEAR,
            )?);
        }
        let mut converted = ffmpeg_next::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut converted)?;
        }
        converted.set_pts(frame.timestamp().or(frame.pts()));
        raw_frame_from_video(&converted, time_base, sequence_number)
    }
}

/// Decodes the best video stream of a file or URL into [`RawVideoFrame`]s in
/// the encoder's format. Blocking; run it on a blocking thread.
pub struct VideoSource {
    input: ffmpeg_next::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg_next::Rational,
    decoder: ffmpeg_next::decoder::Video,
    converter: FrameConverter,
    next_sequence: u64,
    eof: bool,
}

fn find_input_format(name: &str) -> anyhow::Result<ffmpeg_next::format::format::Input> {
    let cname =
        CString::new(name).map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
    let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
    if ptr.is_null() {
        return Err(anyhow::anyhow!("input format not found: {}", name));
    }
    Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
}

impl VideoSource {
    /// Opens `path`, optionally forcing the demuxer `format` (e.g. `rawvideo`)
    /// with demuxer `options`.
    pub fn open(
        path: impl AsRef<Path>,
        format: Option<&str>,
        options: &[(&str, &str)],
        target: PixelFormat,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut dict = Dictionary::new();
        for (key, value) in options {
            dict.set(key, value);
        }
        let input = match format {
            Some(name) => {
                use ffmpeg_next::format::format::Format;
                let fmt = find_input_format(name)?;
                ffmpeg_next::format::open_with(path, &Format::Input(fmt), dict)?.input()
            }
            None => ffmpeg_next::format::input_with_dictionary(path, dict)?,
        };

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("no video stream in {}", path.display()))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let context = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;
        log::info!(
            "decoding {} stream {}: {:?} {}x{}, time base {:?}",
            path.display(),
            stream_index,
            decoder.format(),
            decoder.width(),
            decoder.height(),
            time_base
        );

        Ok(Self {
            input,
            stream_index,
            time_base,
            decoder,
            converter: FrameConverter::new(target, width, height),
            next_sequence: 0,
            eof: false,
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base.into()
    }

    /// Next decoded picture, or `None` once the decoder is drained.
    pub fn next_frame(&mut self) -> anyhow::Result<Option<RawVideoFrame>> {
        loop {
            let mut decoded = ffmpeg_next::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let frame =
                        self.converter
                            .convert(&decoded, self.time_base, self.next_sequence)?;
                    self.next_sequence += 1;
                    return Ok(Some(frame));
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    if self.eof {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(err.into()),
            }

            let packet = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match packet {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder.send_packet(&packet)?;
                }
                Some(_) => {}
                None => {
                    self.decoder.send_eof()?;
                    self.eof = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_frame(width: u32, height: u32) -> ffmpeg_next::frame::Video {
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, width, height);
        for plane in 0..3 {
            let (w, h) = PixelFormat::Yuv420p.plane_size(plane, width, height);
            let stride = frame.stride(plane);
            let data = frame.data_mut(plane);
            for y in 0..h {
                for x in 0..w {
                    data[y * stride + x] = (x + y * 3 + plane * 50) as u8;
                }
            }
        }
        frame
    }

    #[test]
    fn test_pixel_format_mapping() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::try_from(Pixel::from(format)).unwrap(), format);
        }
        assert!(PixelFormat::try_from(Pixel::NV12).is_err());
        let tb = Rational::new(1001, 30000);
        assert_eq!(Rational::from(ffmpeg_next::Rational::from(tb)), tb);
    }

    #[test]
    fn test_raw_frame_from_video_keeps_planes() -> anyhow::Result<()> {
        init()?;
        let mut video = pattern_frame(16, 8);
        video.set_pts(Some(5));
        let frame = raw_frame_from_video(&video, ffmpeg_next::Rational::new(1, 25), 3)?;
        assert_eq!((frame.width(), frame.height()), (16, 8));
        assert_eq!(frame.format(), PixelFormat::Yuv420p);
        assert_eq!(frame.pts(), Some(5));
        assert_eq!(frame.time_base(), Rational::new(1, 25));
        assert_eq!(frame.sequence_number(), 3);
        let stride = frame.stride(0);
        assert_eq!(&frame.data(0)[stride..stride + 4], &[3, 4, 5, 6]);
        assert_eq!(frame.data(1)[0], 50);
        Ok(())
    }

    #[test]
    fn test_converter_scales_to_encoder_format() -> anyhow::Result<()> {
        init()?;
        let mut video = pattern_frame(32, 32);
        video.set_pts(Some(7));
        let mut converter = FrameConverter::new(PixelFormat::Yuv420p10le, 16, 16);
        let frame = converter.convert(&video, ffmpeg_next::Rational::new(1, 25), 0)?;
        assert_eq!(frame.format(), PixelFormat::Yuv420p10le);
        assert_eq!((frame.width(), frame.height()), (16, 16));
        assert_eq!(frame.pts(), Some(7));
        assert!(frame.stride(0) >= 32);
        Ok(())
    }

    #[test]
    fn test_packet_conversion() {
        let mut raw = RawPacket::new(Bytes::from_static(&[0, 0, 0, 1, 0x38, 0x01]), Rational::new(1, 25));
        raw.set_pts(Some(4));
        raw.set_dts(Some(3));
        raw.set_duration(1);
        raw.set_key(true);
        let packet = ffmpeg_next::Packet::from(&raw);
        assert_eq!(packet.data(), Some(&[0u8, 0, 0, 1, 0x38, 0x01][..]));
        assert_eq!(packet.pts(), Some(4));
        assert_eq!(packet.dts(), Some(3));
        assert_eq!(packet.duration(), 1);
        assert!(packet.is_key());
    }

    #[test]
    fn test_video_source_decodes_rawvideo() -> anyhow::Result<()> {
        init()?;
        let path = std::env::temp_dir().join(format!("vvenc-bus-source-{}.yuv", std::process::id()));
        let size = PixelFormat::Yuv420p.frame_size(16, 16);
        std::fs::write(&path, vec![128u8; size * 3])?;

        let mut source = VideoSource::open(
            &path,
            Some("rawvideo"),
            &[("video_size", "16x16"), ("pixel_format", "yuv420p"), ("framerate", "25")],
            PixelFormat::Yuv420p,
            16,
            16,
        )?;
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame()? {
            frames.push(frame);
        }
        let _ = std::fs::remove_file(&path);

        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.data(0)[0] == 128));
        let seq: Vec<u64> = frames.iter().map(|f| f.sequence_number()).collect();
        assert_eq!(seq, vec![0, 1, 2]);
        Ok(())
    }
}
