use std::fmt::{Display, Formatter};
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::rational::Rational;

pub type RawFrameSender = tokio::sync::mpsc::Sender<RawFrameCmd>;
pub type RawFrameReceiver = tokio::sync::mpsc::Receiver<RawFrameCmd>;

#[derive(Clone)]
pub enum RawFrameCmd {
    Data(RawVideoFrame),
    EOF,
}

/// Planar 4:2:0 pixel formats accepted by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8 bits per sample, one byte each.
    Yuv420p,
    /// 10 bits per sample stored in two little-endian bytes.
    Yuv420p10le,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 2] = [PixelFormat::Yuv420p, PixelFormat::Yuv420p10le];

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuv420p10le => "yuv420p10le",
        }
    }

    pub fn bit_depth(&self) -> u8 {
        match self {
            PixelFormat::Yuv420p => 8,
            PixelFormat::Yuv420p10le => 10,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PixelFormat::Yuv420p => 1,
            PixelFormat::Yuv420p10le => 2,
        }
    }

    /// Width and height in samples of plane `index` for a `width`x`height` picture.
    pub fn plane_size(&self, index: usize, width: u32, height: u32) -> (usize, usize) {
        if index == 0 {
            (width as usize, height as usize)
        } else {
            (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
        }
    }

    /// Bytes of one tightly packed picture (all three planes, no row padding).
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        (0..3)
            .map(|i| {
                let (w, h) = self.plane_size(i, width, height);
                w * h * self.bytes_per_sample()
            })
            .sum()
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PixelFormat::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| {
                crate::error::Error::Configuration(format!("unsupported pixel format: {}", s))
            })
    }
}

/// One raw picture handed to the encoder: three planes with their row strides
/// in bytes, a presentation timestamp in `time_base`, and the host's frame
/// counter.
#[derive(Clone)]
pub struct RawVideoFrame {
    planes: [Bytes; 3],
    strides: [usize; 3],
    width: u32,
    height: u32,
    format: PixelFormat,
    pts: Option<i64>,
    time_base: Rational,
    sequence_number: u64,
}

impl RawVideoFrame {
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: [Bytes; 3],
        strides: [usize; 3],
    ) -> anyhow::Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("invalid video size {}x{}", width, height);
        }
        for i in 0..3 {
            let (w, h) = format.plane_size(i, width, height);
            let row = w * format.bytes_per_sample();
            if strides[i] < row {
                anyhow::bail!("plane {} stride {} shorter than row {}", i, strides[i], row);
            }
            let needed = strides[i] * (h - 1) + row;
            if planes[i].len() < needed {
                anyhow::bail!(
                    "plane {} holds {} bytes, need {}",
                    i,
                    planes[i].len(),
                    needed
                );
            }
        }
        Ok(Self {
            planes,
            strides,
            width,
            height,
            format,
            pts: None,
            time_base: Rational::default(),
            sequence_number: 0,
        })
    }

    /// Splits a tightly packed planar picture (as stored in a `.yuv` file)
    /// into its planes without copying.
    pub fn from_packed(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: Bytes,
    ) -> anyhow::Result<Self> {
        let expected = format.frame_size(width, height);
        if data.len() != expected {
            anyhow::bail!(
                "packed {} {}x{} picture needs {} bytes, got {}",
                format,
                width,
                height,
                expected,
                data.len()
            );
        }
        let mut offset = 0;
        let mut planes: [Bytes; 3] = Default::default();
        let mut strides = [0usize; 3];
        for i in 0..3 {
            let (w, h) = format.plane_size(i, width, height);
            let row = w * format.bytes_per_sample();
            planes[i] = data.slice(offset..offset + row * h);
            strides[i] = row;
            offset += row * h;
        }
        Self::new(format, width, height, planes, strides)
    }

    pub fn with_pts(mut self, pts: Option<i64>, time_base: Rational) -> Self {
        self.pts = pts;
        self.time_base = time_base;
        self
    }

    pub fn with_sequence_number(mut self, sequence_number: u64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn data(&self, plane: usize) -> &[u8] {
        &self.planes[plane]
    }

    pub fn stride(&self, plane: usize) -> usize {
        self.strides[plane]
    }
}

impl Display for RawVideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "RawVideoFrame {}x{} {}, pts: {:?}, time_base: {}, seq: {}",
            self.width, self.height, self.format, self.pts, self.time_base, self.sequence_number
        )
    }
}
