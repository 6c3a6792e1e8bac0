use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::PixelFormat;
use crate::logging::{HostLogLevel, Verbosity};
use crate::rational::{Rational, TICKS_PER_SECOND};

/// Largest quantisation parameter accepted by the encoder.
pub const MAX_QP: i32 = 63;

/// Speed/quality trade-off presets of the encoder library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaFormat {
    Cs400,
    Cs420,
    Cs422,
    Cs444,
}

impl ChromaFormat {
    /// Horizontal and vertical subsampling shift of the chroma planes.
    pub fn shifts(&self) -> (u32, u32) {
        match self {
            ChromaFormat::Cs400 | ChromaFormat::Cs444 => (0, 0),
            ChromaFormat::Cs420 => (1, 1),
            ChromaFormat::Cs422 => (1, 0),
        }
    }

    pub fn plane_count(&self) -> usize {
        match self {
            ChromaFormat::Cs400 => 1,
            _ => 3,
        }
    }
}

/// Encoder parameters as supplied by the host pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    // None = inverse of frame_rate
    pub time_base: Option<Rational>,
    // bps, 0 = constant qp
    pub bit_rate: u64,
    // qp
    pub quality: i32,
    // "yuv420p" or "yuv420p10le"
    pub pixel_format: String,
    // <= 0 = auto
    pub thread_count: i32,
    pub log_level: HostLogLevel,
    pub preset: Preset,
    // frames, 0 = about one second
    pub intra_period: u32,
    pub gop_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: Rational::new(25, 1),
            time_base: None,
            bit_rate: 0,
            quality: 32,
            pixel_format: "yuv420p".to_string(),
            thread_count: 0,
            log_level: HostLogLevel::default(),
            preset: Preset::default(),
            intra_period: 0,
            gop_size: 32,
        }
    }
}

impl Settings {
    /// Host time base that frame and packet timestamps are expressed in.
    pub fn time_base(&self) -> Rational {
        self.time_base.unwrap_or_else(|| self.frame_rate.invert())
    }
}

/// The configuration record handed to the encoder library.
///
/// `source_width`/`source_height` may be adjusted by the backend when it is
/// opened; everything allocated afterwards uses the adjusted values.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub source_width: u32,
    pub source_height: u32,
    pub frame_rate: i32,
    pub frame_scale: i32,
    pub ticks_per_second: i32,
    pub target_bitrate: u64,
    pub qp: i32,
    pub preset: Preset,
    pub verbosity: Verbosity,
    pub input_bit_depth: u8,
    pub internal_bit_depth: u8,
    pub output_bit_depth: u8,
    pub chroma_format: ChromaFormat,
    // -1 = auto
    pub num_threads: i32,
    pub intra_period: u32,
    pub gop_size: u32,
}

impl EncoderConfig {
    /// Library defaults for a picture size, rate and preset.
    pub fn init_default(
        width: u32,
        height: u32,
        frame_rate: i32,
        target_bitrate: u64,
        qp: i32,
        preset: Preset,
    ) -> Self {
        Self {
            source_width: width,
            source_height: height,
            frame_rate,
            frame_scale: 1,
            ticks_per_second: TICKS_PER_SECOND,
            target_bitrate,
            qp,
            preset,
            verbosity: Verbosity::Warning,
            input_bit_depth: 8,
            internal_bit_depth: 10,
            output_bit_depth: 10,
            chroma_format: ChromaFormat::Cs420,
            num_threads: -1,
            intra_period: 0,
            gop_size: 32,
        }
    }

    /// Builds the record for `settings`. Rejects anything the adapter cannot
    /// feed before any resource is created.
    pub fn from_settings(settings: &Settings) -> Result<(Self, PixelFormat)> {
        let pixel_format: PixelFormat = settings.pixel_format.parse()?;
        if settings.width == 0 || settings.height == 0 {
            return Err(Error::Configuration(format!(
                "invalid video size {}x{}",
                settings.width, settings.height
            )));
        }
        if !settings.frame_rate.is_positive() {
            return Err(Error::Configuration(format!(
                "invalid frame rate {}",
                settings.frame_rate
            )));
        }
        if !settings.time_base().is_positive() {
            return Err(Error::Configuration(format!(
                "invalid time base {}",
                settings.time_base()
            )));
        }
        if !(0..=MAX_QP).contains(&settings.quality) {
            return Err(Error::Configuration(format!(
                "quality {} outside 0..={}",
                settings.quality, MAX_QP
            )));
        }
        if settings.gop_size == 0 {
            return Err(Error::Configuration("gop size must be positive".to_string()));
        }

        let mut config = Self::init_default(
            settings.width,
            settings.height,
            settings.frame_rate.numerator(),
            settings.bit_rate,
            settings.quality,
            settings.preset,
        );
        config.verbosity = settings.log_level.verbosity();
        config.chroma_format = ChromaFormat::Cs420;
        let depth = pixel_format.bit_depth();
        config.input_bit_depth = depth;
        config.internal_bit_depth = depth;
        config.output_bit_depth = depth;
        config.num_threads = if settings.thread_count > 0 {
            settings.thread_count
        } else {
            -1
        };
        config.frame_scale = settings.frame_rate.denominator();
        config.ticks_per_second = TICKS_PER_SECOND;
        config.gop_size = settings.gop_size;
        config.intra_period = settings.intra_period;
        config.init_parameters();

        Ok((config, pixel_format))
    }

    /// Fills derived parameters left at zero.
    pub fn init_parameters(&mut self) {
        if self.intra_period == 0 {
            let fps = self.frame_rate_f64().round().max(1.0) as u32;
            self.intra_period = fps.div_ceil(self.gop_size) * self.gop_size;
        }
    }

    pub fn frame_rate_f64(&self) -> f64 {
        if self.frame_scale == 0 {
            return 0.0;
        }
        self.frame_rate as f64 / self.frame_scale as f64
    }

    /// Duration of one frame in encoder ticks.
    pub fn ticks_per_frame(&self) -> i64 {
        if self.frame_rate <= 0 {
            return 0;
        }
        self.ticks_per_second as i64 * self.frame_scale as i64 / self.frame_rate as i64
    }

    /// Worst-case size of one access unit.
    pub fn max_payload_size(&self) -> usize {
        2 * self.source_width as usize * self.source_height as usize + 1024
    }
}

/// What the encoder tells the host about its threading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Threads are managed by the library, not the host.
    pub other_threads: bool,
    /// The library picks a thread count without host cooperation.
    pub auto_threads: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub name: &'static str,
    pub long_name: &'static str,
    pub pixel_formats: &'static [PixelFormat],
    pub capabilities: Capabilities,
}

pub const VVENC_DESCRIPTOR: CodecDescriptor = CodecDescriptor {
    name: "libvvenc",
    long_name: "H.266 / VVC Encoder VVenC",
    pixel_formats: &PixelFormat::ALL,
    capabilities: Capabilities {
        other_threads: true,
        auto_threads: true,
    },
};
