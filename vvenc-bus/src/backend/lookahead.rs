use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::{AccessUnit, SliceType, YuvBuffer};
use crate::config::{ChromaFormat, EncoderConfig, MAX_QP};
use crate::error::BackendError;
use crate::logging::{LogSink, Verbosity};
use crate::rational::TICKS_PER_SECOND;

/// Source sizes are padded up to a multiple of this.
const MIN_CU_SIZE: u32 = 8;

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const NAL_TRAIL_NUT: u8 = 0;
const NAL_IDR_W_RADL: u8 = 7;

// error codes, negative like the C library's
const ERR_UNSPECIFIED: i32 = -1;
const ERR_INITIALIZE: i32 = -2;
const ERR_RESTART_REQUIRED: i32 = -5;
const ERR_PARAMETER: i32 = -7;

struct Picture {
    poc: i64,
    sequence_number: u64,
    cts: i64,
    cts_valid: bool,
    digest: [u32; 3],
}

/// In-process encoder with the interface behaviour of the VVenC library:
/// pictures are held in a lookahead queue of one GOP before the first unit
/// comes out, a drain request emits one queued picture per call, and the
/// source size is padded to the minimum coding-unit size on open.
///
/// The payload is an Annex-B framed VVC NAL unit header followed by the
/// picture order count and a digest of the planes, not a decodable slice.
#[derive(Default)]
pub struct LookaheadEncoder {
    config: Option<EncoderConfig>,
    log: Option<Arc<dyn LogSink>>,
    queue: VecDeque<Picture>,
    threads: usize,
    next_poc: i64,
    emitted: u64,
    last_cts: Option<i64>,
    flushing: bool,
}

fn fnv1a(samples: &[i16], mut hash: u32) -> u32 {
    for s in samples {
        for b in s.to_le_bytes() {
            hash ^= b as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
    }
    hash
}

fn picture_digest(picture: &YuvBuffer) -> [u32; 3] {
    let mut digest = [0u32; 3];
    for (i, plane) in picture.planes().iter().enumerate().take(3) {
        let mut hash = 0x811c_9dc5;
        for y in 0..plane.height() {
            hash = fnv1a(plane.row(y), hash);
        }
        digest[i] = hash;
    }
    digest
}

impl LookaheadEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker count resolved at open.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Pictures waiting in the lookahead queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_open(&self) -> bool {
        self.config.is_some()
    }

    fn msg(&self, level: Verbosity, message: String) {
        if let Some(log) = &self.log {
            log.log(level, &message);
        }
    }

    fn validate(config: &EncoderConfig) -> Result<(), BackendError> {
        let invalid = |message: String| Err(BackendError::new(ERR_PARAMETER, message));
        if config.source_width == 0 || config.source_height == 0 {
            return invalid(format!(
                "invalid source size {}x{}",
                config.source_width, config.source_height
            ));
        }
        if config.source_width % 2 != 0 || config.source_height % 2 != 0 {
            return invalid(format!(
                "source size {}x{} must be even for 4:2:0",
                config.source_width, config.source_height
            ));
        }
        if config.chroma_format != ChromaFormat::Cs420 {
            return invalid(format!(
                "unsupported chroma format {:?}",
                config.chroma_format
            ));
        }
        for depth in [
            config.input_bit_depth,
            config.internal_bit_depth,
            config.output_bit_depth,
        ] {
            if depth != 8 && depth != 10 {
                return invalid(format!("unsupported bit depth {}", depth));
            }
        }
        if !(0..=MAX_QP).contains(&config.qp) {
            return invalid(format!("qp {} outside 0..={}", config.qp, MAX_QP));
        }
        if config.frame_rate <= 0 || config.frame_scale <= 0 {
            return invalid(format!(
                "invalid frame rate {}/{}",
                config.frame_rate, config.frame_scale
            ));
        }
        if config.ticks_per_second != TICKS_PER_SECOND {
            return invalid(format!(
                "ticks per second must be {}, got {}",
                TICKS_PER_SECOND, config.ticks_per_second
            ));
        }
        if config.gop_size == 0 || config.intra_period == 0 {
            return invalid("gop size and intra period must be positive".to_string());
        }
        Ok(())
    }

    fn emit(&mut self, picture: Picture, au: &mut AccessUnit) -> Result<(), BackendError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| BackendError::new(ERR_INITIALIZE, "encoder not open"))?;

        let intra_period = config.intra_period as i64;
        let gop = config.gop_size as i64;
        let (slice_type, temporal_layer) = if picture.poc % intra_period == 0 {
            (SliceType::I, 0)
        } else if picture.poc % gop == 0 {
            (SliceType::P, 0)
        } else {
            (SliceType::B, 1)
        };
        let is_intra = slice_type == SliceType::I;
        let nal_type = if is_intra { NAL_IDR_W_RADL } else { NAL_TRAIL_NUT };

        // bigger units for intra pictures and low qp
        let area = config.source_width as usize * config.source_height as usize;
        let mut filler_len = (MAX_QP - config.qp) as usize * area / 4096 + 1;
        if is_intra {
            filler_len *= 4;
        }

        au.reset();
        au.append(&START_CODE)?;
        au.append(&[0x00, (nal_type << 3) | (temporal_layer as u8 + 1)])?;
        au.append(&(picture.poc as u32).to_be_bytes())?;
        for d in picture.digest {
            au.append(&d.to_be_bytes())?;
        }
        let mut state = picture.digest[0] | 1;
        let mut filler = Vec::with_capacity(filler_len);
        for _ in 0..filler_len {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            // high bit set, so no start code emulation
            filler.push((state >> 24) as u8 | 0x80);
        }
        au.append(&filler)?;

        // pictures leave in submission order and cts was checked to rise on
        // submission, so dts = cts keeps dts increasing and never above pts
        au.cts = picture.cts;
        au.dts = picture.cts;
        au.cts_valid = picture.cts_valid;
        au.slice_type = slice_type;
        au.is_intra = is_intra;
        au.is_ref_pic = slice_type != SliceType::B;
        au.poc = picture.poc;
        au.temporal_layer = temporal_layer;
        self.emitted += 1;

        let qp = config.qp;
        let size = au.used_size();
        self.msg(
            Verbosity::Details,
            format!(
                "POC {:4} SEQ {:4} TId: {} ( {}-SLICE, QP {} ) {:7} bytes\n",
                picture.poc,
                picture.sequence_number,
                temporal_layer,
                slice_type.as_char(),
                qp,
                size
            ),
        );
        Ok(())
    }
}

impl super::EncoderBackend for LookaheadEncoder {
    fn open(
        &mut self,
        config: &mut EncoderConfig,
        log: Arc<dyn LogSink>,
    ) -> Result<(), BackendError> {
        if self.config.is_some() {
            return Err(BackendError::new(
                ERR_RESTART_REQUIRED,
                "encoder already open",
            ));
        }
        self.log = Some(log);
        if let Err(e) = Self::validate(config) {
            self.msg(Verbosity::Error, format!("vvenc: {}\n", e.message));
            return Err(e);
        }

        let width = config.source_width.div_ceil(MIN_CU_SIZE) * MIN_CU_SIZE;
        let height = config.source_height.div_ceil(MIN_CU_SIZE) * MIN_CU_SIZE;
        if width != config.source_width || height != config.source_height {
            self.msg(
                Verbosity::Warning,
                format!(
                    "vvenc: source size {}x{} padded to {}x{}\n",
                    config.source_width, config.source_height, width, height
                ),
            );
            config.source_width = width;
            config.source_height = height;
        }

        self.threads = if config.num_threads > 0 {
            config.num_threads as usize
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };

        self.msg(
            Verbosity::Info,
            format!(
                "vvenc: {} {}x{} @ {:.3} fps, preset {:?}, qp {}, bitrate {}, threads {}, intra period {}\n",
                self.version(),
                config.source_width,
                config.source_height,
                config.frame_rate_f64(),
                config.preset,
                config.qp,
                config.target_bitrate,
                self.threads,
                config.intra_period
            ),
        );

        self.queue.clear();
        self.next_poc = 0;
        self.emitted = 0;
        self.last_cts = None;
        self.flushing = false;
        self.config = Some(config.clone());
        Ok(())
    }

    fn encode(
        &mut self,
        picture: Option<&YuvBuffer>,
        au: &mut AccessUnit,
    ) -> Result<bool, BackendError> {
        let (depth, ticks_per_frame) = match &self.config {
            Some(config) => (config.gop_size as usize, config.ticks_per_frame()),
            None => return Err(BackendError::new(ERR_INITIALIZE, "encoder not open")),
        };
        au.reset();

        match picture {
            Some(picture) => {
                if self.flushing {
                    return Err(BackendError::new(
                        ERR_RESTART_REQUIRED,
                        "picture submitted after flush",
                    ));
                }
                let cts = if picture.cts_valid {
                    picture.cts
                } else {
                    self.next_poc * ticks_per_frame
                };
                if let Some(last) = self.last_cts.filter(|last| cts <= *last) {
                    let e = BackendError::new(
                        ERR_PARAMETER,
                        format!("cts {} not after previous picture's {}", cts, last),
                    );
                    self.msg(Verbosity::Error, format!("vvenc: {}\n", e.message));
                    return Err(e);
                }
                self.last_cts = Some(cts);
                self.queue.push_back(Picture {
                    poc: self.next_poc,
                    sequence_number: picture.sequence_number,
                    cts,
                    cts_valid: picture.cts_valid,
                    digest: picture_digest(picture),
                });
                self.next_poc += 1;
                if self.queue.len() > depth {
                    if let Some(next) = self.queue.pop_front() {
                        self.emit(next, au)?;
                    }
                }
                Ok(false)
            }
            None => {
                if !self.flushing {
                    self.flushing = true;
                    self.msg(
                        Verbosity::Details,
                        format!("vvenc: flushing {} pictures\n", self.queue.len()),
                    );
                }
                if let Some(next) = self.queue.pop_front() {
                    self.emit(next, au)?;
                }
                Ok(self.queue.is_empty())
            }
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if self.config.take().is_none() {
            return Err(BackendError::new(ERR_UNSPECIFIED, "encoder not open"));
        }
        if !self.queue.is_empty() {
            self.msg(
                Verbosity::Warning,
                format!(
                    "vvenc: closing with {} pictures not encoded\n",
                    self.queue.len()
                ),
            );
        }
        self.msg(
            Verbosity::Info,
            format!("vvenc: {} pictures encoded\n", self.emitted),
        );
        self.queue.clear();
        self.log = None;
        Ok(())
    }

    fn version(&self) -> String {
        format!("vvenc-lookahead {}", env!("CARGO_PKG_VERSION"))
    }
}
