//! Buffers exchanged with the encoder library: the 16-bit sample picture it
//! reads from and the access unit it writes into. Both are allocated once per
//! encoder and reused for every call.

use crate::config::ChromaFormat;
use crate::error::{BackendError, Error, Result};

/// Widens 8-bit samples to 16 bits by value.
pub fn expand_bytes(src: &[u8], dst: &mut [i16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = i16::from(*s);
    }
}

/// Reads little-endian 16-bit samples.
pub fn copy_le_samples(src: &[u8], dst: &mut [i16]) {
    for (d, s) in dst.iter_mut().zip(src.chunks_exact(2)) {
        *d = i16::from_le_bytes([s[0], s[1]]);
    }
}

fn alloc_zeroed<T: Copy + Default>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|e| Error::Allocation(format!("{} ({} elements): {}", what, len, e)))?;
    v.resize(len, T::default());
    Ok(v)
}

pub struct Plane {
    samples: Vec<i16>,
    width: usize,
    height: usize,
    stride: usize,
}

impl Plane {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn row(&self, y: usize) -> &[i16] {
        &self.samples[y * self.stride..y * self.stride + self.width]
    }

    /// Fills the plane from a `src_width`x`src_height` source, `copy_row`
    /// writing source row `y` into the slice it is given. Columns and rows the
    /// source does not cover repeat its last column and row.
    fn fill<F>(&mut self, src_width: usize, src_height: usize, mut copy_row: F)
    where
        F: FnMut(usize, &mut [i16]),
    {
        let w = src_width.min(self.width);
        if w == 0 || src_height == 0 {
            return;
        }
        for y in 0..self.height {
            let start = y * self.stride;
            if y < src_height {
                let row = &mut self.samples[start..start + self.width];
                copy_row(y, &mut row[..w]);
                let last = row[w - 1];
                row[w..].fill(last);
            } else {
                let (above, rest) = self.samples.split_at_mut(start);
                let prev = start - self.stride;
                rest[..self.width].copy_from_slice(&above[prev..prev + self.width]);
            }
        }
    }

    pub fn fill_from_8bit(&mut self, src: &[u8], src_stride: usize, src_width: usize, src_height: usize) {
        self.fill(src_width, src_height, |y, dst| {
            let offset = y * src_stride;
            expand_bytes(&src[offset..offset + dst.len()], dst);
        });
    }

    pub fn fill_from_16bit_le(
        &mut self,
        src: &[u8],
        src_stride: usize,
        src_width: usize,
        src_height: usize,
    ) {
        self.fill(src_width, src_height, |y, dst| {
            let offset = y * src_stride;
            copy_le_samples(&src[offset..offset + dst.len() * 2], dst);
        });
    }
}

/// Picture buffer in the encoder's native layout (`i16` samples).
pub struct YuvBuffer {
    planes: Vec<Plane>,
    chroma_format: ChromaFormat,
    pub sequence_number: u64,
    pub cts: i64,
    pub cts_valid: bool,
}

impl YuvBuffer {
    pub fn alloc(chroma_format: ChromaFormat, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Configuration(format!(
                "cannot allocate {}x{} picture buffer",
                width, height
            )));
        }
        let (sx, sy) = chroma_format.shifts();
        let mut planes = Vec::with_capacity(chroma_format.plane_count());
        for i in 0..chroma_format.plane_count() {
            let (w, h) = if i == 0 {
                (width as usize, height as usize)
            } else {
                (
                    (width as usize).div_ceil(1 << sx),
                    (height as usize).div_ceil(1 << sy),
                )
            };
            let len = w.checked_mul(h).ok_or_else(|| {
                Error::Configuration(format!("plane {} size {}x{} overflows", i, w, h))
            })?;
            planes.push(Plane {
                samples: alloc_zeroed(len, "picture plane")?,
                width: w,
                height: h,
                stride: w,
            });
        }
        Ok(Self {
            planes,
            chroma_format,
            sequence_number: 0,
            cts: 0,
            cts_valid: false,
        })
    }

    pub fn chroma_format(&self) -> ChromaFormat {
        self.chroma_format
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> &Plane {
        &self.planes[index]
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut Plane {
        &mut self.planes[index]
    }

    pub fn width(&self) -> u32 {
        self.planes[0].width as u32
    }

    pub fn height(&self) -> u32 {
        self.planes[0].height as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceType {
    B,
    P,
    #[default]
    I,
}

impl SliceType {
    pub fn as_char(&self) -> char {
        match self {
            SliceType::B => 'B',
            SliceType::P => 'P',
            SliceType::I => 'I',
        }
    }
}

/// One coded picture as written by the encoder. `used_size` is zero while the
/// encoder is still filling its lookahead.
pub struct AccessUnit {
    payload: Vec<u8>,
    used_size: usize,
    pub cts: i64,
    pub dts: i64,
    pub cts_valid: bool,
    pub slice_type: SliceType,
    pub is_ref_pic: bool,
    pub is_intra: bool,
    pub poc: i64,
    pub temporal_layer: u32,
}

impl AccessUnit {
    pub fn alloc(payload_size: usize) -> Result<Self> {
        Ok(Self {
            payload: alloc_zeroed(payload_size, "access unit payload")?,
            used_size: 0,
            cts: 0,
            dts: 0,
            cts_valid: false,
            slice_type: SliceType::default(),
            is_ref_pic: false,
            is_intra: false,
            poc: 0,
            temporal_layer: 0,
        })
    }

    /// Capacity of the payload buffer.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    pub fn used_size(&self) -> usize {
        self.used_size
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.used_size]
    }

    /// Marks the unit empty and clears its picture metadata.
    pub fn reset(&mut self) {
        self.used_size = 0;
        self.cts = 0;
        self.dts = 0;
        self.cts_valid = false;
        self.slice_type = SliceType::default();
        self.is_ref_pic = false;
        self.is_intra = false;
        self.poc = 0;
        self.temporal_layer = 0;
    }

    /// Appends coded bytes. Fails without writing if they do not fit.
    pub fn append(&mut self, data: &[u8]) -> std::result::Result<(), BackendError> {
        let end = self.used_size + data.len();
        if end > self.payload.len() {
            return Err(BackendError::new(
                -1,
                format!(
                    "access unit payload overflow: {} bytes, capacity {}",
                    end,
                    self.payload.len()
                ),
            ));
        }
        self.payload[self.used_size..end].copy_from_slice(data);
        self.used_size = end;
        Ok(())
    }
}
