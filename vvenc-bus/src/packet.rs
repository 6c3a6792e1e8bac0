use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::rational::Rational;

pub type RawPacketSender = tokio::sync::mpsc::Sender<RawPacketCmd>;
pub type RawPacketReceiver = tokio::sync::mpsc::Receiver<RawPacketCmd>;

#[derive(Clone)]
pub enum RawPacketCmd {
    Data(RawPacket),
    EOF,
}

/// One encoded access unit in the host's time base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPacket {
    data: Bytes,
    pts: Option<i64>,
    dts: Option<i64>,
    duration: i64,
    is_key: bool,
    time_base: Rational,
}

impl RawPacket {
    pub fn new(data: Bytes, time_base: Rational) -> Self {
        Self {
            data,
            time_base,
            ..Default::default()
        }
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn dts(&self) -> Option<i64> {
        self.dts
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> Bytes {
        self.data.clone()
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    pub fn set_dts(&mut self, dts: Option<i64>) {
        self.dts = dts;
    }

    pub fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    pub fn set_key(&mut self, is_key: bool) {
        self.is_key = is_key;
    }
}

impl Display for RawPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "RawPacket size: {}, pts: {:?}, dts: {:?}, duration: {}, is_key: {}, time_base: {}",
            self.data.len(),
            self.pts,
            self.dts,
            self.duration,
            self.is_key,
            self.time_base
        )
    }
}
