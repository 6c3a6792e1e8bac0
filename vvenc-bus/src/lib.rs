//! H.266/VVC encoder adapter: feeds host pictures to a VVenC-style encoder
//! backend and turns its access units into timestamped packets.

pub mod backend;
pub mod buffer;
pub mod config;
pub mod encoder;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod logging;
pub mod packet;
pub mod rational;

pub use error::{Error, Result};
