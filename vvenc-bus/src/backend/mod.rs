//! The encoder library as seen by the adapter.
//!
//! A backend owns the actual coding pipeline and any worker threads it needs.
//! The adapter only opens it with a configuration, hands it one picture (or a
//! drain request) per call together with an access unit to fill, and closes it.

use std::sync::Arc;

use crate::buffer::{AccessUnit, YuvBuffer};
use crate::config::EncoderConfig;
use crate::error::BackendError;
use crate::logging::LogSink;

mod lookahead;

pub use lookahead::LookaheadEncoder;

pub trait EncoderBackend: Send {
    /// Validates and applies `config`. The backend may adjust the source size;
    /// the caller allocates its buffers from the values left in `config`.
    fn open(&mut self, config: &mut EncoderConfig, log: Arc<dyn LogSink>)
        -> Result<(), BackendError>;

    /// Submits `picture`, or a drain request when `None`, and writes at most
    /// one coded picture into `au`. Returns `true` once every submitted
    /// picture has been emitted after a drain request.
    fn encode(
        &mut self,
        picture: Option<&YuvBuffer>,
        au: &mut AccessUnit,
    ) -> Result<bool, BackendError>;

    /// Stops the pipeline, discarding pictures still in flight.
    fn close(&mut self) -> Result<(), BackendError>;

    fn version(&self) -> String {
        String::from("unknown")
    }
}

impl EncoderBackend for Box<dyn EncoderBackend> {
    fn open(
        &mut self,
        config: &mut EncoderConfig,
        log: Arc<dyn LogSink>,
    ) -> Result<(), BackendError> {
        (**self).open(config, log)
    }

    fn encode(
        &mut self,
        picture: Option<&YuvBuffer>,
        au: &mut AccessUnit,
    ) -> Result<bool, BackendError> {
        (**self).encode(picture, au)
    }

    fn close(&mut self) -> Result<(), BackendError> {
        (**self).close()
    }

    fn version(&self) -> String {
        (**self).version()
    }
}
