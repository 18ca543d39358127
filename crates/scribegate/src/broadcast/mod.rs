//! Real-time progress broadcasting.
//!
//! Each run gets its own channel in a registry so subscribers only see
//! events for runs they asked about. Worker threads publish through
//! [`ProgressRecorder`], which also buffers the trail for durable
//! storage at run end.

mod progress;

pub use progress::{
    ProgressBroadcaster, ProgressEvent, ProgressRecorder, ProgressSink, Severity,
};
