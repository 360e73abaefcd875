//! Job dispatch and media-processing backends.
//!
//! A job is a validated operation bound to an uploaded source file. The
//! dispatcher picks the output name and hands the work to a `MediaBackend`:
//! `FfmpegBackend` in production, `SimulatedBackend` for tests and offline
//! runs.

pub mod backend;
pub mod dispatcher;
pub mod ffmpeg;
pub mod simulation;

pub use backend::{BackendError, BackendResult, MediaBackend, MediaProbe, StreamInfo};
pub use dispatcher::{
    AUDIO_OUTPUT_EXTENSION, Job, JobDispatcher, ProcessingError, TRIM_OUTPUT_EXTENSION,
    output_extension,
};
pub use ffmpeg::FfmpegBackend;
pub use simulation::SimulatedBackend;
