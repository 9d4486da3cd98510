//! Testing utilities for swingcam
//!
//! Synthetic cameras, frames and pairs, plus scripted signal extractors and
//! writer factories with injectable failures. Used by the unit tests, the
//! integration tests and the CLI's `--synthetic` mode.

pub mod doubles;
pub mod synthetic_data;

pub use doubles::{FailingWriterFactory, ScriptedSignal};
pub use synthetic_data::{
    gradient_pixels, solid_frame, synthetic_frame, synthetic_pair, SyntheticSource,
};
