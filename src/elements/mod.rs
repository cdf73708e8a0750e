//! Ready-made elements.
//!
//! Only test and measurement elements live in-tree; real sources, filters
//! and sinks are the user's business.

pub mod testing;

pub use testing::{CollectSink, CountSource, PassThrough};
