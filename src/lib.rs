// Flare: batch detection of coordinated and copy-paste posting
//
// This is the library root. Each module corresponds to a major subsystem
// of the risk pipeline.

pub mod config;
pub mod detectors;
pub mod embeddings;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod posts;
pub mod scoring;
pub mod text;
