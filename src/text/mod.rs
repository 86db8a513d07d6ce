// Text normalization: clean text for embedding, coarse narrative tagging.
//
// Both functions are pure and total: any input string produces an output.

pub mod narrative;
pub mod normalize;

pub use narrative::{assign_narrative, Narrative};
pub use normalize::clean_text;
