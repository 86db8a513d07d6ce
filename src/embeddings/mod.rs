// Sentence embeddings: the "text to fixed-width vector" capability the
// duplicate detector depends on.
//
// The Embedder trait is the seam: the local ONNX model, the model-free
// hashing embedder and a remote HTTP provider all satisfy it, so detection
// logic never knows which one produced the vectors.

pub mod download;
pub mod hashing;
pub mod onnx;
pub mod rate_limiter;
pub mod remote;
pub mod similarity;
pub mod traits;
