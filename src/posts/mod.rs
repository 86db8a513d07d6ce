// Post records: the typed input batch every pipeline stage reads.
//
// `RawPost` mirrors loosely-typed upstream records (JSON objects with
// optional fields). `PostBatch::from_raw` validates them into `Post`s once,
// before any detector runs.

pub mod batch;
pub mod record;

pub use batch::PostBatch;
pub use record::{Post, PostId, RawKey, RawPost, RawTimestamp};
