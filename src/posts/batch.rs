use std::collections::HashSet;

use super::record::{Post, PostId, RawPost};
use crate::error::{PipelineError, PipelineResult};

/// Required input fields, in the order they are reported when missing.
pub const REQUIRED_FIELDS: [&str; 5] = [
    "post_id",
    "text",
    "timestamp",
    "account_id",
    "account_age_days",
];

/// A validated, immutable batch of posts.
///
/// Construction guarantees every required field is present and parsed and
/// that `post_id` is unique. Stages index into `posts()` and never mutate it.
#[derive(Debug, Clone, Default)]
pub struct PostBatch {
    posts: Vec<Post>,
}

impl PostBatch {
    /// Wrap already-typed posts, enforcing `post_id` uniqueness.
    pub fn new(posts: Vec<Post>) -> PipelineResult<Self> {
        let mut seen: HashSet<&PostId> = HashSet::with_capacity(posts.len());
        for post in &posts {
            if !seen.insert(&post.post_id) {
                return Err(PipelineError::DuplicatePostId {
                    post_id: post.post_id.to_string(),
                });
            }
        }
        Ok(Self { posts })
    }

    /// Validate loosely-typed records.
    ///
    /// Missing fields are checked across the whole batch first so the error
    /// names every absent field at once; value errors are reported for the
    /// first offending record.
    pub fn from_raw(raw: Vec<RawPost>) -> PipelineResult<Self> {
        let mut missing = [false; REQUIRED_FIELDS.len()];
        let mut records_missing = 0;

        for record in &raw {
            let absent = [
                record.post_id.is_none(),
                record.text.is_none(),
                record.timestamp.is_none(),
                record.account_id.is_none(),
                record.account_age_days.is_none(),
            ];
            if absent.iter().any(|&a| a) {
                records_missing += 1;
            }
            for (slot, is_absent) in missing.iter_mut().zip(absent) {
                *slot |= is_absent;
            }
        }

        if records_missing > 0 {
            let fields = REQUIRED_FIELDS
                .iter()
                .zip(missing)
                .filter(|(_, m)| *m)
                .map(|(name, _)| *name)
                .collect();
            return Err(PipelineError::MissingFields {
                fields,
                records: records_missing,
            });
        }

        let mut posts = Vec::with_capacity(raw.len());
        for (index, record) in raw.into_iter().enumerate() {
            // Presence was checked above.
            let (Some(post_id), Some(text), Some(timestamp), Some(account_id), Some(age)) = (
                record.post_id,
                record.text,
                record.timestamp,
                record.account_id,
                record.account_age_days,
            ) else {
                continue;
            };

            let timestamp = timestamp
                .parse()
                .map_err(|reason| PipelineError::InvalidField {
                    index,
                    field: "timestamp",
                    reason,
                })?;

            let account_age_days =
                u32::try_from(age).map_err(|_| PipelineError::InvalidField {
                    index,
                    field: "account_age_days",
                    reason: format!("must be a non-negative day count, got {age}"),
                })?;

            posts.push(Post {
                post_id: PostId(post_id.into_string()),
                text,
                timestamp,
                account_id: account_id.into_string(),
                account_age_days,
            });
        }

        Self::new(posts)
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Post> {
        self.posts.iter()
    }
}
