// Coordinated-burst detection.
//
// Posts are grouped by narrative and bucketed into fixed, epoch-aligned
// windows. Any bucket holding at least `min_posts` posts of one narrative is
// a burst. Buckets never overlap, so a burst that straddles a boundary is
// split across two buckets and may fall under the minimum in both. The
// catch-all narrative is never considered coordinated.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::posts::{Post, PostId};
use crate::text::Narrative;

/// One qualifying (narrative, window) bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationEvent {
    pub narrative: Narrative,
    pub window_start: DateTime<Utc>,
    /// Exclusive end of the window.
    pub window_end: DateTime<Utc>,
    /// Members in timestamp order, ties in batch order.
    pub post_ids: Vec<PostId>,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinationReport {
    pub coordinated_ids: BTreeSet<PostId>,
    /// Sorted by narrative, then window start.
    pub events: Vec<CoordinationEvent>,
}

impl CoordinationReport {
    /// Burst size per post in batch order: the member count of the post's
    /// event, or 0 when it is in none.
    pub fn burst_sizes(&self, posts: &[Post]) -> Vec<usize> {
        let by_id: BTreeMap<&PostId, usize> = self
            .events
            .iter()
            .flat_map(|e| e.post_ids.iter().map(move |id| (id, e.count)))
            .collect();
        posts
            .iter()
            .map(|p| by_id.get(&p.post_id).copied().unwrap_or(0))
            .collect()
    }
}

/// Start of the fixed bucket containing `ts`.
pub fn bucket_start(ts: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_secs = width.num_seconds().max(1);
    let offset = ts.timestamp().rem_euclid(width_secs);
    ts.trunc_subsecs(0) - Duration::seconds(offset)
}

/// Find bursts. `narratives` must be aligned with `posts`.
pub fn detect_coordination(
    posts: &[Post],
    narratives: &[Narrative],
    window: Duration,
    min_posts: usize,
) -> CoordinationReport {
    let mut buckets: BTreeMap<(Narrative, DateTime<Utc>), Vec<usize>> = BTreeMap::new();
    for (i, (post, narrative)) in posts.iter().zip(narratives).enumerate() {
        if narrative.is_catch_all() {
            continue;
        }
        buckets
            .entry((*narrative, bucket_start(post.timestamp, window)))
            .or_default()
            .push(i);
    }

    let mut report = CoordinationReport::default();
    for ((narrative, window_start), mut members) in buckets {
        if members.len() < min_posts {
            continue;
        }
        members.sort_by_key(|&i| (posts[i].timestamp, i));

        let post_ids: Vec<PostId> = members.iter().map(|&i| posts[i].post_id.clone()).collect();
        report.coordinated_ids.extend(post_ids.iter().cloned());

        debug!(
            narrative = %narrative,
            window_start = %window_start,
            count = post_ids.len(),
            "Coordinated burst"
        );

        report.events.push(CoordinationEvent {
            narrative,
            window_start,
            window_end: window_start + window,
            count: post_ids.len(),
            post_ids,
        });
    }

    info!(
        events = report.events.len(),
        coordinated = report.coordinated_ids.len(),
        "Coordination detection complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    fn post(id: &str, ts: DateTime<Utc>) -> Post {
        Post::new(id, "text", ts, "acct", 10)
    }

    #[test]
    fn test_bucket_start_aligns_to_window() {
        let w = Duration::minutes(10);
        assert_eq!(bucket_start(at(12, 7, 59), w), at(12, 0, 0));
        assert_eq!(bucket_start(at(12, 10, 0), w), at(12, 10, 0));
    }

    #[test]
    fn test_burst_detected_at_minimum() {
        let posts = vec![
            post("a", at(12, 1, 0)),
            post("b", at(12, 2, 0)),
            post("c", at(12, 9, 59)),
        ];
        let narratives = vec![Narrative::Doge; 3];
        let report = detect_coordination(&posts, &narratives, Duration::minutes(10), 3);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].count, 3);
        assert_eq!(report.events[0].window_start, at(12, 0, 0));
        assert_eq!(report.events[0].window_end, at(12, 10, 0));
        assert_eq!(report.coordinated_ids.len(), 3);
        assert_eq!(report.burst_sizes(&posts), vec![3, 3, 3]);
    }

    #[test]
    fn test_boundary_splits_burst() {
        // Four posts within four minutes, but two land in each bucket.
        let posts = vec![
            post("a", at(12, 8, 0)),
            post("b", at(12, 9, 0)),
            post("c", at(12, 10, 0)),
            post("d", at(12, 11, 0)),
        ];
        let narratives = vec![Narrative::Btc; 4];
        let report = detect_coordination(&posts, &narratives, Duration::minutes(10), 3);
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_other_narrative_never_coordinated() {
        let posts: Vec<Post> = (0..5).map(|i| post(&i.to_string(), at(12, 1, i))).collect();
        let narratives = vec![Narrative::Other; 5];
        let report = detect_coordination(&posts, &narratives, Duration::minutes(10), 3);
        assert!(report.events.is_empty());
        assert!(report.coordinated_ids.is_empty());
    }

    #[test]
    fn test_members_ordered_by_time() {
        let posts = vec![
            post("late", at(12, 5, 0)),
            post("early", at(12, 1, 0)),
            post("mid", at(12, 3, 0)),
        ];
        let narratives = vec![Narrative::Eth; 3];
        let report = detect_coordination(&posts, &narratives, Duration::minutes(10), 3);
        let ids: Vec<&str> = report.events[0].post_ids.iter().map(|p| p.as_str()).collect();
        assert_eq!(ids, vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_events_sorted_by_narrative_then_window() {
        let mut posts = Vec::new();
        let mut narratives = Vec::new();
        for (i, (n, m)) in [
            (Narrative::Doge, 30),
            (Narrative::Btc, 40),
            (Narrative::Doge, 0),
        ]
        .into_iter()
        .enumerate()
        {
            for k in 0..2 {
                posts.push(post(&format!("{i}-{k}"), at(12, m + k, 0)));
                narratives.push(n);
            }
        }
        let report = detect_coordination(&posts, &narratives, Duration::minutes(10), 2);
        let keys: Vec<(Narrative, DateTime<Utc>)> = report
            .events
            .iter()
            .map(|e| (e.narrative, e.window_start))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Narrative::Btc, at(12, 40, 0)),
                (Narrative::Doge, at(12, 0, 0)),
                (Narrative::Doge, at(12, 30, 0)),
            ]
        );
    }

    #[test]
    fn test_empty_batch() {
        let report = detect_coordination(&[], &[], Duration::minutes(10), 3);
        assert!(report.events.is_empty());
    }
}
