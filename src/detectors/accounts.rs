// Account heuristic scorer.
//
// Four independent rules, each worth a fixed number of points, summed and
// capped at 100. The result is advisory: it is reported next to the
// per-post risk but never feeds into it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::posts::{Post, PostId};

const YOUNG_ACCOUNT_DAYS: u32 = 30;
const HIGH_RATE_PER_HOUR: f64 = 5.0;
const SUSPICIOUS_SCORE: u32 = 70;
const MAX_SCORE: u32 = 100;

/// A heuristic that fired for an account. Declaration order is report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountFlag {
    YoungAccount,
    HighPostingRate,
    DuplicateContent,
    CoordinatedActivity,
}

impl AccountFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountFlag::YoungAccount => "young_account",
            AccountFlag::HighPostingRate => "high_posting_rate",
            AccountFlag::DuplicateContent => "duplicate_content",
            AccountFlag::CoordinatedActivity => "coordinated_activity",
        }
    }

    /// Points this rule adds to the account score.
    pub fn points(&self) -> u32 {
        match self {
            AccountFlag::YoungAccount | AccountFlag::HighPostingRate => 30,
            AccountFlag::DuplicateContent | AccountFlag::CoordinatedActivity => 20,
        }
    }
}

/// One row per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountHeuristic {
    pub account_id: String,
    /// 0-100
    pub score: u32,
    pub suspicious: bool,
    pub flags: Vec<AccountFlag>,
    pub post_count: usize,
    /// Posts per hour over the account's observed span (at least one hour).
    pub posting_rate: f64,
}

/// Score every account in the batch. Rows are sorted by account id.
pub fn score_accounts(
    posts: &[Post],
    duplicate_ids: &BTreeSet<PostId>,
    coordinated_ids: &BTreeSet<PostId>,
) -> Vec<AccountHeuristic> {
    let mut by_account: BTreeMap<&str, Vec<&Post>> = BTreeMap::new();
    for post in posts {
        by_account.entry(post.account_id.as_str()).or_default().push(post);
    }

    let rows: Vec<AccountHeuristic> = by_account
        .into_iter()
        .map(|(account_id, group)| score_account(account_id, &group, duplicate_ids, coordinated_ids))
        .collect();

    info!(
        accounts = rows.len(),
        suspicious = rows.iter().filter(|r| r.suspicious).count(),
        "Account heuristics complete"
    );
    rows
}

fn score_account(
    account_id: &str,
    group: &[&Post],
    duplicate_ids: &BTreeSet<PostId>,
    coordinated_ids: &BTreeSet<PostId>,
) -> AccountHeuristic {
    let mut flags = Vec::new();

    // Age is constant per account; the first post in batch order is canonical.
    if group[0].account_age_days < YOUNG_ACCOUNT_DAYS {
        flags.push(AccountFlag::YoungAccount);
    }

    let posting_rate = posting_rate(group);
    if posting_rate > HIGH_RATE_PER_HOUR {
        flags.push(AccountFlag::HighPostingRate);
    }

    if group.iter().any(|p| duplicate_ids.contains(&p.post_id)) {
        flags.push(AccountFlag::DuplicateContent);
    }
    if group.iter().any(|p| coordinated_ids.contains(&p.post_id)) {
        flags.push(AccountFlag::CoordinatedActivity);
    }

    let raw: u32 = flags.iter().map(AccountFlag::points).sum();

    AccountHeuristic {
        account_id: account_id.to_string(),
        score: raw.min(MAX_SCORE),
        suspicious: raw >= SUSPICIOUS_SCORE,
        flags,
        post_count: group.len(),
        posting_rate,
    }
}

/// Post count divided by the observed span in hours, floored at one hour.
fn posting_rate(group: &[&Post]) -> f64 {
    let first = group.iter().map(|p| p.timestamp).min();
    let last = group.iter().map(|p| p.timestamp).max();
    let span_hours = match (first, last) {
        (Some(first), Some(last)) => (last - first).num_milliseconds() as f64 / 3_600_000.0,
        _ => 0.0,
    };
    group.len() as f64 / span_hours.max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn posts_for(account: &str, age: u32, count: usize, spacing: Duration) -> Vec<Post> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                Post::new(
                    format!("{account}-{i}"),
                    "text",
                    start + spacing * i as i32,
                    account,
                    age,
                )
            })
            .collect()
    }

    #[test]
    fn test_quiet_old_account_scores_zero() {
        let posts = posts_for("old", 400, 2, Duration::hours(3));
        let rows = score_accounts(&posts, &BTreeSet::new(), &BTreeSet::new());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 0);
        assert!(!rows[0].suspicious);
        assert!(rows[0].flags.is_empty());
    }

    #[test]
    fn test_rate_uses_one_hour_floor() {
        // 10 posts in 5 minutes: span is floored to 1h, so rate is 10/h.
        let posts = posts_for("burst", 400, 10, Duration::seconds(30));
        let rows = score_accounts(&posts, &BTreeSet::new(), &BTreeSet::new());
        assert!((rows[0].posting_rate - 10.0).abs() < 1e-9);
        assert_eq!(rows[0].flags, vec![AccountFlag::HighPostingRate]);
        assert_eq!(rows[0].score, 30);
    }

    #[test]
    fn test_exactly_five_per_hour_is_not_high() {
        let posts = posts_for("steady", 400, 5, Duration::minutes(10));
        let rows = score_accounts(&posts, &BTreeSet::new(), &BTreeSet::new());
        assert!(!rows[0].flags.contains(&AccountFlag::HighPostingRate));
    }

    #[test]
    fn test_all_rules_cap_at_100() {
        let posts = posts_for("bot", 3, 10, Duration::seconds(10));
        let ids: BTreeSet<PostId> = posts.iter().map(|p| p.post_id.clone()).collect();
        let rows = score_accounts(&posts, &ids, &ids);
        assert_eq!(rows[0].score, 100);
        assert!(rows[0].suspicious);
        assert_eq!(
            rows[0].flags,
            vec![
                AccountFlag::YoungAccount,
                AccountFlag::HighPostingRate,
                AccountFlag::DuplicateContent,
                AccountFlag::CoordinatedActivity,
            ]
        );
    }

    #[test]
    fn test_suspicious_threshold_is_inclusive() {
        // young (30) + duplicate (20) + coordinated (20) = 70
        let posts = posts_for("new", 5, 1, Duration::hours(1));
        let ids: BTreeSet<PostId> = posts.iter().map(|p| p.post_id.clone()).collect();
        let rows = score_accounts(&posts, &ids, &ids);
        assert_eq!(rows[0].score, 70);
        assert!(rows[0].suspicious);
    }

    #[test]
    fn test_rows_sorted_by_account() {
        let mut posts = posts_for("zed", 400, 1, Duration::hours(1));
        posts.extend(posts_for("amy", 400, 1, Duration::hours(1)));
        let rows = score_accounts(&posts, &BTreeSet::new(), &BTreeSet::new());
        let ids: Vec<&str> = rows.iter().map(|r| r.account_id.as_str()).collect();
        assert_eq!(ids, vec!["amy", "zed"]);
    }

    #[test]
    fn test_flag_names() {
        assert_eq!(AccountFlag::HighPostingRate.as_str(), "high_posting_rate");
        assert_eq!(
            serde_json::to_string(&AccountFlag::CoordinatedActivity).unwrap(),
            "\"coordinated_activity\""
        );
    }
}
