//! Retention predicate for remote backup copies.

use crate::models::{object::StoredObject, policy::RetentionPolicy};
use chrono::{DateTime, Datelike, TimeDelta, Utc};

/// Non-milestone objects are pruned once they are this many days old.
pub const SHORT_TERM_DAYS: i64 = 7;

/// Whole days from `last_modified` to `now`, rounded toward negative
/// infinity so anything dated after `now` has a negative age.
pub fn age_days(last_modified: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed = now - last_modified;
    let days = elapsed.num_days();
    if elapsed < TimeDelta::days(days) {
        days - 1
    } else {
        days
    }
}

/// Whether an object last modified at `last_modified` should be removed at
/// `now` under `policy`.
///
/// Objects older than a week are dropped unless they were written on a
/// preserved day of the month. Preserved objects are dropped once they
/// pass the policy horizon (`30 * months_to_keep` days).
pub fn should_delete(
    last_modified: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &RetentionPolicy,
) -> bool {
    let age = age_days(last_modified, now);

    if age >= SHORT_TERM_DAYS && !policy.preserves_day(last_modified.day()) {
        return true;
    }
    age >= policy.horizon_days()
}

/// Objects from a listing that `should_delete` selects.
pub fn expired<'a>(
    objects: &'a [StoredObject],
    now: DateTime<Utc>,
    policy: &RetentionPolicy,
) -> Vec<&'a StoredObject> {
    objects
        .iter()
        .filter(|object| should_delete(object.last_modified, now, policy))
        .collect()
}
