//! Retention policy for remote backup copies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How long remote backups are kept.
///
/// Objects created on one of `preserved_days_of_month` survive the one-week
/// pruning and live until `months_to_keep` (counted as 30-day months) has
/// elapsed. Everything else is dropped after a week.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub months_to_keep: u32,
    pub preserved_days_of_month: BTreeSet<u32>,
}

impl RetentionPolicy {
    pub fn new(
        months_to_keep: u32,
        preserved_days_of_month: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            months_to_keep,
            preserved_days_of_month: preserved_days_of_month.into_iter().collect(),
        }
    }

    /// Overall horizon in days after which even preserved objects go.
    pub fn horizon_days(&self) -> i64 {
        i64::from(self.months_to_keep).saturating_mul(30)
    }

    pub fn preserves_day(&self, day_of_month: u32) -> bool {
        self.preserved_days_of_month.contains(&day_of_month)
    }
}
