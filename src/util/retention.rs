//! Retention policy applied when cleaning up old backups.

use chrono::{Datelike, NaiveDateTime};

/// Decides which stored backups survive a cleanup run.
///
/// The newest `keep` backups always survive. Older backups are deleted
/// unless the [`keep_filter`](Self::keep_filter) claims them.
pub struct RetentionPolicy {
    /// Number of most recent backups to keep.
    pub keep: usize,

    /// Always-keep override evaluated against `(name, date)` of every
    /// backup outside the `keep` window.
    pub keep_filter: Option<Box<dyn Fn(&str, NaiveDateTime) -> bool + Send + Sync>>,
}

impl RetentionPolicy {
    /// Policy keeping the `keep` newest backups and nothing else.
    pub fn keep_newest(keep: usize) -> Self {
        Self {
            keep,
            keep_filter: None,
        }
    }

    /// Attach an always-keep override.
    pub fn with_keep_filter(
        mut self,
        filter: impl Fn(&str, NaiveDateTime) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.keep_filter = Some(Box::new(filter));
        self
    }

    /// Whether a backup outside the keep window is claimed by the
    /// always-keep override.
    pub fn always_keep(&self, name: &str, date: NaiveDateTime) -> bool {
        self.keep_filter
            .as_ref()
            .is_some_and(|filter| filter(name, date))
    }
}

impl std::fmt::Debug for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionPolicy")
            .field("keep", &self.keep)
            .field("keep_filter", &self.keep_filter.is_some())
            .finish()
    }
}

/// Stock always-keep override retaining the first backup of every month.
pub fn first_of_month(_name: &str, date: NaiveDateTime) -> bool {
    date.day() == 1
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn keep_newest_has_no_override() {
        let policy = RetentionPolicy::keep_newest(3);
        assert!(!policy.always_keep("any", date(2015, 2, 1)));
    }

    #[test]
    fn first_of_month_claims_only_month_starts() {
        let policy = RetentionPolicy::keep_newest(0).with_keep_filter(first_of_month);

        assert!(policy.always_keep("x", date(2015, 2, 1)));
        assert!(!policy.always_keep("x", date(2015, 2, 2)));
    }
}
