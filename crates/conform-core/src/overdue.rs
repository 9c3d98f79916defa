use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::{CoreError, Followup, FollowupStatus};

/// A pending followup whose due date lies before the calendar day of `now` (UTC).
///
/// Derived on every read and never persisted. Being overdue does not change which
/// transitions are legal.
pub fn is_overdue(followup: &Followup, now: DateTime<Utc>) -> bool {
    followup.status == FollowupStatus::Pending && followup.due_date < now.date_naive()
}

/// Days left until the due date; negative once it has passed.
pub fn days_until_due(followup: &Followup, today: NaiveDate) -> i64 {
    (followup.due_date - today).num_days()
}

pub fn validate_due_date(due_date: NaiveDate, today: NaiveDate) -> Result<(), CoreError> {
    if due_date < today {
        return Err(CoreError::InvalidDueDate { due_date, today });
    }
    Ok(())
}

/// Due date used when the creating staff member does not pick one.
pub fn default_due_date(today: NaiveDate, days: u32) -> NaiveDate {
    today + Duration::days(i64::from(days))
}

/// Reporting summary over a set of followups.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct FollowupStats {
    pub by_status: BTreeMap<FollowupStatus, usize>,
    pub overdue: usize,
    pub total: usize,
}

impl FollowupStats {
    pub fn collect(followups: &[Followup], now: DateTime<Utc>) -> Self {
        let mut stats = Self::default();
        for f in followups {
            *stats.by_status.entry(f.status).or_default() += 1;
            if is_overdue(f, now) {
                stats.overdue += 1;
            }
            stats.total += 1;
        }
        stats
    }

    pub fn count(&self, status: FollowupStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CriteriaId, EvaluationId, FollowupId, InstitutionId, UserId};
    use chrono::TimeZone;

    fn followup(status: FollowupStatus, due: NaiveDate) -> Followup {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Followup {
            id: FollowupId::new(),
            evaluation_id: EvaluationId::from_str("ev"),
            criteria_result_id: CriteriaId::from_str("ACC-01"),
            institution_id: InstitutionId::from_str("inst"),
            status,
            due_date: due,
            notes: None,
            corrected_at: None,
            validation_notes: None,
            created_by: UserId::from_str("u"),
            created_at: at,
            updated_at: at,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn pending_past_due_is_overdue() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        assert!(is_overdue(&followup(FollowupStatus::Pending, date(2025, 3, 9)), now));
        assert!(!is_overdue(&followup(FollowupStatus::Pending, date(2025, 3, 10)), now));
        assert!(!is_overdue(&followup(FollowupStatus::Pending, date(2025, 3, 11)), now));
    }

    #[test]
    fn only_pending_can_be_overdue() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        for status in FollowupStatus::ALL {
            let f = followup(status, date(2024, 1, 1));
            assert_eq!(is_overdue(&f, now), status == FollowupStatus::Pending);
        }
    }

    #[test]
    fn overdue_check_is_stable_and_read_only() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let f = followup(FollowupStatus::Pending, date(2025, 3, 1));
        let before = f.clone();
        let first = is_overdue(&f, now);
        for _ in 0..3 {
            assert_eq!(is_overdue(&f, now), first);
        }
        assert_eq!(f, before);
    }

    #[test]
    fn days_until_due_goes_negative() {
        let f = followup(FollowupStatus::Pending, date(2025, 3, 10));
        assert_eq!(days_until_due(&f, date(2025, 3, 7)), 3);
        assert_eq!(days_until_due(&f, date(2025, 3, 12)), -2);
    }

    #[test]
    fn stats_count_statuses_and_overdue() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let fs = vec![
            followup(FollowupStatus::Pending, date(2025, 3, 1)),
            followup(FollowupStatus::Pending, date(2025, 4, 1)),
            followup(FollowupStatus::Corrected, date(2025, 3, 1)),
        ];
        let stats = FollowupStats::collect(&fs, now);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count(FollowupStatus::Pending), 2);
        assert_eq!(stats.count(FollowupStatus::Validated), 0);
        assert_eq!(stats.overdue, 1);
    }

    #[test]
    fn default_due_date_adds_days() {
        assert_eq!(default_due_date(date(2025, 1, 30), 30), date(2025, 3, 1));
    }
}
