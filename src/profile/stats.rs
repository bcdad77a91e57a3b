//! Daily streak and check-in counters derived from the analysis history.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::profile::model::{HealthStats, ProfileFields, UserProfile};
use crate::store::ProfileStore;

/// Count consecutive calendar days, ending `today`, that have a check-in.
///
/// Entries are walked most recent first. An entry on the expected day
/// extends the streak and moves the expected day back by one; more entries
/// on a day already counted are skipped; any other day ends the walk.
/// Days are compared as calendar dates produced by `to_day`, never by
/// subtracting durations, so DST shifts and month ends don't matter.
pub fn compute_streak<F>(today: NaiveDate, check_ins: &[DateTime<Utc>], to_day: F) -> u32
where
    F: Fn(&DateTime<Utc>) -> NaiveDate,
{
    let mut days: Vec<NaiveDate> = check_ins.iter().map(&to_day).collect();
    days.sort_unstable_by(|a, b| b.cmp(a));

    let mut streak = 0;
    let mut expected = today;
    let mut last_counted: Option<NaiveDate> = None;

    for day in days {
        if Some(day) == last_counted {
            continue;
        }
        if day != expected {
            break;
        }
        streak += 1;
        last_counted = Some(day);
        expected = match expected.pred_opt() {
            Some(prev) => prev,
            None => break,
        };
    }

    streak
}

/// Derive stats from the profile's full analysis history.
pub fn compute_stats(profile: &UserProfile, clock: &dyn Clock) -> HealthStats {
    let check_ins: Vec<DateTime<Utc>> = profile
        .analysis_history
        .iter()
        .map(|r| r.created_at)
        .collect();

    HealthStats {
        streak_days: compute_streak(clock.today(), &check_ins, |ts| clock.local_day(ts)),
        total_check_ins: saturating_count(check_ins.len()),
        last_check_in: check_ins.iter().max().copied(),
    }
}

fn saturating_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Re-read the profile, recompute its stats, and write them back.
///
/// Always works from a fresh read so a concurrent append is never lost to a
/// stale snapshot.
pub async fn recompute_stats(
    store: &dyn ProfileStore,
    user_id: &str,
    clock: &dyn Clock,
) -> Result<HealthStats, StoreError> {
    let profile = store.read_profile(user_id).await?;
    let stats = compute_stats(&profile, clock);

    store
        .update_fields(
            user_id,
            &ProfileFields {
                health_stats: Some(stats.clone()),
                ..Default::default()
            },
        )
        .await?;

    debug!(
        user_id,
        streak = stats.streak_days,
        total = stats.total_check_ins,
        "Health stats recomputed"
    );
    Ok(stats)
}
