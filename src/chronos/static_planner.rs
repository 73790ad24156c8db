//! Legacy static planner: earliest free grid slot per queued post, and the
//! config-change "collapse" rebuild.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::chronos::grid::Grid;
use crate::chronos::planner::{Assignment, PlanResult};
use crate::errors::ChronosError;
use crate::store::PostStore;

/// Picks the earliest grid slot, from `now`, not already present in
/// `booked`, advancing day-by-day until one is found.
fn next_free_slot(grid: &Grid, now: DateTime<Utc>, booked: &HashSet<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let now_tz = now.with_timezone(&grid.tz);
    for day_offset in 0..400 {
        let day = now_tz.date_naive() + chrono::Duration::days(day_offset);
        for slot in grid.slots_for_day(day) {
            let slot_utc = slot.with_timezone(&Utc);
            if slot_utc < now {
                continue;
            }
            if !booked.contains(&slot_utc) {
                return Some(slot_utc);
            }
        }
    }
    None
}

/// Assigns each new queue row (not yet scheduled) to the earliest grid slot
/// not already taken by another scheduled post.
pub async fn run_static(
    store: &dyn PostStore,
    grid: &Grid,
    now: DateTime<Utc>,
) -> Result<PlanResult, ChronosError> {
    let queue = store.list_scheduled().await?;
    let mut booked: HashSet<DateTime<Utc>> = store.scheduled_timestamps().await?.into_iter().collect();

    let mut pending: Vec<_> = queue
        .into_iter()
        .filter(|p| p.scheduled_at.is_none())
        .collect();
    pending.sort_by_key(|p| (p.approved_at.unwrap_or(p.created_at), p.id));

    let mut assignments = Vec::new();
    for p in pending {
        let Some(slot) = next_free_slot(grid, now, &booked) else {
            break;
        };
        booked.insert(slot);
        assignments.push(Assignment {
            post_id: p.id,
            scheduled_at: slot,
        });
    }
    Ok(PlanResult { assignments })
}

/// Rebuild/collapse: walk the full queue in `(approved_at, id)` order,
/// reassigning every row to the next free grid slot from `now`, ignoring
/// prior assignments — the rebuild-on-config-change behaviour.
pub async fn collapse(store: &dyn PostStore, grid: &Grid, now: DateTime<Utc>) -> Result<PlanResult, ChronosError> {
    let mut queue = store.list_scheduled().await?;
    queue.sort_by_key(|p| (p.approved_at.unwrap_or(p.created_at), p.id));

    let mut booked: HashSet<DateTime<Utc>> = HashSet::new();
    let mut assignments = Vec::new();
    for p in queue {
        let Some(slot) = next_free_slot(grid, now, &booked) else {
            break;
        };
        booked.insert(slot);
        assignments.push(Assignment {
            post_id: p.id,
            scheduled_at: slot,
        });
    }
    Ok(PlanResult { assignments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    #[test]
    fn next_free_slot_skips_booked_timestamps() {
        let grid = Grid {
            start_hour: 9,
            end_hour: 21,
            step_minutes: 60,
            tz: Tz::UTC,
            instant: false,
        };
        let now = Utc::now();
        let first = next_free_slot(&grid, now, &HashSet::new()).unwrap();
        let mut booked = HashSet::new();
        booked.insert(first);
        let second = next_free_slot(&grid, now, &booked).unwrap();
        assert_ne!(first, second);
    }
}
