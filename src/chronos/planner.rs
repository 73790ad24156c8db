//! Dynamic planner: forecasts daily load, derives today's and future days'
//! targets, and assigns queued posts to grid slots by a fairness priority
//! function.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::chronos::forecast;
use crate::chronos::grid::Grid;
use crate::chronos::static_planner;
use crate::errors::{ChronosError, StoreError};
use crate::settings::ChronosMode;
use crate::store::{Post, PostStatus, PostStore};

const LAST_PLAN_SETTING: &str = "chronos_last_plan";
const APPROVAL_HISTORY_DAYS: u32 = 14;
const RECENT_AUTHOR_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct Assignment {
    pub post_id: i64,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanResult {
    pub assignments: Vec<Assignment>,
}

fn priority(t_hours: f64, pending: u32, recent: u32) -> f64 {
    (1.0 + t_hours.max(0.0)).ln() / (1.0 + (1.0 + pending as f64).ln()) - 0.3 * recent as f64
}

/// Runs the full dynamic planning pass. Returns `None` when the queue is
/// empty — there is nothing to schedule.
pub async fn run_dynamic(
    store: &dyn PostStore,
    grid: &Grid,
    now: DateTime<Utc>,
) -> Result<Option<PlanResult>, ChronosError> {
    let mut queue = store.list_scheduled().await?;
    if queue.is_empty() {
        return Ok(None);
    }
    queue.sort_by_key(|p| (p.approved_at.unwrap_or(p.created_at), p.id));

    if grid.instant {
        return Ok(Some(run_instant(&queue, now)));
    }

    let q = queue.len();
    let oldest_ts = queue
        .iter()
        .map(|p| p.approved_at.unwrap_or(p.created_at))
        .min()
        .unwrap_or(now);
    let w_hours = (now - oldest_ts).num_seconds() as f64 / 3600.0;

    let mut pending_by_author: HashMap<i64, u32> = HashMap::new();
    for p in &queue {
        *pending_by_author.entry(p.author_id).or_insert(0) += 1;
    }
    let max_pending = pending_by_author.values().copied().max().unwrap_or(1);
    let w_eff = w_hours / (1.0 + (1.0 + max_pending as f64).ln());

    let history = store.approvals_history(APPROVAL_HISTORY_DAYS).await?;
    let mut history_values: Vec<f64> = history.iter().map(|t| t.count as f64).collect();
    while history_values.len() < APPROVAL_HISTORY_DAYS as usize {
        history_values.insert(0, 0.0);
    }
    let lambda = forecast::lambda_pred(&history_values);

    let cap = grid.capacity();
    let n_day_target_val = forecast::n_day_target(q, cap, w_eff, lambda);

    let last_plan_val = match store.get_setting(LAST_PLAN_SETTING).await? {
        Some(raw) => raw.parse::<f64>().unwrap_or(n_day_target_val),
        None => n_day_target_val,
    };
    let n_day = forecast::smooth_n_day(last_plan_val, n_day_target_val, q, cap);
    store
        .set_setting(LAST_PLAN_SETTING, &n_day.to_string())
        .await?;

    let now_tz = now.with_timezone(&grid.tz);
    let today = now_tz.date_naive();
    let slots_today_remaining = grid
        .slots_for_day(today)
        .into_iter()
        .filter(|s| *s >= now_tz)
        .count();
    let n_today = forecast::n_today(slots_today_remaining, cap, n_day, q);

    let horizon = forecast::horizon_days(q);
    let daily_target_next = (1usize).max(cap.min(n_day_target_val.round() as usize));

    let day_slot_lists = grid.collect_slots(now_tz, horizon);
    let mut selected_slots: Vec<DateTime<Utc>> = Vec::new();
    for (day_idx, day_slots) in day_slot_lists.iter().enumerate() {
        let allowed = if day_idx == 0 { n_today } else { daily_target_next };
        selected_slots.extend(
            pick_evenly_spaced(day_slots, allowed)
                .into_iter()
                .map(|dt| dt.with_timezone(&Utc)),
        );
    }

    let candidate_window_size = 30.max(3 * daily_target_next);
    let recent_seed = store.recent_publication_authors(RECENT_AUTHOR_WINDOW).await?;
    let mut recent_window: VecDeque<i64> = recent_seed.into_iter().collect();

    let mut last_author = recent_window.back().copied();
    let mut last_published: HashMap<i64, DateTime<Utc>> = HashMap::new();
    for p in &queue {
        if let Some(last) = store.last_published_at(p.author_id).await? {
            last_published.entry(p.author_id).or_insert(last);
        }
    }

    let mut remaining: Vec<Post> = queue;
    let mut assignments = Vec::new();

    for slot in selected_slots {
        if remaining.is_empty() {
            break;
        }
        let window: Vec<usize> = (0..remaining.len().min(candidate_window_size)).collect();
        let authors_in_window: HashSet<i64> =
            window.iter().map(|&i| remaining[i].author_id).collect();

        let usable: Vec<usize> = if authors_in_window.len() > 1 {
            window
                .into_iter()
                .filter(|&i| Some(remaining[i].author_id) != last_author)
                .collect()
        } else {
            window
        };
        if usable.is_empty() {
            continue;
        }

        let mut best_author: Option<i64> = None;
        let mut best_score = f64::NEG_INFINITY;
        for &i in &usable {
            let author = remaining[i].author_id;
            let t_hours = last_published
                .get(&author)
                .map(|ts| (slot - *ts).num_seconds() as f64 / 3600.0)
                .unwrap_or(1000.0);
            let pending = pending_by_author.get(&author).copied().unwrap_or(1);
            let recent = recent_window.iter().filter(|&&a| a == author).count() as u32;
            let score = priority(t_hours, pending, recent);
            if score > best_score {
                best_score = score;
                best_author = Some(author);
            }
        }

        let Some(author) = best_author else { continue };
        let row_idx = usable
            .iter()
            .copied()
            .find(|&i| remaining[i].author_id == author)
            .unwrap_or(0);
        let row = remaining.remove(row_idx);

        if let Some(count) = pending_by_author.get_mut(&author) {
            *count = count.saturating_sub(1);
        }
        recent_window.push_back(author);
        if recent_window.len() > RECENT_AUTHOR_WINDOW {
            recent_window.pop_front();
        }
        last_author = Some(author);
        last_published.insert(author, slot);

        assignments.push(Assignment {
            post_id: row.id,
            scheduled_at: slot,
        });
    }

    Ok(Some(PlanResult { assignments }))
}

/// Evenly spaced index selection within a day's slot list: `step =
/// len/allowed`, `{floor(i*step)}` uniquified.
fn pick_evenly_spaced<T: Clone>(slots: &[T], allowed: usize) -> Vec<T> {
    if allowed == 0 || slots.is_empty() {
        return Vec::new();
    }
    let step = slots.len() as f64 / allowed as f64;
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for i in 0..allowed {
        let idx = ((i as f64) * step).floor() as usize;
        let idx = idx.min(slots.len() - 1);
        if seen.insert(idx) {
            out.push(slots[idx].clone());
        }
    }
    out
}

/// Instant mode: `now, now+1s, now+2s, ...` regardless of the grid.
fn run_instant(queue: &[Post], now: DateTime<Utc>) -> PlanResult {
    let assignments = queue
        .iter()
        .enumerate()
        .map(|(i, p)| Assignment {
            post_id: p.id,
            scheduled_at: now + chrono::Duration::seconds(i as i64),
        })
        .collect();
    PlanResult { assignments }
}

/// Applies a computed plan to the store, one row at a time; assignments are
/// applied one-by-one and are idempotent if re-derived.
pub async fn apply_plan(store: &dyn PostStore, plan: &PlanResult) -> Result<(), ChronosError> {
    for a in &plan.assignments {
        store.set_scheduled_at(a.post_id, a.scheduled_at).await?;
    }
    Ok(())
}

/// Approves a pending post and immediately replans the queue around it.
///
/// Moves the post from `pending` to `scheduled`, stamping `approved_at`.
/// The approval tally only advances on a post's first approval, so a
/// reschedule (re-approving an already-scheduled post) does not inflate the
/// forecast a second time.
pub async fn on_approval(
    store: &dyn PostStore,
    grid: &Grid,
    mode: ChronosMode,
    post_id: i64,
    now: DateTime<Utc>,
) -> Result<(), ChronosError> {
    let post = store
        .get_post(post_id)
        .await?
        .ok_or_else(|| ChronosError::Store(StoreError::PostNotFound(post_id)))?;
    if post.status != PostStatus::Pending {
        return Err(ChronosError::NotPending(post_id));
    }

    if post.approved_at.is_none() {
        store.increment_approval(now.date_naive()).await?;
    }
    store
        .set_post_status(post_id, PostStatus::Scheduled, post.scheduled_at, Some(now), post.published_at)
        .await?;

    match mode {
        ChronosMode::Dynamic => {
            if let Some(plan) = run_dynamic(store, grid, now).await? {
                apply_plan(store, &plan).await?;
            }
        }
        ChronosMode::Static => {
            let plan = static_planner::run_static(store, grid, now).await?;
            if !plan.assignments.is_empty() {
                apply_plan(store, &plan).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rewards_long_wait_and_penalizes_recent_author() {
        let fresh = priority(1000.0, 1, 0);
        let recent = priority(1000.0, 1, 3);
        assert!(fresh > recent);
    }

    #[test]
    fn evenly_spaced_selection_is_bounded_by_allowed() {
        let slots: Vec<i32> = (0..20).collect();
        let out = pick_evenly_spaced(&slots, 4);
        assert!(out.len() <= 4);
    }

    #[test]
    fn instant_mode_spaces_assignments_by_one_second() {
        let now = Utc::now();
        let queue = vec![
            Post {
                id: 1,
                status: crate::store::PostStatus::Scheduled,
                author_id: 1,
                created_at: now,
                approved_at: Some(now),
                scheduled_at: None,
                published_at: None,
                caption: None,
                media: crate::store::MediaDescriptor {
                    kind: crate::store::MediaKind::Photo,
                    items: vec![],
                },
                duplicate_info: None,
                channel_message_id: None,
                notified_status: None,
            },
        ];
        let plan = run_instant(&queue, now);
        assert_eq!(plan.assignments[0].scheduled_at, now);
    }

    #[tokio::test]
    async fn on_approval_schedules_and_tallies_once() {
        use crate::store::sqlite::SqliteStore;
        use crate::store::{MediaDescriptor, MediaKind};

        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let post = Post {
            id: 0,
            status: crate::store::PostStatus::Pending,
            author_id: 1,
            created_at: now,
            approved_at: None,
            scheduled_at: None,
            published_at: None,
            caption: None,
            media: MediaDescriptor {
                kind: MediaKind::Photo,
                items: vec![],
            },
            duplicate_info: None,
            channel_message_id: None,
            notified_status: None,
        };
        let id = store.upsert_post(&post).await.unwrap();

        let grid = Grid {
            start_hour: 9,
            end_hour: 21,
            step_minutes: 60,
            tz: chrono_tz::Tz::UTC,
            instant: true,
        };
        on_approval(&store, &grid, ChronosMode::Dynamic, id, now).await.unwrap();

        let loaded = store.get_post(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, crate::store::PostStatus::Scheduled);
        assert!(loaded.approved_at.is_some());
        assert!(loaded.scheduled_at.is_some());

        let history = store.approvals_history(1).await.unwrap();
        assert_eq!(history.iter().map(|t| t.count).sum::<u32>(), 1);

        let err = on_approval(&store, &grid, ChronosMode::Dynamic, id, now).await.unwrap_err();
        assert!(matches!(err, ChronosError::NotPending(_)));
    }
}
