//! Load forecasting and target-posts-per-day smoothing.

use crate::mnemosyne::math::{ewma, sigmoid};

/// Blend of long-term (14-day, α=1/14) and short-term (3-day, α=1/3) EWMAs
/// over a chronological, oldest-first approval-count vector.
pub fn lambda_pred(history: &[f64]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let long = ewma(history, 1.0 / 14.0);
    let recent_start = history.len().saturating_sub(3);
    let short = ewma(&history[recent_start..], 1.0 / 3.0);
    0.7 * short + 0.3 * long
}

/// `n_soft + (cap - n_softmax) * boost`, floored at `lambda_pred`.
pub fn n_day_target(queue_depth: usize, cap: usize, w_eff_hours: f64, lambda_pred: f64) -> f64 {
    let n_softmax = (10usize).min(cap.max(1)) as f64;
    let n_soft = 1.0
        + (n_softmax - 1.0) * sigmoid((queue_depth as f64 - n_softmax) / (0.25 * n_softmax).max(1e-9));
    let boost = sigmoid((w_eff_hours - 22.0) / 2.5);
    let target = n_soft + (cap as f64 - n_softmax) * boost;
    target.max(lambda_pred)
}

/// Cross-invocation smoothing with `β=0.3`, clamped to `[1, min(Q, cap)]`.
pub fn smooth_n_day(last_plan: f64, n_day_target: f64, queue_depth: usize, cap: usize) -> f64 {
    const BETA: f64 = 0.3;
    let n_plan = (1.0 - BETA) * last_plan + BETA * n_day_target;
    let upper = queue_depth.min(cap).max(1) as f64;
    n_plan.round().clamp(1.0, upper)
}

/// `n_today`: today's slot-aware target, blended toward the raw queue pull
/// as the queue empties.
pub fn n_today(slots_today_remaining: usize, cap: usize, n_day: f64, queue_depth: usize) -> usize {
    if slots_today_remaining == 0 {
        return 0;
    }
    let r = slots_today_remaining as f64 / cap.max(1) as f64;
    let g_today = sigmoid((r - 0.35) / 0.10);
    let n_today_base = (slots_today_remaining as f64).min((n_day * g_today).round());

    let pull = sigmoid((12.0 - queue_depth as f64) / 3.0);
    let pull_target = (queue_depth.min(slots_today_remaining).min(cap)) as f64;
    let mut n = (n_today_base * (1.0 - pull) + pull_target * pull).round() as i64;

    if n == 0 && queue_depth > 0 && slots_today_remaining > 0 {
        n = 1;
    }
    n.max(0) as usize
}

/// `H = 0.25 + 6.75 * σ((Q - 20)/10)`; scanned as `ceil(H) + 2` days.
pub fn horizon_days(queue_depth: usize) -> usize {
    let h = 0.25 + 6.75 * sigmoid((queue_depth as f64 - 20.0) / 10.0);
    h.ceil() as usize + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lambda_pred_of_flat_history_equals_that_value() {
        let history = vec![3.0; 14];
        assert!((lambda_pred(&history) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn n_day_target_saturates_near_softmax_for_heavy_queue() {
        let target = n_day_target(20, 9, 10.0, 0.0);
        assert!(target > 8.0 && target <= 9.0);
    }

    #[test]
    fn n_today_is_forced_to_one_when_queue_nonempty() {
        let n = n_today(3, 9, 0.01, 2);
        assert!(n >= 1);
    }

    #[test]
    fn horizon_grows_with_queue_depth() {
        assert!(horizon_days(50) > horizon_days(0));
    }
}
