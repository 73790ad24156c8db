//! The daily publication time grid: capacity with midnight-wrap handling,
//! and slot enumeration for a given calendar day or horizon.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy)]
pub struct Grid {
    pub start_hour: u32,
    pub end_hour: u32,
    pub step_minutes: u32,
    pub tz: Tz,
    pub instant: bool,
}

impl Grid {
    /// `cap = floor((end - start)/step) + 1`; `end <= start` means the grid
    /// wraps past midnight into the next day.
    pub fn capacity(&self) -> usize {
        let start_min = self.start_hour as i64 * 60;
        let mut end_min = self.end_hour as i64 * 60;
        if end_min <= start_min {
            end_min += 24 * 60;
        }
        ((end_min - start_min) / self.step_minutes.max(1) as i64 + 1) as usize
    }

    /// Every grid slot nominally attached to local calendar date `day`.
    /// Wrapping grids place later slots on `day + 1`.
    pub fn slots_for_day(&self, day: NaiveDate) -> Vec<DateTime<Tz>> {
        let cap = self.capacity();
        let start_total_min = self.start_hour as i64 * 60;
        (0..cap)
            .filter_map(|i| {
                let total_min = start_total_min + i as i64 * self.step_minutes as i64;
                let day_offset = total_min.div_euclid(24 * 60);
                let minute_of_day = total_min.rem_euclid(24 * 60);
                let date = day + Duration::days(day_offset);
                let time = NaiveTime::from_hms_opt((minute_of_day / 60) as u32, (minute_of_day % 60) as u32, 0)?;
                match self.tz.from_local_datetime(&date.and_time(time)) {
                    chrono::LocalResult::Single(dt) => Some(dt),
                    chrono::LocalResult::Ambiguous(dt, _) => Some(dt),
                    chrono::LocalResult::None => None,
                }
            })
            .collect()
    }

    /// The grid's closing boundary for the day containing `local_day`: the
    /// instant after which slots belong to the following calendar day.
    pub fn end_of_day(&self, day: NaiveDate) -> DateTime<Tz> {
        self.slots_for_day(day)
            .last()
            .map(|dt| dt + Duration::minutes(self.step_minutes as i64))
            .unwrap_or_else(|| {
                self.tz
                    .from_local_datetime(&day.and_hms_opt(23, 59, 59).unwrap())
                    .single()
                    .unwrap()
            })
    }

    /// Future slots starting at `from`, spanning up to `max_days` additional
    /// calendar days beyond `from`'s date.
    pub fn collect_slots(&self, from: DateTime<Tz>, max_days: usize) -> Vec<Vec<DateTime<Tz>>> {
        let start_day = from.date_naive();
        (0..=max_days)
            .map(|offset| {
                let day = start_day + Duration::days(offset as i64);
                self.slots_for_day(day)
                    .into_iter()
                    .filter(|dt| *dt >= from)
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(start: u32, end: u32, step: u32) -> Grid {
        Grid {
            start_hour: start,
            end_hour: end,
            step_minutes: step,
            tz: Tz::UTC,
            instant: false,
        }
    }

    #[test]
    fn capacity_without_wrap() {
        assert_eq!(grid(9, 21, 60).capacity(), 13);
    }

    #[test]
    fn capacity_with_midnight_wrap() {
        // 22:00 -> 02:00 next day, step 60: 22,23,0,1,2 = 5 slots.
        assert_eq!(grid(22, 2, 60).capacity(), 5);
    }

    #[test]
    fn wrapping_grid_places_late_slots_next_day() {
        let g = grid(22, 2, 60);
        let day = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        let slots = g.slots_for_day(day);
        assert_eq!(slots.len(), 5);
        assert_eq!(slots.last().unwrap().date_naive(), day + Duration::days(1));
    }
}
