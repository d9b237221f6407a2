//! TimeLine - 「いま学習できるもの / これから来るもの」の派生スナップショット
//!
//! 再計算のたびに丸ごと作り直す（部分更新しない）。
//! 公開は `LiveValue<TimeLine>` 経由で、observer は完成したものしか見ない。

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// One study item in the time line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLineItem {
    pub subject_id: i64,
    pub object: String,
    pub level: i32,
    pub characters: Option<String>,
    pub available_at: Option<DateTime<Utc>>,
    /// Completing this review may trigger a level-up.
    pub level_up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLine {
    /// Top of the hour bucket 0 starts at.
    pub anchor: DateTime<Utc>,
    pub available_lessons: Vec<TimeLineItem>,
    pub available_reviews: Vec<TimeLineItem>,
    /// Review counts per hour, `upcoming[i]` covers `[anchor + i h, anchor + (i+1) h)`.
    pub upcoming: Vec<usize>,
    pub num_long_term_upcoming: usize,
    pub long_term_upcoming_date: Option<DateTime<Utc>>,
}

impl TimeLine {
    /// An empty time line with `size` one-hour buckets.
    pub fn empty(size: usize, now: DateTime<Utc>) -> Self {
        Self {
            anchor: top_of_hour(now),
            available_lessons: Vec::new(),
            available_reviews: Vec::new(),
            upcoming: vec![0; size],
            num_long_term_upcoming: 0,
            long_term_upcoming_date: None,
        }
    }

    pub fn size(&self) -> usize {
        self.upcoming.len()
    }

    /// End of the look-ahead window.
    pub fn cutoff(&self) -> DateTime<Utc> {
        window_cutoff(self.anchor, self.size())
    }

    pub fn add_lesson(&mut self, item: TimeLineItem) {
        self.available_lessons.push(item);
    }

    /// Place a review either in the available-now list or in its hour bucket.
    /// Reviews beyond the window are ignored (long-term counts cover them).
    pub fn add_review(&mut self, item: TimeLineItem, now: DateTime<Utc>) {
        match item.available_at {
            Some(at) if at > now => {
                let offset = at.signed_duration_since(self.anchor).num_hours();
                if let Ok(index) = usize::try_from(offset)
                    && index < self.upcoming.len()
                {
                    self.upcoming[index] += 1;
                }
            }
            _ => self.available_reviews.push(item),
        }
    }

    pub fn has_available_lessons(&self) -> bool {
        !self.available_lessons.is_empty()
    }

    pub fn has_available_reviews(&self) -> bool {
        !self.available_reviews.is_empty()
    }

    pub fn has_upcoming_reviews(&self) -> bool {
        self.upcoming.iter().any(|&n| n > 0)
    }

    /// Reviews that become available later in the current hour.
    pub fn has_reviews_due_this_hour(&self) -> bool {
        self.upcoming.first().is_some_and(|&n| n > 0)
    }

    pub fn num_upcoming(&self) -> usize {
        self.upcoming.iter().sum()
    }

    pub fn num_level_up_reviews(&self) -> usize {
        self.available_reviews.iter().filter(|i| i.level_up).count()
    }
}

pub fn top_of_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(TimeDelta::hours(1)).unwrap_or(t)
}

pub fn window_cutoff(anchor: DateTime<Utc>, size: usize) -> DateTime<Utc> {
    let hours = i64::try_from(size).unwrap_or(i64::MAX / 3600);
    anchor + TimeDelta::hours(hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap()
    }

    fn review(id: i64, at: DateTime<Utc>) -> TimeLineItem {
        TimeLineItem {
            subject_id: id,
            object: "kanji".into(),
            level: 1,
            characters: None,
            available_at: Some(at),
            level_up: false,
        }
    }

    #[test]
    fn empty_time_line_has_nothing() {
        let tl = TimeLine::empty(24, now());
        assert!(!tl.has_available_lessons());
        assert!(!tl.has_available_reviews());
        assert!(!tl.has_upcoming_reviews());
        assert_eq!(tl.long_term_upcoming_date, None);
        assert_eq!(tl.size(), 24);
        assert_eq!(tl.anchor, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn reviews_are_bucketed_by_hour_from_anchor() {
        let mut tl = TimeLine::empty(4, now());
        tl.add_review(review(1, now() - TimeDelta::minutes(5)), now());
        tl.add_review(review(2, now() + TimeDelta::minutes(10)), now());
        tl.add_review(review(3, now() + TimeDelta::minutes(45)), now());
        tl.add_review(review(4, now() + TimeDelta::hours(10)), now());

        assert_eq!(tl.available_reviews.len(), 1);
        assert_eq!(tl.upcoming, vec![1, 1, 0, 0]);
        assert!(tl.has_reviews_due_this_hour());
        assert_eq!(tl.num_upcoming(), 2);
    }

    #[test]
    fn cutoff_is_anchor_plus_size() {
        let tl = TimeLine::empty(24, now());
        assert_eq!(tl.cutoff(), Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap());
    }
}
