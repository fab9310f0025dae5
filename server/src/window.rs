// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use chrono::{Days, NaiveDate, NaiveDateTime};
use common::TaskRange;

/// Number of days before today that are still editable.
pub const EDITABLE_DAYS_BACK: u64 = 14;

/// The rolling range of calendar days inside which tasks may be mutated.
///
/// Both bounds are inclusive: today plus the 14 days before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl EditWindow {
    /// Computes the window for the calendar day of `now`.
    pub fn at(now: NaiveDateTime) -> Self {
        let end = now.date();
        // Only fails at the very start of chrono's supported range.
        let start = end
            .checked_sub_days(Days::new(EDITABLE_DAYS_BACK))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn as_range(&self) -> TaskRange {
        TaskRange {
            from_date: self.start,
            to_date: self.end,
        }
    }
}

/// Shorthand for `EditWindow::at(now).contains(date)`.
pub fn is_in_window(date: NaiveDate, now: NaiveDateTime) -> bool {
    EditWindow::at(now).contains(date)
}
