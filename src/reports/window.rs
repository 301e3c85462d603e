use chrono::{Datelike, Days, Months, NaiveDate};

use super::{ReportKind, ReportWindow};
use crate::errors::ReportError;

/// Window covering exactly `date`.
pub fn daily(date: NaiveDate) -> ReportWindow {
    ReportWindow::new_unchecked(date, date, ReportKind::Daily)
}

/// Seven-day window starting on `week_start`.
pub fn weekly(week_start: NaiveDate) -> Result<ReportWindow, ReportError> {
    let end = week_start.checked_add_days(Days::new(6)).ok_or_else(|| {
        ReportError::InvalidPeriod(format!("week starting {} runs past the calendar", week_start))
    })?;
    Ok(ReportWindow::new_unchecked(week_start, end, ReportKind::Weekly))
}

/// Calendar month `month` (1-12) of `year`.
pub fn monthly(year: i32, month: u32) -> Result<ReportWindow, ReportError> {
    let invalid = || ReportError::InvalidPeriod(format!("no such month: {}-{:02}", year, month));

    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    // Last day is the first of the next month minus one day.
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(invalid)?;

    Ok(ReportWindow::new_unchecked(start, end, ReportKind::Monthly))
}

/// Arbitrary inclusive range. Rejected before any data access when `start > end`.
pub fn custom(start: NaiveDate, end: NaiveDate) -> Result<ReportWindow, ReportError> {
    if start > end {
        return Err(ReportError::InvalidRange { start, end });
    }
    Ok(ReportWindow::new_unchecked(start, end, ReportKind::Custom))
}

/// Monday-anchored week containing `date`.
pub fn week_containing(date: NaiveDate) -> Result<ReportWindow, ReportError> {
    let offset = u64::from(date.weekday().num_days_from_monday());
    let monday = date.checked_sub_days(Days::new(offset)).ok_or_else(|| {
        ReportError::InvalidPeriod(format!("week containing {} starts before the calendar", date))
    })?;
    weekly(monday)
}
