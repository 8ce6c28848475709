// src/aggregation.rs
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashSet;

use crate::period::Period;
use crate::zoho_client::Absence;

/// Number of day slots on the form, independent of month length.
pub const DAY_SLOTS: u32 = 31;

/// Code written into a day slot not covered by any absence.
pub const FILL_CODE: char = 'C';

// --- Deduplication ---

/// Keeps the first occurrence of every `(deal, start, end)` key in input order.
/// Absences without a deal reference are never considered duplicates.
pub fn dedupe_absences(absences: &[Absence]) -> Vec<Absence> {
    let mut seen: HashSet<(&str, Option<NaiveDate>, Option<NaiveDate>)> = HashSet::new();
    absences
        .iter()
        .filter(|absence| match absence.deal_id() {
            Some(deal_id) => seen.insert((deal_id, absence.start_date, absence.end_date)),
            None => true,
        })
        .cloned()
        .collect()
}

// --- Overlap counting ---

/// Inclusive day count of `absence` clipped to `[start, end]`. Zero when a
/// boundary is missing or the clipped range is empty.
pub fn overlap_days(absence: &Absence, start: NaiveDate, end: NaiveDate) -> i64 {
    let (Some(absence_start), Some(absence_end)) = (absence.start_date, absence.end_date) else {
        return 0;
    };
    let clipped_start = absence_start.max(start);
    let clipped_end = absence_end.min(end);
    ((clipped_end - clipped_start).num_days() + 1).max(0)
}

/// Sum of the overlap of every absence with the period. Overlapping absences
/// are counted once each.
pub fn total_overlap_days(absences: &[Absence], period: &Period) -> i64 {
    absences
        .iter()
        .map(|absence| overlap_days(absence, period.start, period.end))
        .sum()
}

// --- Day assignment ---

#[derive(Debug, Clone, PartialEq)]
pub struct DaySlot<'a> {
    pub day: u32,
    pub date: NaiveDate,
    pub absence: Option<&'a Absence>,
}

fn covers(absence: &Absence, date: NaiveDate) -> bool {
    match (absence.start_date, absence.end_date) {
        (Some(start), Some(end)) => start <= date && date <= end,
        _ => false,
    }
}

/// One slot per day 1..=31 starting at `period_start`, each holding the first
/// absence covering that date. Slots past month end roll into the next month.
pub fn day_assignment(absences: &[Absence], period_start: NaiveDate) -> Vec<DaySlot<'_>> {
    (1..=DAY_SLOTS)
        .map(|day| {
            let date = period_start + Duration::days(i64::from(day) - 1);
            DaySlot {
                day,
                date,
                absence: absences.iter().find(|absence| covers(absence, date)),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayEntry {
    pub day: u32,
    pub value: char,
}

fn reason_code(absence: &Absence) -> Option<char> {
    absence.reason.as_deref().and_then(|reason| reason.chars().next())
}

pub fn day_codes(slots: &[DaySlot<'_>]) -> Vec<DayEntry> {
    slots
        .iter()
        .map(|slot| DayEntry {
            day: slot.day,
            value: slot.absence.and_then(reason_code).unwrap_or(FILL_CODE),
        })
        .collect()
}
