//! Cycle schedule arithmetic and the three schedule operations. All dates
//! are UTC; a cycle runs at midnight of its date.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use tanda_persistence::ConnType;

use crate::db::dao;
use crate::db::dao::GroupDaoError;
use crate::db::model::{CycleFrequency, Group, GroupStatus, PauseReason, ScheduledJob};
use crate::db::DbError;

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Group(#[from] GroupDaoError),
    #[error("Schedule persistence error: {0}")]
    Db(DbError),
}

impl<ErrorType: Into<DbError>> From<ErrorType> for SchedulerError {
    fn from(err: ErrorType) -> Self {
        SchedulerError::Db(err.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Head popped; next tick enqueued for this date.
    Scheduled(NaiveDate),
    /// No cycles left; the group was paused with `AllPaid`.
    AllPaid,
}

pub fn next_date(frequency: CycleFrequency, date: NaiveDate) -> NaiveDate {
    match frequency {
        CycleFrequency::Daily => date + Duration::days(1),
        CycleFrequency::Weekly => date + Duration::days(7),
        CycleFrequency::BiWeekly => date + Duration::days(14),
        CycleFrequency::Monthly => add_months_clamped(date, 1),
    }
}

pub fn build_schedule(first: NaiveDate, frequency: CycleFrequency, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut current = first;
    for _ in 0..count {
        dates.push(current);
        current = next_date(frequency, current);
    }
    dates
}

pub fn run_at(date: NaiveDate) -> NaiveDateTime {
    date.and_hms(0, 0, 0)
}

/// Calendar-month step with the day-of-month clamped to the target month's
/// length, so the 31st schedules on Feb 28 / Apr 30 instead of skipping.
fn add_months_clamped(date: NaiveDate, months: u32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 + months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd(year, month, day)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
                29
            } else {
                28
            }
        }
        _ => unreachable!("month out of range"),
    }
}

/// `start`: populate the schedule (one cycle per member), activate the
/// group and enqueue the first tick. The tick job is due at the cycle date;
/// a first date in the past makes it due immediately.
pub(crate) fn start(
    conn: &ConnType,
    group: &mut Group,
    first_cycle_date: NaiveDate,
    count: usize,
    max_job_attempts: i32,
) -> Result<(), SchedulerError> {
    let cycles = build_schedule(first_cycle_date, group.cycle_frequency, count);
    let encoded = Group::encode_cycles(&cycles);
    let next = run_at(cycles[0]);

    dao::set_schedule(conn, &group.id, Some(next), &encoded)?;
    dao::mark_cycle_started(conn, group)?;
    if group.status == GroupStatus::Initialized {
        dao::update_group_status(conn, group, GroupStatus::Active, None)?;
    }
    group.future_cycles = encoded;
    group.next_cycle_date = Some(next);

    enqueue_tick(conn, &group.id, next, max_job_attempts)?;
    Ok(())
}

/// `advance`: pop the completed cycle's date. An empty remainder means every
/// member has been paid; the group parks as Paused/AllPaid.
pub(crate) fn advance(
    conn: &ConnType,
    group: &mut Group,
    max_job_attempts: i32,
) -> Result<AdvanceOutcome, SchedulerError> {
    let mut cycles = group.future_cycle_dates();
    if !cycles.is_empty() {
        cycles.remove(0);
    }

    if cycles.is_empty() {
        dao::set_schedule(conn, &group.id, None, "[]")?;
        group.future_cycles = "[]".to_string();
        group.next_cycle_date = None;
        dao::pause_group(conn, group, PauseReason::AllPaid)?;
        return Ok(AdvanceOutcome::AllPaid);
    }

    let encoded = Group::encode_cycles(&cycles);
    let next = run_at(cycles[0]);
    dao::set_schedule(conn, &group.id, Some(next), &encoded)?;
    group.future_cycles = encoded;
    group.next_cycle_date = Some(next);

    enqueue_tick(conn, &group.id, next, max_job_attempts)?;
    Ok(AdvanceOutcome::Scheduled(cycles[0]))
}

/// `normalize`: a past-due schedule (typically after a long pause) is moved
/// forward whole periods at a time. Every remaining date shifts by the same
/// number of periods, keeping the sequence strictly increasing.
pub(crate) fn normalize(
    conn: &ConnType,
    group: &mut Group,
    today: NaiveDate,
    max_job_attempts: i32,
) -> Result<Option<NaiveDate>, SchedulerError> {
    let cycles = group.future_cycle_dates();
    let head = match cycles.first() {
        Some(head) => *head,
        None => return Ok(None),
    };

    let mut shifted_head = head;
    let mut shifts = 0usize;
    while shifted_head < today {
        shifted_head = next_date(group.cycle_frequency, shifted_head);
        shifts += 1;
    }

    let normalized: Vec<NaiveDate> = if shifts == 0 {
        cycles
    } else {
        cycles
            .into_iter()
            .map(|mut date| {
                for _ in 0..shifts {
                    date = next_date(group.cycle_frequency, date);
                }
                date
            })
            .collect()
    };

    let encoded = Group::encode_cycles(&normalized);
    let next = run_at(normalized[0]);
    dao::set_schedule(conn, &group.id, Some(next), &encoded)?;
    group.future_cycles = encoded;
    group.next_cycle_date = Some(next);

    enqueue_tick(conn, &group.id, next, max_job_attempts)?;
    Ok(Some(normalized[0]))
}

fn enqueue_tick(
    conn: &ConnType,
    group_id: &str,
    not_before: NaiveDateTime,
    max_job_attempts: i32,
) -> Result<(), SchedulerError> {
    let job = ScheduledJob::cycle_tick(group_id, not_before, max_job_attempts);
    if !dao::enqueue_job(conn, &job)? {
        log::debug!("Cycle tick for group [{}] already enqueued", group_id);
    }
    metrics::counter!("tanda.scheduler.ticks.enqueued", 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekly_schedule_matches_expected_dates() {
        let dates = build_schedule(
            NaiveDate::from_ymd(2025, 1, 6),
            CycleFrequency::Weekly,
            3,
        );
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd(2025, 1, 6),
                NaiveDate::from_ymd(2025, 1, 13),
                NaiveDate::from_ymd(2025, 1, 20),
            ]
        );
    }

    #[test]
    fn daily_and_biweekly_steps() {
        let d = NaiveDate::from_ymd(2025, 3, 1);
        assert_eq!(
            next_date(CycleFrequency::Daily, d),
            NaiveDate::from_ymd(2025, 3, 2)
        );
        assert_eq!(
            next_date(CycleFrequency::BiWeekly, d),
            NaiveDate::from_ymd(2025, 3, 15)
        );
    }

    #[test]
    fn monthly_clamps_day_of_month() {
        assert_eq!(
            next_date(CycleFrequency::Monthly, NaiveDate::from_ymd(2025, 1, 31)),
            NaiveDate::from_ymd(2025, 2, 28)
        );
        assert_eq!(
            next_date(CycleFrequency::Monthly, NaiveDate::from_ymd(2024, 1, 31)),
            NaiveDate::from_ymd(2024, 2, 29)
        );
        assert_eq!(
            next_date(CycleFrequency::Monthly, NaiveDate::from_ymd(2025, 12, 15)),
            NaiveDate::from_ymd(2026, 1, 15)
        );
    }

    #[test]
    fn monthly_schedule_does_not_creep_back() {
        // Once clamped to a short month the day stays clamped; dates remain
        // strictly increasing regardless.
        let dates = build_schedule(
            NaiveDate::from_ymd(2025, 1, 31),
            CycleFrequency::Monthly,
            4,
        );
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd(2025, 1, 31),
                NaiveDate::from_ymd(2025, 2, 28),
                NaiveDate::from_ymd(2025, 3, 28),
                NaiveDate::from_ymd(2025, 4, 28),
            ]
        );
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }
}
