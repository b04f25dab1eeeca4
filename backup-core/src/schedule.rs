//! 计划的执行时间计算
//!
//! 所有时间均按 UTC 计算。

use crate::models::{BackupSchedule, Frequency, NewSchedule};
use crate::{BackupError, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// 计划的重复规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recurrence {
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    /// 0 = 周日
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
}

impl From<&BackupSchedule> for Recurrence {
    fn from(schedule: &BackupSchedule) -> Self {
        Self {
            frequency: schedule.frequency,
            time_of_day: schedule.time_of_day,
            day_of_week: schedule.day_of_week,
            day_of_month: schedule.day_of_month,
        }
    }
}

impl From<&NewSchedule> for Recurrence {
    fn from(schedule: &NewSchedule) -> Self {
        Self {
            frequency: schedule.frequency,
            time_of_day: schedule.time_of_day,
            day_of_week: schedule.day_of_week,
            day_of_month: schedule.day_of_month,
        }
    }
}

impl Recurrence {
    /// `now` 所在周期内的执行时刻
    ///
    /// hourly: 当前小时整点；daily: 当天；weekly: 当前 ISO 周内的指定星期；
    /// monthly: 当月指定日期，短月取最后一天。
    pub fn slot_in_period(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let today = now.date_naive();
        let slot = match self.frequency {
            Frequency::Hourly => at_time(today, NaiveTime::from_hms_opt(now.hour(), 0, 0))?,
            Frequency::Daily => at_time(today, Some(self.time_of_day))?,
            Frequency::Weekly => {
                let target = (self.day_of_week.unwrap_or(0) % 7 + 6) % 7;
                let offset = i64::from(today.weekday().num_days_from_monday());
                let monday = today - Duration::days(offset);
                at_time(monday + Duration::days(i64::from(target)), Some(self.time_of_day))?
            }
            Frequency::Monthly => {
                let day = self.day_of_month.unwrap_or(1);
                let date = clamped_date(today.year(), today.month(), day)?;
                at_time(date, Some(self.time_of_day))?
            }
        };
        Ok(slot)
    }

    /// 严格晚于 `now` 的下一个执行时刻
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let slot = self.slot_in_period(now)?;
        if slot > now {
            return Ok(slot);
        }

        let next = match self.frequency {
            Frequency::Hourly => slot + Duration::hours(1),
            Frequency::Daily => slot + Duration::days(1),
            Frequency::Weekly => slot + Duration::weeks(1),
            Frequency::Monthly => {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                let date = clamped_date(year, month, self.day_of_month.unwrap_or(1))?;
                at_time(date, Some(self.time_of_day))?
            }
        };
        Ok(next)
    }

    /// 用于列表展示的频率说明
    pub fn label(&self) -> String {
        let time = self.time_of_day.format("%H:%M");
        match self.frequency {
            Frequency::Hourly => "Every Hour".to_string(),
            Frequency::Daily => format!("Daily at {time}"),
            Frequency::Weekly => {
                let day = self.day_of_week.unwrap_or(0) as usize % 7;
                format!("Weekly on {} at {time}", WEEKDAY_NAMES[day])
            }
            Frequency::Monthly => {
                format!("Monthly on day {} at {time}", self.day_of_month.unwrap_or(1))
            }
        }
    }
}

/// 计划是否到期
///
/// 需要同时满足: 处于启用状态、`next_run_at` 已到 (未设置视为已到)、当前周期的执行时刻已到。
pub fn is_due(schedule: &BackupSchedule, now: DateTime<Utc>) -> bool {
    if !schedule.is_active {
        return false;
    }
    if schedule.next_run_at.is_some_and(|next| next > now) {
        return false;
    }
    Recurrence::from(schedule)
        .slot_in_period(now)
        .is_ok_and(|slot| slot <= now)
}

fn at_time(date: NaiveDate, time: Option<NaiveTime>) -> Result<DateTime<Utc>> {
    time.map(|t| date.and_time(t).and_utc())
        .ok_or_else(|| BackupError::custom(format!("无法计算 {date} 的执行时间")))
}

fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
}

/// 指定日期，超过当月天数时取最后一天
fn clamped_date(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    last_day_of_month(year, month)
        .and_then(|last| NaiveDate::from_ymd_opt(year, month, day.clamp(1, last)))
        .ok_or_else(|| BackupError::custom(format!("无效的日期 {year}-{month}-{day}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackupTarget, DatabaseEngine, RetentionPolicy};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn rule(frequency: Frequency, time: &str) -> Recurrence {
        Recurrence {
            frequency,
            time_of_day: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
            day_of_week: None,
            day_of_month: None,
        }
    }

    fn schedule(recurrence: Recurrence, next_run_at: Option<DateTime<Utc>>) -> BackupSchedule {
        BackupSchedule {
            id: 1,
            project_id: "shop".to_string(),
            server_id: "web-1".to_string(),
            target: BackupTarget::Database(DatabaseEngine::Mysql),
            target_name: Some("shop".to_string()),
            frequency: recurrence.frequency,
            time_of_day: recurrence.time_of_day,
            day_of_week: recurrence.day_of_week,
            day_of_month: recurrence.day_of_month,
            retention: RetentionPolicy::Days(7),
            storage: "local".to_string(),
            incremental: false,
            is_active: true,
            next_run_at,
            last_run_at: None,
            created_at: at(2025, 1, 1, 0, 0),
        }
    }

    #[test]
    fn test_hourly_runs_on_the_hour() {
        let next = rule(Frequency::Hourly, "10:00")
            .next_after(at(2025, 1, 15, 8, 17))
            .unwrap();
        assert_eq!(next, at(2025, 1, 15, 9, 0));
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_daily_next_is_strictly_after_now() {
        let daily = rule(Frequency::Daily, "10:00");
        assert_eq!(daily.next_after(at(2025, 1, 15, 8, 0)).unwrap(), at(2025, 1, 15, 10, 0));
        assert_eq!(daily.next_after(at(2025, 1, 15, 10, 0)).unwrap(), at(2025, 1, 16, 10, 0));
    }

    #[test]
    fn test_weekly_next_run() {
        let mut weekly = rule(Frequency::Weekly, "14:00");
        weekly.day_of_week = Some(1);
        // 2025-01-15 是周三
        let next = weekly.next_after(at(2025, 1, 15, 10, 0)).unwrap();
        assert_eq!(next, at(2025, 1, 20, 14, 0));
        assert_eq!(next.weekday().num_days_from_sunday(), 1);

        // 周日属于当前 ISO 周的最后一天
        weekly.day_of_week = Some(0);
        assert_eq!(weekly.next_after(at(2025, 1, 15, 10, 0)).unwrap(), at(2025, 1, 19, 14, 0));
    }

    #[test]
    fn test_monthly_clamps_to_short_months() {
        let mut monthly = rule(Frequency::Monthly, "09:00");
        monthly.day_of_month = Some(5);
        assert_eq!(monthly.next_after(at(2025, 1, 15, 10, 0)).unwrap(), at(2025, 2, 5, 9, 0));

        monthly.day_of_month = Some(31);
        assert_eq!(monthly.next_after(at(2025, 1, 31, 10, 0)).unwrap(), at(2025, 2, 28, 9, 0));
        assert_eq!(monthly.next_after(at(2024, 1, 31, 10, 0)).unwrap(), at(2024, 2, 29, 9, 0));
        assert_eq!(monthly.next_after(at(2025, 12, 31, 10, 0)).unwrap(), at(2026, 1, 31, 9, 0));
        assert_eq!(monthly.slot_in_period(at(2025, 4, 2, 0, 0)).unwrap(), at(2025, 4, 30, 9, 0));
    }

    #[test]
    fn test_missed_daily_waits_for_time_of_day() {
        let daily = rule(Frequency::Daily, "02:00");
        let overdue = schedule(daily, Some(at(2025, 3, 9, 2, 0)));

        assert!(!is_due(&overdue, at(2025, 3, 10, 1, 0)));
        assert!(is_due(&overdue, at(2025, 3, 10, 2, 0)));
        assert_eq!(daily.next_after(at(2025, 3, 10, 2, 0)).unwrap(), at(2025, 3, 11, 2, 0));
    }

    #[test]
    fn test_due_respects_next_run_and_active_flag() {
        let hourly = rule(Frequency::Hourly, "00:00");
        let now = at(2025, 3, 10, 12, 30);

        assert!(is_due(&schedule(hourly, Some(now - Duration::hours(1))), now));
        assert!(!is_due(&schedule(hourly, Some(now + Duration::hours(1))), now));
        assert!(is_due(&schedule(hourly, None), now));

        let mut inactive = schedule(hourly, None);
        inactive.is_active = false;
        assert!(!is_due(&inactive, now));
    }

    #[test]
    fn test_frequency_labels() {
        assert_eq!(rule(Frequency::Hourly, "10:00").label(), "Every Hour");
        assert_eq!(rule(Frequency::Daily, "14:00").label(), "Daily at 14:00");

        let mut weekly = rule(Frequency::Weekly, "10:00");
        weekly.day_of_week = Some(1);
        assert_eq!(weekly.label(), "Weekly on Monday at 10:00");

        let mut monthly = rule(Frequency::Monthly, "09:00");
        monthly.day_of_month = Some(15);
        assert_eq!(monthly.label(), "Monthly on day 15 at 09:00");
    }
}
