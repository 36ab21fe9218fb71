use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use scheduler_core::{SchedulerError, SchedulerResult};

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// 调度表达式解析
///
/// 支持六/七段 cron、五段 cron（自动补秒），以及简写：
/// `hourly@MM`、`daily@HH:MM`、`weekly@DAY@HH:MM`（DAY 为 Mon..Sun）。
/// 所有时间均按 UTC 计算。
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(expr: &str) -> SchedulerResult<Self> {
        let normalized = Self::normalize_expression(expr)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;
        debug!("调度表达式 {} 解析为 {}", expr, normalized);

        Ok(Self {
            expression: expr.to_string(),
            schedule,
        })
    }

    /// 将简写或五段表达式转换为 `cron` crate 可接受的格式
    pub fn normalize_expression(expr: &str) -> SchedulerResult<String> {
        let expr = expr.trim();
        let invalid = |message: &str| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            message: message.to_string(),
        };

        if let Some(rest) = expr.strip_prefix("hourly@") {
            let minute = Self::parse_component(rest, 59).ok_or_else(|| invalid("分钟必须在 0-59 之间"))?;
            return Ok(format!("0 {minute} * * * *"));
        }

        if let Some(rest) = expr.strip_prefix("daily@") {
            let (hour, minute) = Self::parse_time(rest).ok_or_else(|| invalid("时间格式应为 HH:MM"))?;
            return Ok(format!("0 {minute} {hour} * * *"));
        }

        if let Some(rest) = expr.strip_prefix("weekly@") {
            let (day, time) = rest.split_once('@').ok_or_else(|| invalid("格式应为 weekly@DAY@HH:MM"))?;
            let day = WEEKDAYS
                .iter()
                .find(|d| d.eq_ignore_ascii_case(day))
                .ok_or_else(|| invalid("星期应为 Mon..Sun"))?;
            let (hour, minute) = Self::parse_time(time).ok_or_else(|| invalid("时间格式应为 HH:MM"))?;
            return Ok(format!("0 {minute} {hour} * * {day}"));
        }

        match expr.split_whitespace().count() {
            5 => Ok(format!("0 {expr}")),
            6 | 7 => Ok(expr.to_string()),
            _ => Err(invalid("cron 表达式应为 5、6 或 7 段")),
        }
    }

    fn parse_component(value: &str, max: u32) -> Option<u32> {
        value.parse::<u32>().ok().filter(|v| *v <= max)
    }

    fn parse_time(value: &str) -> Option<(u32, u32)> {
        let (hour, minute) = value.split_once(':')?;
        Some((
            Self::parse_component(hour, 23)?,
            Self::parse_component(minute, 59)?,
        ))
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// `from` 之后（不含）的下一次触发时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    pub fn validate_cron_expression(expr: &str) -> SchedulerResult<()> {
        Self::new(expr).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_shorthands() {
        assert_eq!(CronScheduler::normalize_expression("hourly@15").unwrap(), "0 15 * * * *");
        assert_eq!(CronScheduler::normalize_expression("daily@02:00").unwrap(), "0 0 2 * * *");
        assert_eq!(
            CronScheduler::normalize_expression("weekly@mon@06:30").unwrap(),
            "0 30 6 * * Mon"
        );
        assert_eq!(CronScheduler::normalize_expression("*/5 * * * *").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in ["daily@25:00", "hourly@60", "weekly@Funday@01:00", "* *", "daily@0200"] {
            assert!(
                matches!(CronScheduler::new(expr), Err(SchedulerError::InvalidCron { .. })),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn test_daily_next_execution() {
        let cron = CronScheduler::new("daily@02:00").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
        assert_eq!(
            cron.next_execution_time(at).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 3, 2, 0, 0).unwrap()
        );
        let before = Utc.with_ymd_and_hms(2024, 1, 2, 1, 59, 59).unwrap();
        assert_eq!(cron.next_execution_time(before).unwrap(), at);
    }

    #[test]
    fn test_weekly_upcoming_times() {
        let cron = CronScheduler::new("weekly@Mon@06:30").unwrap();
        // 2024-01-01 是星期一
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let times = cron.upcoming_times(from, 2);
        assert_eq!(times[0], Utc.with_ymd_and_hms(2024, 1, 1, 6, 30, 0).unwrap());
        assert_eq!(times[1], Utc.with_ymd_and_hms(2024, 1, 8, 6, 30, 0).unwrap());
    }
}
