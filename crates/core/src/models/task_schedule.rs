use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScheduleStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "INACTIVE")]
    Inactive,
    /// 上一次执行超过 MaxRunTime 仍未结束，暂停触发并等待人工处理
    #[serde(rename = "STUCK")]
    Stuck,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "ACTIVE",
            ScheduleStatus::Inactive => "INACTIVE",
            ScheduleStatus::Stuck => "STUCK",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ScheduleStatus::Active),
            "INACTIVE" => Ok(ScheduleStatus::Inactive),
            "STUCK" => Ok(ScheduleStatus::Stuck),
            _ => Err(format!("Invalid schedule status: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for ScheduleStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ScheduleStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<ScheduleStatus>().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ScheduleStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 任务的周期触发器
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSchedule {
    pub id: i64,
    pub task_id: i64,
    /// cron 表达式或 `daily@HH:MM` 等简写
    pub schedule: String,
    /// 每次运行推进的逻辑周期
    pub increment_seconds: i64,
    /// 执行的最长允许时间，超过即视为卡住
    pub max_run_time_seconds: i64,
    pub next_run: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub updated_at: DateTime<Utc>,
}

impl TaskSchedule {
    pub fn new(
        id: i64,
        task_id: i64,
        schedule: impl Into<String>,
        increment: Duration,
        next_run: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            schedule: schedule.into(),
            increment_seconds: increment.num_seconds(),
            max_run_time_seconds: Duration::hours(6).num_seconds(),
            next_run,
            status: ScheduleStatus::Active,
            updated_at: Utc::now(),
        }
    }

    pub fn with_max_run_time(mut self, max_run_time: Duration) -> Self {
        self.max_run_time_seconds = max_run_time.num_seconds();
        self
    }

    pub fn increment(&self) -> Duration {
        Duration::seconds(self.increment_seconds)
    }

    pub fn max_run_time(&self) -> Duration {
        Duration::seconds(self.max_run_time_seconds)
    }

    /// 已停用的调度不参与评估；卡住的调度仍参与评估以便恢复
    pub fn is_enabled(&self) -> bool {
        !matches!(self.status, ScheduleStatus::Inactive)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_enabled() && self.next_run <= now
    }

    /// 当前 NextRun 所代表的逻辑执行日期
    pub fn logical_date(&self) -> DateTime<Utc> {
        align_to_increment(self.next_run, self.increment())
    }
}

/// 将触发时间向下对齐到周期边界（以 Unix 纪元为基准）
pub fn align_to_increment(fire_time: DateTime<Utc>, increment: Duration) -> DateTime<Utc> {
    let step = increment.num_seconds();
    if step <= 0 {
        return fire_time;
    }
    let ts = fire_time.timestamp();
    let aligned = ts - ts.rem_euclid(step);
    DateTime::from_timestamp(aligned, 0).unwrap_or(fire_time)
}
