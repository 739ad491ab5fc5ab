use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use control_plane_core::{ControlPlaneError, ControlPlaneResult};

/// CRON表达式解析和调度工具
///
/// 支持5段（分钟级）、6段（秒级）和7段（带年份）表达式，
/// 5段表达式在解析前补齐秒字段 `0`。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> ControlPlaneResult<Self> {
        let expression = Self::normalize_expression(cron_expr)?;
        let schedule = Schedule::from_str(&expression).map_err(|e| ControlPlaneError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression,
            schedule,
        })
    }

    /// 将表达式规范化为 `cron` crate 接受的秒级格式
    pub fn normalize_expression(cron_expr: &str) -> ControlPlaneResult<String> {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        match fields.len() {
            5 => Ok(format!("0 {}", fields.join(" "))),
            6 | 7 => Ok(fields.join(" ")),
            n => Err(ControlPlaneError::InvalidCron {
                expr: cron_expr.to_string(),
                message: format!("字段数量应为5、6或7，实际为{n}"),
            }),
        }
    }

    /// 规范化后的表达式
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 获取严格晚于 `from` 的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn validate_cron_expression(cron_expr: &str) -> ControlPlaneResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_five_field_expression_gets_seconds() {
        let scheduler = CronScheduler::new("*/5 * * * *").unwrap();
        assert_eq!(scheduler.expression(), "0 */5 * * * *");

        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 1, 30).unwrap();
        let next = scheduler.next_execution_time(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn test_six_field_expression_kept() {
        let scheduler = CronScheduler::new("*/10 * * * * *").unwrap();
        assert_eq!(scheduler.expression(), "*/10 * * * * *");

        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 3).unwrap();
        let first = scheduler.next_execution_time(from).unwrap();
        let second = scheduler.next_execution_time(first).unwrap();
        assert_eq!((first.second(), second.second()), (10, 20));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(matches!(
            CronScheduler::new("* * *"),
            Err(ControlPlaneError::InvalidCron { .. })
        ));
        assert!(matches!(
            CronScheduler::new("61 * * * * *"),
            Err(ControlPlaneError::InvalidCron { .. })
        ));
        assert!(CronScheduler::validate_cron_expression("").is_err());
        assert!(CronScheduler::validate_cron_expression("0 0 * * *").is_ok());
    }
}
