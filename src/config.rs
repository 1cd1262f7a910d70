use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{NaiveTime, Weekday};
use dotenvy::dotenv;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::utils::calendar::parse_weekdays;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub server_addr: String,
    pub db_max_connections: u32,
    pub log_level: tracing::Level,

    // 0 disables the scheduled increase job
    pub increase_schedule_secs: u64,

    pub api_prefix: String,

    pub payroll: PayrollSettings,
}

/// Process-wide payroll knobs, injected into the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PayrollSettings {
    pub overtime_multiplier: Decimal,
    pub late_grace_minutes: u32,
    pub early_leave_grace_minutes: u32,
    pub default_weekend_days: Vec<Weekday>,
    /// Day rate divisor; 30 keeps months comparable.
    pub days_in_month_divisor: u32,
    pub require_approved_attendance_for_payroll: bool,
    pub advance_max_principal: Decimal,
    pub advance_max_installments: u32,
    pub advance_installment_salary_cap_ratio: Decimal,
    pub advance_outstanding_salary_multiple: Decimal,
    pub assembly_timeout: Duration,
    pub default_shift_start: NaiveTime,
    pub default_shift_end: NaiveTime,
    pub default_shift_hours: Decimal,
}

impl Default for PayrollSettings {
    fn default() -> Self {
        Self {
            overtime_multiplier: Decimal::ONE,
            late_grace_minutes: 15,
            early_leave_grace_minutes: 15,
            default_weekend_days: vec![Weekday::Fri, Weekday::Sat],
            days_in_month_divisor: 30,
            require_approved_attendance_for_payroll: false,
            advance_max_principal: dec!(50000),
            advance_max_installments: 24,
            advance_installment_salary_cap_ratio: dec!(0.5),
            advance_outstanding_salary_multiple: dec!(2),
            assembly_timeout: Duration::from_secs(30),
            default_shift_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            default_shift_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            default_shift_hours: dec!(8),
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key}=`{raw}` is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 10)?,
            log_level: parsed("LOG_LEVEL", tracing::Level::DEBUG)?,
            increase_schedule_secs: parsed("INCREASE_SCHEDULE_SECS", 86_400)?,
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            payroll: PayrollSettings::from_env()?,
        })
    }
}

impl PayrollSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let default_weekend_days = match env::var("PAYROLL_DEFAULT_WEEKEND_DAYS") {
            Ok(raw) => parse_weekdays(&raw).map_err(|e| anyhow!("PAYROLL_DEFAULT_WEEKEND_DAYS: {e}"))?,
            Err(_) => defaults.default_weekend_days.clone(),
        };

        let settings = Self {
            overtime_multiplier: parsed("PAYROLL_OVERTIME_MULTIPLIER", defaults.overtime_multiplier)?,
            late_grace_minutes: parsed("PAYROLL_LATE_GRACE_MINUTES", defaults.late_grace_minutes)?,
            early_leave_grace_minutes: parsed(
                "PAYROLL_EARLY_LEAVE_GRACE_MINUTES",
                defaults.early_leave_grace_minutes,
            )?,
            default_weekend_days,
            days_in_month_divisor: parsed(
                "PAYROLL_DAYS_IN_MONTH_DIVISOR",
                defaults.days_in_month_divisor,
            )?,
            require_approved_attendance_for_payroll: parsed(
                "PAYROLL_REQUIRE_APPROVED_ATTENDANCE_FOR_PAYROLL",
                defaults.require_approved_attendance_for_payroll,
            )?,
            advance_max_principal: parsed(
                "PAYROLL_ADVANCE_MAX_PRINCIPAL",
                defaults.advance_max_principal,
            )?,
            advance_max_installments: parsed(
                "PAYROLL_ADVANCE_MAX_INSTALLMENTS",
                defaults.advance_max_installments,
            )?,
            advance_installment_salary_cap_ratio: parsed(
                "PAYROLL_ADVANCE_INSTALLMENT_SALARY_CAP_RATIO",
                defaults.advance_installment_salary_cap_ratio,
            )?,
            advance_outstanding_salary_multiple: parsed(
                "PAYROLL_ADVANCE_OUTSTANDING_SALARY_MULTIPLE",
                defaults.advance_outstanding_salary_multiple,
            )?,
            assembly_timeout: Duration::from_secs(parsed("PAYROLL_ASSEMBLY_TIMEOUT_SECS", 30u64)?),
            default_shift_start: parsed("PAYROLL_DEFAULT_SHIFT_START", defaults.default_shift_start)?,
            default_shift_end: parsed("PAYROLL_DEFAULT_SHIFT_END", defaults.default_shift_end)?,
            default_shift_hours: parsed("PAYROLL_DEFAULT_SHIFT_HOURS", defaults.default_shift_hours)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.days_in_month_divisor == 0 {
            return Err(anyhow!("PAYROLL_DAYS_IN_MONTH_DIVISOR must be positive"));
        }
        if self.default_shift_hours <= Decimal::ZERO {
            return Err(anyhow!("PAYROLL_DEFAULT_SHIFT_HOURS must be positive"));
        }
        if self.overtime_multiplier < Decimal::ZERO {
            return Err(anyhow!("PAYROLL_OVERTIME_MULTIPLIER must not be negative"));
        }
        if self.advance_installment_salary_cap_ratio <= Decimal::ZERO {
            return Err(anyhow!(
                "PAYROLL_ADVANCE_INSTALLMENT_SALARY_CAP_RATIO must be positive"
            ));
        }
        if self.advance_max_installments == 0 {
            return Err(anyhow!("PAYROLL_ADVANCE_MAX_INSTALLMENTS must be positive"));
        }
        Ok(())
    }
}
