//! Daytime window used for night conservation

use crate::config::{DaytimeConfig, DaytimeSource};
use crate::error::{ChargerError, Result};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// Answers whether solar production is plausible right now
pub trait DaytimeWindow: Send + Sync {
    fn is_daytime(&self, now: DateTime<Utc>) -> bool;
}

/// Fixed local hours; `end` before `start` wraps past midnight
#[derive(Debug, Clone)]
pub struct FixedHoursWindow {
    tz: Tz,
    start: NaiveTime,
    end: NaiveTime,
}

impl FixedHoursWindow {
    pub fn new(tz: Tz, start: NaiveTime, end: NaiveTime) -> Self {
        Self { tz, start, end }
    }

    pub fn from_config(config: &DaytimeConfig) -> Result<Self> {
        let tz: Tz = config.timezone.parse().map_err(|e| {
            ChargerError::validation(
                "daytime.timezone",
                format!("Unknown timezone {}: {}", config.timezone, e),
            )
        })?;
        let start = parse_hhmm("daytime.start", &config.start)?;
        let end = parse_hhmm("daytime.end", &config.end)?;
        if start == end {
            return Err(ChargerError::validation(
                "daytime.end",
                "Must differ from daytime.start",
            ));
        }
        Ok(Self::new(tz, start, end))
    }
}

fn parse_hhmm(field: &str, value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| {
        ChargerError::validation(field, format!("Expected HH:MM, got {:?}", value))
    })
}

impl DaytimeWindow for FixedHoursWindow {
    fn is_daytime(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz).time();
        if self.start < self.end {
            local >= self.start && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }
}

/// Every instant counts as daytime
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDaytime;

impl DaytimeWindow for AlwaysDaytime {
    fn is_daytime(&self, _now: DateTime<Utc>) -> bool {
        true
    }
}

/// Build the configured window
pub fn build_window(config: &DaytimeConfig) -> Result<Box<dyn DaytimeWindow>> {
    Ok(match config.source {
        DaytimeSource::Fixed => Box::new(FixedHoursWindow::from_config(config)?),
        DaytimeSource::Always => Box::new(AlwaysDaytime),
    })
}
