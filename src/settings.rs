use crate::application::reauthorization::ReauthorizationPolicy;
use crate::domain::money::{CompositeConverter, RoundingMode};
use crate::error::{ReconcileError, Result};
use chrono::{Duration, Utc};
use clap::Args;

/// Engine tunables, read from the command line or the environment.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Number of transactions per re-authorization chunk job
    #[arg(long, env = "RECONCILER_CHUNK_SIZE", default_value_t = 10)]
    pub chunk_size: usize,

    /// Holds younger than this many hours are not renewed
    #[arg(long, env = "RECONCILER_REAUTH_MIN_AGE_HOURS", default_value_t = 144)]
    pub reauth_min_age_hours: i64,

    /// Holds older than this many hours are considered expired
    #[arg(long, env = "RECONCILER_REAUTH_MAX_AGE_HOURS", default_value_t = 168)]
    pub reauth_max_age_hours: i64,

    /// Rounding applied when amounts carry more precision than the currency allows
    #[arg(long, env = "RECONCILER_ROUNDING", default_value_t = RoundingMode::HalfUp)]
    pub rounding: RoundingMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            reauth_min_age_hours: 144,
            reauth_max_age_hours: 168,
            rounding: RoundingMode::default(),
        }
    }
}

impl Settings {
    /// Fails when an age does not fit a duration or reaches past the calendar.
    pub fn reauthorization(&self) -> Result<ReauthorizationPolicy> {
        let policy = ReauthorizationPolicy {
            chunk_size: self.chunk_size.max(1),
            min_age: hours("reauth_min_age_hours", self.reauth_min_age_hours)?,
            max_age: hours("reauth_max_age_hours", self.reauth_max_age_hours)?,
        };
        policy.window(Utc::now())?;
        Ok(policy)
    }

    pub fn converter(&self) -> CompositeConverter {
        CompositeConverter::standard(self.rounding)
    }
}

fn hours(name: &'static str, value: i64) -> Result<Duration> {
    Duration::try_hours(value).ok_or_else(|| ReconcileError::InvalidSetting {
        name,
        reason: format!("{value} hours is out of range"),
    })
}
