//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Flow engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Buffer added to `next_action_at` after a non-delay step, so the
    /// enrollment is not immediately re-picked by the same pass cycle.
    pub step_buffer: Duration,
    /// Claim lease horizon. A claimed enrollment becomes due again after
    /// this long if the pass that claimed it died before persisting.
    pub claim_lease: Duration,
    /// Default subject for email steps that carry none.
    pub default_email_subject: String,
    /// Default title for push steps that carry none.
    pub default_push_title: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_buffer: Duration::from_secs(60),
            claim_lease: Duration::from_secs(60),
            default_email_subject: "Welcome!".to_string(),
            default_push_title: "Notification".to_string(),
        }
    }
}

/// Server/runtime configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// REST API bind port.
    pub port: u16,
    /// Database path (local libSQL file).
    pub db_path: String,
    /// Cron schedule for the automatic pass ticker (6-field, with seconds).
    pub cron_schedule: String,
    /// Interval at which the ticker checks the schedule.
    pub tick_interval: Duration,
}

impl ServerConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = std::env::var("ONBOARDLY_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        let db_path = std::env::var("ONBOARDLY_DB_PATH")
            .unwrap_or_else(|_| "./data/onboardly.db".to_string());

        // Every 5 minutes by default, matching the production cadence of
        // the hosted scheduler this service replaces.
        let cron_schedule = std::env::var("ONBOARDLY_CRON_SCHEDULE")
            .unwrap_or_else(|_| "0 */5 * * * *".to_string());

        cron::Schedule::from_str(&cron_schedule).map_err(|e| ConfigError::InvalidSchedule {
            schedule: cron_schedule.clone(),
            message: e.to_string(),
        })?;

        let tick_interval_secs: u64 = std::env::var("ONBOARDLY_TICK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        Ok(Self {
            port,
            db_path,
            cron_schedule,
            tick_interval: Duration::from_secs(tick_interval_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.step_buffer, Duration::from_secs(60));
        assert_eq!(cfg.default_email_subject, "Welcome!");
        assert_eq!(cfg.default_push_title, "Notification");
    }

    #[test]
    fn default_schedule_parses() {
        let schedule = cron::Schedule::from_str("0 */5 * * * *").unwrap();
        assert!(schedule.upcoming(chrono::Utc).next().is_some());
    }
}
