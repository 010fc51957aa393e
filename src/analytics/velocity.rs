//! Completion velocity and ETA

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Repositories completed per day over a trailing window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub window_days: u32,
    pub completed_in_window: u64,
    pub repos_per_day: f64,
}

impl Velocity {
    /// Count completions in `(now - window_days, now]`.
    ///
    /// A zero-day window yields zero velocity.
    pub fn from_completions(
        timestamps: &[DateTime<Utc>],
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Self {
        if window_days == 0 {
            return Self::zero(0);
        }

        let since = now - Duration::days(i64::from(window_days));
        let completed = timestamps
            .iter()
            .filter(|t| **t > since && **t <= now)
            .count() as u64;

        Self {
            window_days,
            completed_in_window: completed,
            repos_per_day: completed as f64 / f64::from(window_days),
        }
    }

    pub fn zero(window_days: u32) -> Self {
        Self {
            window_days,
            completed_in_window: 0,
            repos_per_day: 0.0,
        }
    }

    pub fn is_stalled(&self) -> bool {
        self.repos_per_day.is_nan() || self.repos_per_day <= 0.0
    }
}

/// Projected completion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Eta {
    pub days_remaining: Option<f64>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl Eta {
    /// No projection possible at zero velocity
    pub fn unknown() -> Self {
        Self {
            days_remaining: None,
            estimated_completion: None,
        }
    }

    pub fn from_velocity(remaining: u64, velocity: &Velocity, now: DateTime<Utc>) -> Self {
        if velocity.is_stalled() {
            return Self::unknown();
        }

        let days = remaining as f64 / velocity.repos_per_day;
        if !days.is_finite() {
            return Self::unknown();
        }
        let completion = Duration::try_seconds((days * 86_400.0).round() as i64)
            .and_then(|ahead| now.checked_add_signed(ahead));
        match completion {
            Some(at) => Self {
                days_remaining: Some(days),
                estimated_completion: Some(at),
            },
            None => Self::unknown(),
        }
    }
}

/// ETA for `remaining` repositories at the given velocity, from now
pub fn eta(remaining: u64, velocity: &Velocity) -> Eta {
    Eta::from_velocity(remaining, velocity, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_counts_only_window() {
        let now = Utc::now();
        let stamps = vec![
            now - Duration::hours(1),
            now - Duration::days(3),
            now - Duration::days(10),
        ];

        let week = Velocity::from_completions(&stamps, 7, now);
        assert_eq!(week.completed_in_window, 2);
        assert!((week.repos_per_day - 2.0 / 7.0).abs() < 1e-9);

        let month = Velocity::from_completions(&stamps, 30, now);
        assert_eq!(month.completed_in_window, 3);
    }

    #[test]
    fn test_zero_velocity_has_no_eta() {
        let velocity = Velocity::from_completions(&[], 7, Utc::now());
        assert!(velocity.is_stalled());
        let eta = eta(12, &velocity);
        assert_eq!(eta.days_remaining, None);
        assert_eq!(eta.estimated_completion, None);
    }

    #[test]
    fn test_eta_projection() {
        let now = Utc::now();
        let velocity = Velocity {
            window_days: 7,
            completed_in_window: 14,
            repos_per_day: 2.0,
        };
        let eta = Eta::from_velocity(10, &velocity, now);
        assert_eq!(eta.days_remaining, Some(5.0));
        assert_eq!(eta.estimated_completion, Some(now + Duration::days(5)));
    }

    #[test]
    fn test_degenerate_velocity_has_no_eta() {
        let now = Utc::now();
        for repos_per_day in [f64::NAN, -1.0, f64::MIN_POSITIVE, 1e-300] {
            let velocity = Velocity {
                window_days: 7,
                completed_in_window: 0,
                repos_per_day,
            };
            let eta = Eta::from_velocity(10, &velocity, now);
            assert_eq!(eta.days_remaining, None, "repos_per_day = {repos_per_day}");
            assert_eq!(eta.estimated_completion, None);
        }
    }
}
