use super::types::{TrendAnalysis, TrendDirection};
use super::{daily_series, PatternAnalyzer};
use crate::stats::linear_regression;
use crate::types::event::{EventLog, EventRecord};
use chrono::Duration;
use tracing::debug;

const FORECAST_DAYS: usize = 7;

impl PatternAnalyzer {
    /// Linear trend of the daily positive rate over the last `window_days`
    /// before the latest event in scope.
    ///
    /// Fewer than `min_trend_days` distinct days yields an
    /// `InsufficientData` result.
    pub fn analyze_trend(
        &self,
        log: &EventLog,
        window_days: u32,
        driver_id: Option<&str>,
    ) -> TrendAnalysis {
        let scoped = log.scoped(driver_id);
        let Some(latest) = scoped.iter().map(|e| e.timestamp).max() else {
            return TrendAnalysis::insufficient(0, "No events for trend analysis");
        };
        let start = latest - Duration::days(i64::from(window_days));
        let events: Vec<&EventRecord> = scoped
            .into_iter()
            .filter(|e| e.timestamp >= start)
            .collect();

        let series = daily_series(&events);
        let days = series.len();
        if days < self.config.min_trend_days {
            debug!(days, required = self.config.min_trend_days, "Too few days for trend analysis");
            return TrendAnalysis::insufficient(days, "Insufficient days for trend analysis");
        }

        let x: Vec<f64> = (0..days).map(|i| i as f64).collect();
        let y: Vec<f64> = series.iter().map(|d| d.rate()).collect();
        let Some(fit) = linear_regression(&x, &y) else {
            return TrendAnalysis::insufficient(days, "Trend regression failed");
        };

        let is_significant = fit.p_value < self.config.trend_significance_level;
        let direction = if !is_significant {
            TrendDirection::Stable
        } else if fit.slope > self.config.trend_min_slope {
            TrendDirection::Increasing
        } else if fit.slope < -self.config.trend_min_slope {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        };

        let clip = |v: f64| v.clamp(0.0, 1.0);
        let n = days as f64;
        let forecast = (0..FORECAST_DAYS)
            .map(|i| clip(fit.predict(n + i as f64)))
            .collect();

        TrendAnalysis {
            direction,
            slope: fit.slope,
            significance: 1.0 - fit.p_value,
            is_significant,
            forecast,
            forecast_7d: clip(fit.predict(n + 7.0)),
            forecast_30d: clip(fit.predict(n + 30.0)),
            days,
            description: format!(
                "Trend is {} (slope: {:.3}%/day, significance: {:.2})",
                direction.as_str(),
                fit.slope * 100.0,
                1.0 - fit.p_value
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::parse_timestamp;

    /// `per_day` deliveries per day, the first `positives(day)` of them positive
    fn log_with(days: i64, per_day: usize, positives: impl Fn(i64) -> usize) -> EventLog {
        let start = parse_timestamp("2024-11-01 09:00:00").unwrap();
        let mut records = Vec::new();
        for day in 0..days {
            for slot in 0..per_day {
                let mut record = EventRecord::new(
                    "DRV01",
                    start + Duration::days(day) + Duration::minutes(slot as i64 * 10),
                );
                if slot < positives(day) {
                    record = record.with_outcome("neighbor");
                }
                records.push(record);
            }
        }
        EventLog::new(records)
    }

    #[test]
    fn test_constant_rate_is_stable() {
        let analyzer = PatternAnalyzer::default();
        let trend = analyzer.analyze_trend(&log_with(20, 10, |_| 2), 30, None);

        assert_eq!(trend.direction, TrendDirection::Stable);
        assert!(trend.slope.abs() < 0.001);
        assert!(!trend.is_significant);
        assert_eq!(trend.forecast.len(), 7);
        assert!((trend.forecast_7d - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_increasing_rate() {
        let analyzer = PatternAnalyzer::default();
        let trend = analyzer.analyze_trend(&log_with(20, 20, |d| d as usize), 30, None);

        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!((trend.slope - 0.05).abs() < 1e-9);
        assert!(trend.is_significant);
        // 20 + 30 days out the line exceeds 1 and is clipped
        assert_eq!(trend.forecast_30d, 1.0);
    }

    #[test]
    fn test_decreasing_rate() {
        let analyzer = PatternAnalyzer::default();
        let trend = analyzer.analyze_trend(&log_with(15, 20, |d| 15 - d as usize), 30, None);
        assert_eq!(trend.direction, TrendDirection::Decreasing);
        assert!(trend.forecast.iter().all(|f| (0.0..=1.0).contains(f)));
    }

    #[test]
    fn test_insufficient_days() {
        let analyzer = PatternAnalyzer::default();
        let trend = analyzer.analyze_trend(&log_with(5, 10, |_| 1), 30, None);
        assert_eq!(trend.direction, TrendDirection::InsufficientData);
        assert_eq!(trend.days, 5);

        let trend = analyzer.analyze_trend(&EventLog::default(), 30, None);
        assert_eq!(trend.direction, TrendDirection::InsufficientData);
    }

    #[test]
    fn test_window_limits_series() {
        let analyzer = PatternAnalyzer::default();
        // 40 days of data, a 10-day window keeps 11 calendar days
        let trend = analyzer.analyze_trend(&log_with(40, 4, |_| 1), 10, None);
        assert_eq!(trend.days, 11);
    }
}
