use super::types::{ChangeDirection, ChangePoint};
use super::{daily_series, PatternAnalyzer};
use crate::stats::mean;
use crate::types::event::EventLog;
use tracing::debug;

impl PatternAnalyzer {
    /// Days where the mean daily rate of the following window departs from
    /// the preceding window's mean by more than the configured relative change.
    ///
    /// Needs `change_point_min_events` events and `change_point_min_days`
    /// distinct days. Returns the largest shifts first.
    pub fn detect_change_points(&self, log: &EventLog, driver_id: Option<&str>) -> Vec<ChangePoint> {
        let events = log.scoped(driver_id);
        if events.len() < self.config.change_point_min_events {
            debug!(events = events.len(), "Too few events for change points");
            return Vec::new();
        }

        let series = daily_series(&events);
        if series.len() < self.config.change_point_min_days {
            debug!(days = series.len(), "Too few days for change points");
            return Vec::new();
        }

        let rates: Vec<f64> = series.iter().map(|d| d.rate()).collect();
        let window = self.config.change_point_window.max(1);
        let mut points = Vec::new();

        for i in window..rates.len().saturating_sub(window) {
            let before = &rates[i.saturating_sub(window)..i];
            if before.len() < self.config.change_point_min_periods {
                continue;
            }
            let before_rate = mean(before);
            let after_rate = mean(&rates[i..i + window]);
            if before_rate <= 0.0 {
                continue;
            }

            let relative = (after_rate - before_rate) / before_rate;
            if relative.abs() > self.config.change_point_relative_change {
                points.push(ChangePoint {
                    date: series[i].date,
                    before_rate,
                    after_rate,
                    change_pct: relative * 100.0,
                    direction: if after_rate > before_rate {
                        ChangeDirection::Increase
                    } else {
                        ChangeDirection::Decrease
                    },
                });
            }
        }

        points.sort_by(|a, b| {
            b.change_pct
                .abs()
                .total_cmp(&a.change_pct.abs())
                .then_with(|| a.date.cmp(&b.date))
        });
        points.truncate(self.config.change_point_max_results);
        points
    }
}
