use super::types::{HeatmapCell, Pattern, PatternDetails, PatternType, TimeHeatmap, WEEKDAY_NAMES};
use super::PatternAnalyzer;
use crate::types::event::{EventLog, EventRecord};
use std::collections::BTreeMap;
use tracing::debug;

impl PatternAnalyzer {
    /// Weekday concentration, peak hour and weekend deviation among positive
    /// events, for one driver or the whole log.
    pub fn detect_time_patterns(&self, log: &EventLog, driver_id: Option<&str>) -> Vec<Pattern> {
        let events = log.scoped(driver_id);
        let positives: Vec<&EventRecord> =
            events.iter().copied().filter(|e| e.is_positive()).collect();

        if positives.is_empty() || positives.len() < self.config.min_positive_events {
            debug!(
                positives = positives.len(),
                required = self.config.min_positive_events,
                "Too few positive events for time patterns"
            );
            return Vec::new();
        }

        let total = positives.len() as f64;
        let mut patterns = Vec::new();

        let mut weekday_counts = [0usize; 7];
        let mut hour_counts = [0usize; 24];
        for event in &positives {
            weekday_counts[event.weekday() as usize] += 1;
            hour_counts[event.hour() as usize] += 1;
        }

        let (peak_day, day_count) = peak(&weekday_counts);
        let day_share = day_count as f64 / total;
        if day_share > self.config.weekday_concentration {
            let distribution = weekday_counts
                .iter()
                .enumerate()
                .filter(|&(_, &c)| c > 0)
                .map(|(d, &c)| (d as u32, c as f64 / total))
                .collect::<BTreeMap<_, _>>();
            let name = WEEKDAY_NAMES[peak_day];
            patterns.push(Pattern {
                pattern_type: PatternType::WeekdayConcentration,
                description: format!(
                    "{:.0}% of concessions occur on {}",
                    day_share * 100.0,
                    name
                ),
                confidence: day_share,
                details: PatternDetails::Weekday {
                    peak_day: peak_day as u32,
                    peak_day_name: name.to_string(),
                    concentration: day_share,
                    distribution,
                },
            });
        }

        let (peak_hour, hour_count) = peak(&hour_counts);
        let hour_share = hour_count as f64 / total;
        if hour_share > self.config.peak_hour_concentration {
            let mut busiest: Vec<(u32, f64)> = hour_counts
                .iter()
                .enumerate()
                .filter(|&(_, &c)| c > 0)
                .map(|(h, &c)| (h as u32, c as f64 / total))
                .collect();
            busiest.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            busiest.truncate(5);

            patterns.push(Pattern {
                pattern_type: PatternType::PeakHour,
                description: format!(
                    "Peak concession hour is {}:00 ({:.0}%)",
                    peak_hour,
                    hour_share * 100.0
                ),
                confidence: hour_share,
                details: PatternDetails::Hour {
                    peak_hour: peak_hour as u32,
                    concentration: hour_share,
                    distribution: busiest,
                },
            });
        }

        let weekend_rate = positives.iter().filter(|e| e.is_weekend()).count() as f64 / total;
        let base_rate = events.iter().filter(|e| e.is_weekend()).count() as f64 / events.len() as f64;
        let difference = weekend_rate - base_rate;
        if difference.abs() > self.config.weekend_difference {
            let relation = if difference > 0.0 { "higher" } else { "lower" };
            patterns.push(Pattern {
                pattern_type: PatternType::WeekendDifference,
                description: format!("Weekend concession rate is {} than average", relation),
                confidence: difference.abs(),
                details: PatternDetails::Weekend {
                    weekend_concession_rate: weekend_rate,
                    overall_weekend_rate: base_rate,
                    difference,
                },
            });
        }

        patterns
    }

    /// Positive rate (percent) for every populated hour x weekday cell
    pub fn time_heatmap(&self, log: &EventLog) -> TimeHeatmap {
        let mut cells: BTreeMap<(u32, u32), (usize, usize)> = BTreeMap::new();
        for event in log.records() {
            let entry = cells.entry((event.hour(), event.weekday())).or_insert((0, 0));
            entry.1 += 1;
            if event.is_positive() {
                entry.0 += 1;
            }
        }

        TimeHeatmap {
            cells: cells
                .into_iter()
                .map(|((hour, weekday), (concessions, total))| HeatmapCell {
                    hour,
                    weekday,
                    concessions,
                    total,
                    rate: concessions as f64 / total as f64 * 100.0,
                })
                .collect(),
        }
    }
}

/// Index and count of the largest bucket; ties go to the smallest index
fn peak(counts: &[usize]) -> (usize, usize) {
    counts
        .iter()
        .copied()
        .enumerate()
        .fold((0, 0), |best, (i, c)| if c > best.1 { (i, c) } else { best })
}
