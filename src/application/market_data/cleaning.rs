use crate::domain::market::{Bar, Timeframe};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::{Data, OrderStatistics};
use std::collections::HashMap;

const OUTLIER_THRESHOLD: f64 = 3.5;
const OUTLIER_WINDOW: usize = 20;

/// `clean(bars, timeframe)`: dedups by timestamp, reindexes onto the
/// timeframe's regular grid (forward-filling OHLC/volume for any gap),
/// removes outliers via a rolling modified z-score, then forward/back-fills
/// whatever the outlier pass blanked out.
pub fn clean(bars: &[Bar], timeframe: Timeframe) -> Vec<Bar> {
    if bars.is_empty() {
        return Vec::new();
    }

    let deduped = dedup_sorted(bars);
    let grid = reindex_to_grid(&deduped, timeframe);
    let filtered = remove_outliers(grid);
    fill_gaps(filtered)
}

fn dedup_sorted(bars: &[Bar]) -> Vec<Bar> {
    let mut sorted: Vec<Bar> = bars.to_vec();
    sorted.sort_by_key(|b| b.timestamp_ms);
    sorted.dedup_by_key(|b| b.timestamp_ms);
    sorted
}

/// One slot of the regular timeframe grid: a known timestamp, paired with
/// the bar observed there (if any survived dedup/outlier removal).
struct Slot {
    timestamp_ms: i64,
    bar: Option<Bar>,
}

fn reindex_to_grid(bars: &[Bar], timeframe: Timeframe) -> Vec<Slot> {
    if bars.is_empty() {
        return Vec::new();
    }
    let interval = timeframe.interval_ms();
    let start = bars[0].timestamp_ms;
    let end = bars[bars.len() - 1].timestamp_ms;

    let by_ts: HashMap<i64, Bar> = bars.iter().map(|b| (b.timestamp_ms, *b)).collect();

    let mut grid = Vec::new();
    let mut ts = start;
    while ts <= end {
        grid.push(Slot {
            timestamp_ms: ts,
            bar: by_ts.get(&ts).copied(),
        });
        ts += interval;
    }
    grid
}

/// Rolling modified z-score outlier removal on `close`:
/// `0.6745 * (x - median) / MAD`, flagged when |z| exceeds the threshold.
fn remove_outliers(mut grid: Vec<Slot>) -> Vec<Slot> {
    let closes: Vec<Option<f64>> = grid.iter().map(|s| s.bar.and_then(|b| b.close.to_f64())).collect();

    let mut to_clear = Vec::new();
    for i in 0..grid.len() {
        let Some(close) = closes[i] else { continue };
        let lo = i.saturating_sub(OUTLIER_WINDOW);
        let hi = (i + OUTLIER_WINDOW + 1).min(closes.len());
        let window: Vec<f64> = closes[lo..hi]
            .iter()
            .enumerate()
            .filter(|(j, _)| lo + j != i)
            .filter_map(|(_, v)| *v)
            .collect();

        if window.len() < 3 {
            continue;
        }

        let median = Data::new(window.clone()).median();
        let abs_deviations: Vec<f64> = window.iter().map(|v| (v - median).abs()).collect();
        let mad = Data::new(abs_deviations).median();
        if mad == 0.0 {
            continue;
        }

        let modified_z = 0.6745 * (close - median) / mad;
        if modified_z.abs() > OUTLIER_THRESHOLD {
            to_clear.push(i);
        }
    }

    for i in to_clear {
        grid[i].bar = None;
    }
    grid
}

/// Forward-fill, then back-fill, any gap left by reindexing or outlier
/// removal. A filled slot is a flat bar at the gap's own timestamp, OHLC
/// equal to the donor's close, volume zero.
fn fill_gaps(mut grid: Vec<Slot>) -> Vec<Bar> {
    let mut last: Option<Bar> = None;
    for slot in grid.iter_mut() {
        match slot.bar {
            Some(bar) => last = Some(bar),
            None => {
                if let Some(donor) = last {
                    slot.bar = Some(flat_bar(donor, slot.timestamp_ms));
                }
            }
        }
    }

    let mut next: Option<Bar> = None;
    for slot in grid.iter_mut().rev() {
        match slot.bar {
            Some(bar) => next = Some(bar),
            None => {
                if let Some(donor) = next {
                    slot.bar = Some(flat_bar(donor, slot.timestamp_ms));
                }
            }
        }
    }

    grid.into_iter().filter_map(|s| s.bar).collect()
}

fn flat_bar(donor: Bar, timestamp_ms: i64) -> Bar {
    Bar {
        timestamp_ms,
        open: donor.close,
        high: donor.close,
        low: donor.close,
        close: donor.close,
        volume: Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(ts: i64, close: Decimal) -> Bar {
        Bar {
            timestamp_ms: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn dedups_duplicate_timestamps() {
        let bars = vec![bar(1000, dec!(100)), bar(1000, dec!(101)), bar(2000, dec!(102))];
        let deduped = dedup_sorted(&bars);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn clean_on_empty_input_returns_empty() {
        assert!(clean(&[], Timeframe::M15).is_empty());
    }

    #[test]
    fn clean_preserves_bar_count_on_dense_input() {
        let interval = Timeframe::M15.interval_ms();
        let bars: Vec<Bar> = (0..10).map(|i| bar(i * interval, dec!(100))).collect();
        let cleaned = clean(&bars, Timeframe::M15);
        assert_eq!(cleaned.len(), 10);
    }

    #[test]
    fn clean_fills_a_missing_grid_slot() {
        let interval = Timeframe::M15.interval_ms();
        let bars = vec![bar(0, dec!(100)), bar(2 * interval, dec!(101))];
        let cleaned = clean(&bars, Timeframe::M15);
        assert_eq!(cleaned.len(), 3);
        assert_eq!(cleaned[1].close, dec!(100));
    }
}
