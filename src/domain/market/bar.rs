use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV observation. Immutable once constructed.
///
/// Invariant (enforced by `BarFrame::push`): timestamps are monotonically
/// increasing and never duplicated within a frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// An ordered, deduplicated sequence of bars for a single symbol/timeframe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BarFrame {
    bars: Vec<Bar>,
}

impl BarFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bars(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp_ms);
        bars.dedup_by_key(|b| b.timestamp_ms);
        Self { bars }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn max_timestamp(&self) -> Option<i64> {
        self.bars.last().map(|b| b.timestamp_ms)
    }

    /// Append a bar, dropping it silently if its timestamp is already present.
    /// Keeps the frame sorted; callers are expected to push in roughly
    /// chronological order (the pagination loop always does).
    pub fn push(&mut self, bar: Bar) {
        if self.bars.iter().any(|b| b.timestamp_ms == bar.timestamp_ms) {
            return;
        }
        self.bars.push(bar);
        self.bars.sort_by_key(|b| b.timestamp_ms);
    }

    pub fn extend(&mut self, bars: impl IntoIterator<Item = Bar>) {
        for bar in bars {
            self.push(bar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(ts: i64) -> Bar {
        Bar {
            timestamp_ms: ts,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(10),
        }
    }

    #[test]
    fn dedup_and_sort_on_construction() {
        let frame = BarFrame::from_bars(vec![bar(300), bar(100), bar(200), bar(100)]);
        let timestamps: Vec<i64> = frame.bars().iter().map(|b| b.timestamp_ms).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[test]
    fn push_ignores_duplicate_timestamp() {
        let mut frame = BarFrame::new();
        frame.push(bar(100));
        frame.push(bar(100));
        assert_eq!(frame.len(), 1);
    }
}
