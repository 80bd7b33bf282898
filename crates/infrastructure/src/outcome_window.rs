//! 调用结果滑动窗口
//!
//! 按时间跨度保留最近的调用结果，过期记录在每次记录或查询时惰性淘汰。

use std::collections::VecDeque;
use std::time::Duration;

use courier_domain::OutcomeKind;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub at: Instant,
    pub kind: OutcomeKind,
}

#[derive(Debug, Clone)]
pub struct OutcomeWindow {
    span: Duration,
    minimum_calls: usize,
    records: VecDeque<OutcomeRecord>,
}

impl OutcomeWindow {
    pub fn new(span: Duration, minimum_calls: usize) -> Self {
        Self {
            span,
            minimum_calls,
            records: VecDeque::new(),
        }
    }

    pub fn record(&mut self, kind: OutcomeKind) {
        self.record_at(Instant::now(), kind);
    }

    pub fn record_at(&mut self, at: Instant, kind: OutcomeKind) {
        self.evict(at);
        self.records.push_back(OutcomeRecord { at, kind });
    }

    /// Failure percentage (0–100) over the window, or `None` below `minimum_calls`.
    pub fn failure_rate(&mut self) -> Option<f64> {
        self.failure_rate_at(Instant::now())
    }

    pub fn failure_rate_at(&mut self, now: Instant) -> Option<f64> {
        self.evict(now);
        let samples = self.records.len();
        if samples == 0 || samples < self.minimum_calls {
            return None;
        }
        let failures = self.records.iter().filter(|r| r.kind.is_failure()).count();
        Some(failures as f64 * 100.0 / samples as f64)
    }

    pub fn sample_count(&mut self) -> usize {
        self.evict(Instant::now());
        self.records.len()
    }

    pub fn slow_call_count(&mut self) -> usize {
        self.evict(Instant::now());
        self.records
            .iter()
            .filter(|r| r.kind == OutcomeKind::SlowCall)
            .count()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    fn evict(&mut self, now: Instant) {
        // 记录按时间追加，只需检查队头
        while let Some(front) = self.records.front() {
            if now.saturating_duration_since(front.at) < self.span {
                break;
            }
            self.records.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_rate_undefined_below_minimum_calls() {
        let mut window = OutcomeWindow::new(Duration::from_secs(10), 5);
        let now = Instant::now();

        for kind in [
            OutcomeKind::Failure,
            OutcomeKind::Failure,
            OutcomeKind::Failure,
            OutcomeKind::Success,
        ] {
            window.record_at(now, kind);
            assert_eq!(window.failure_rate_at(now), None);
        }

        // 第 minimum_calls 个样本时失败率才有定义
        window.record_at(now, OutcomeKind::Success);
        assert_eq!(window.failure_rate_at(now), Some(60.0));
    }

    #[test]
    fn test_slow_call_counts_as_failure() {
        let mut window = OutcomeWindow::new(Duration::from_secs(10), 2);
        window.record(OutcomeKind::SlowCall);
        window.record(OutcomeKind::Success);

        assert_eq!(window.failure_rate(), Some(50.0));
        assert_eq!(window.slow_call_count(), 1);
        assert_eq!(window.sample_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_outcomes_are_evicted() {
        let mut window = OutcomeWindow::new(Duration::from_secs(10), 1);
        window.record(OutcomeKind::Failure);
        window.record(OutcomeKind::Failure);

        tokio::time::advance(Duration::from_secs(6)).await;
        window.record(OutcomeKind::Success);
        assert_eq!(window.sample_count(), 3);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(window.sample_count(), 1);
        assert_eq!(window.failure_rate(), Some(0.0));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(window.failure_rate(), None);
    }

    #[test]
    fn test_clear() {
        let mut window = OutcomeWindow::new(Duration::from_secs(10), 1);
        window.record(OutcomeKind::Failure);
        window.clear();
        assert_eq!(window.sample_count(), 0);
        assert_eq!(window.failure_rate(), None);
    }
}
