//! Rolling-window indicator accumulators.
//!
//! Maintained incrementally as the simulation advances, one price per step,
//! instead of re-reducing the full price history on every evaluation. Values
//! are `None` until the window has filled.

use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Rolling mean over a fixed window, updated with a running sum.
#[derive(Debug, Clone)]
pub struct RollingMean {
    window: usize,
    values: VecDeque<Decimal>,
    sum: Decimal,
}

impl RollingMean {
    pub fn new(window: usize) -> Self {
        assert!(window >= 1, "window must be >= 1");
        Self {
            window,
            values: VecDeque::with_capacity(window),
            sum: Decimal::ZERO,
        }
    }

    pub fn push(&mut self, value: Decimal) {
        self.values.push_back(value);
        self.sum += value;
        if self.values.len() > self.window {
            if let Some(leaving) = self.values.pop_front() {
                self.sum -= leaving;
            }
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        if self.values.len() < self.window {
            return None;
        }
        Some(self.sum / Decimal::from(self.window as u64))
    }
}

/// Which extremum a [`RollingExtremum`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtremumKind {
    Highest,
    Lowest,
}

/// Rolling highest/lowest value over a fixed window.
#[derive(Debug, Clone)]
pub struct RollingExtremum {
    kind: ExtremumKind,
    window: usize,
    values: VecDeque<Decimal>,
}

impl RollingExtremum {
    pub fn new(kind: ExtremumKind, window: usize) -> Self {
        assert!(window >= 1, "window must be >= 1");
        Self {
            kind,
            window,
            values: VecDeque::with_capacity(window),
        }
    }

    pub fn push(&mut self, value: Decimal) {
        self.values.push_back(value);
        if self.values.len() > self.window {
            self.values.pop_front();
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        if self.values.len() < self.window {
            return None;
        }
        match self.kind {
            ExtremumKind::Highest => self.values.iter().copied().max(),
            ExtremumKind::Lowest => self.values.iter().copied().min(),
        }
    }
}
