//! Accumulator: a running total
//!
//! Increments are stored as integer billionths so that totals add up
//! exactly regardless of the order peers apply them in.

use gink_core::proto::ChangeBuilder;
use gink_core::{Behavior, Bundler, Error, Muid, Result, Value, INT_INF};

use super::{container_facade, entry_in, Container};
use crate::clock::GenericTimestamp;

/// Billionths per unit.
pub const BILLION: f64 = 1_000_000_000.0;

container_facade!(
    /// Running total of increments.
    Accumulator,
    Behavior::Accumulator
);

impl Accumulator {
    /// Add `amount` (may be negative).
    pub fn increment(&self, amount: f64, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let billionths = (amount * BILLION).round();
        if !billionths.is_finite() || billionths.abs() >= i64::MAX as f64 {
            return Err(Error::InvalidValue(format!("can't accumulate {amount}")));
        }
        self.increment_billionths(billionths as i64, bundler)
    }

    /// Add an exact amount of billionths.
    pub fn increment_billionths(&self, billionths: i64, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let mut entry = entry_in(self.muid, Behavior::Accumulator);
        entry.value = Some(Value::Int(billionths).to_builder());
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Exact total as of a time.
    ///
    /// The current total is kept even by stores that don't retain entries;
    /// totals in the past need entry history.
    pub fn get_billionths(&self, as_of: impl Into<GenericTimestamp>) -> Result<i128> {
        let as_of = match as_of.into() {
            GenericTimestamp::Now => INT_INF,
            other => self.db.resolve_timestamp(other)?,
        };
        self.db.store().get_billionths(self.muid(), as_of)
    }

    /// Total as of a time.
    pub fn get(&self, as_of: impl Into<GenericTimestamp>) -> Result<f64> {
        Ok(self.get_billionths(as_of)? as f64 / BILLION)
    }

    /// Bring the total back to zero by adding its negation.
    pub fn zero(&self, bundler: Option<&mut Bundler>) -> Result<Option<Muid>> {
        let current = self.get_billionths(GenericTimestamp::Now)?;
        if current == 0 {
            return Ok(None);
        }
        let negated = i64::try_from(-current)
            .map_err(|_| Error::InvalidValue(format!("total {current} too large to negate")))?;
        self.increment_billionths(negated, bundler).map(Some)
    }
}
