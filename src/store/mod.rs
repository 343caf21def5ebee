//! The aggregate store and everything that reads it.
//!
//! [`AggregateStore`] folds observations from many runs into one record per
//! (variable, level, valid time). [`derive`] synthesizes composite variables
//! once all runs are in, [`query`] turns the store into chart series and
//! [`wind`] combines wind components.

pub mod aggregate;
pub mod derive;
pub mod query;
pub mod wind;

pub use aggregate::{AggregateStore, MergeOutcome, StoreContext};
pub use derive::DerivationRules;
pub use query::{ChartClock, RangePoint, Series, ValuePoint, Window};
pub use wind::{WindPoint, WindTable};
