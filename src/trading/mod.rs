//! Trading logic: signal evaluation, concurrency guard, exit monitoring,
//! retry policy, and the per-symbol lifecycle.

mod config;
mod guard;
mod lifecycle;
mod ports;
mod retry;
mod risk;
mod signal;

#[cfg(test)]
pub(crate) mod testing;

pub use config::TradingConfig;
pub use guard::ConcurrencyGuard;
pub use lifecycle::{Lifecycle, RunOutcome};
pub use ports::{EventLogger, ExecutionGateway, FeatureSource, Notifier, PositionStore};
pub use risk::RiskThrottle;

#[cfg(test)]
pub use lifecycle::INSUFFICIENT_DATA;
