//! Data models for bars, feature snapshots, fills, and positions.

mod bar;
mod fill;
mod position;
mod snapshot;

pub use bar::Bar;
pub use fill::{group_by_order, Fill, LogicalFill, Side};
pub use position::{ExitReason, Position, PositionState};
pub use snapshot::{FeatureSnapshot, Regime};

#[cfg(test)]
pub(crate) use fill::make_fill;
