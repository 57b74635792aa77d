//! Realized P&L accounting and period reports.

mod fifo;
mod report;

pub use report::{start_of_day, start_of_year, TradingReport};
