//! Exchange and chat clients behind the trading ports.

mod binance_client;
mod telegram;
mod types;

pub use binance_client::BinanceClient;
pub use telegram::notifier_from_env;
