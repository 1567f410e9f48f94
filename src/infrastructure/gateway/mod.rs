pub mod binance;

pub use binance::BinanceFuturesGateway;
