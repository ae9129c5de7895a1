pub mod registry;
pub mod traits;

// API provider implementations
pub mod coinmarketcap;
pub mod market_api;
pub mod ratesdb;
