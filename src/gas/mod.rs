//! Gas price oracle cache

mod price;
mod station;

pub use price::{GasPrice, GasPriority};
pub use station::{GasSnapshot, GasStation};
