pub mod db;
pub mod engine;
pub mod models;
pub mod strategy;

#[cfg(test)]
mod tests;

pub use db::BacktestDb;
pub use engine::BacktestEngine;
pub use models::*;
pub use strategy::Strategy;
