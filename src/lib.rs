//! A security-constrained dispatch engine for wholesale electricity markets.
#![warn(missing_docs)]
pub mod bilevel;
pub mod config;
pub mod constraint;
pub mod dispatch;
pub mod fcas;
pub mod id;
pub mod input;
pub mod interconnector;
pub mod log;
pub mod market;
pub mod output;
pub mod region;
pub mod service;
pub mod unit;
pub mod units;
pub mod validate;

#[cfg(test)]
mod fixture;
