pub mod agg;
pub mod builder;
pub mod cache;
pub mod checks;
pub mod concerns;
pub mod config;
pub mod domain;
pub mod error;
pub mod frame;
pub mod identifier;
pub mod namer;
pub mod output;
pub mod query;
pub mod quick;
pub mod repair;
pub mod source;
pub mod stim;
pub mod store;
