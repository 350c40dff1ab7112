pub mod audit;
pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod jupiter;
pub mod keystore;
pub mod monitoring;
pub mod notifier;
pub mod scheduler;
pub mod store;
pub mod strategy;
pub mod trigger_daemon;

#[cfg(test)]
pub(crate) mod testing;
