pub mod builtin_providers;
pub mod config;
pub mod effects;
pub mod emotion;
pub mod ledger;
pub mod message;
pub mod prompt;
pub mod session;
pub mod store;
pub mod substitution;
