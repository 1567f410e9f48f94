pub mod core;
pub mod decision_source;
pub mod gateway;
pub mod observability;
pub mod persistence;
