pub mod audit;
pub mod config;
pub mod logger;
pub mod sqlite;
