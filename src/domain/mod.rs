pub mod audit;
pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod identity;
pub mod pagination;
pub mod repository;
