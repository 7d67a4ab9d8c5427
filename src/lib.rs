pub mod config;
pub mod migration;
mod orm;
pub mod short_code;
pub mod url_repo;
pub mod url_service;
