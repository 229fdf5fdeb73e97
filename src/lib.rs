pub mod config;
pub mod database_ops;
pub mod env_boot;
pub mod error;
pub mod logging;
pub mod models;
pub mod normalization;

pub mod util {
    pub mod db;
    pub mod env;
}
