pub mod bus;
pub mod change_signal;
pub mod config;
pub mod db;
pub mod logging;
pub mod repositories;
pub mod stores;
