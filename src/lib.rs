pub mod app_error;
pub mod app_state;
pub mod bootstrap;
pub mod config;
pub mod gateway;
pub mod models;
pub mod reconcile;
pub mod routes;
pub mod store;
