pub mod api;
pub mod auth;
pub mod broker;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
