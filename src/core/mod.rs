//! Core domain: token rotation, storage and configuration

pub mod auth;
pub mod config;
pub mod db;
