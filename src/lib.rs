#![forbid(unsafe_code)]

pub mod cleanup;
pub mod config;
pub mod database;
pub mod eligibility;
pub mod error;
pub mod matching;
pub mod models;
pub mod notify;
pub mod ordering;
pub mod repository;
pub mod service;
pub mod transaction;
pub mod utils;

#[cfg(test)]
mod testing;
