// src/lib.rs

//! Hospital schedule import: spreadsheet requirements plus scraped
//! assignments into a STAGING schedule version, then batch coverage.

pub mod config;
pub mod db;
pub mod models;
pub mod ods;
pub mod repository;
pub mod scrape;
pub mod services;
pub mod validation;
