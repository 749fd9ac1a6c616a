//! Cosmic Daily library
//!
//! Fetches NASA's Astronomy Picture of the Day and keeps it usable offline:
//! a record cache with a one hour freshness window, a bounded image cache and
//! an in-memory translation cache, coordinated by `FetchOrchestrator`.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod orchestrator;
