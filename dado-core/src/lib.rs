//! # dado-core
//!
//! Core library for dado - a daemon that fetches the interesting parts of a
//! dashcam's footage.
//!
//! This library provides:
//! - Domain types for catalog items, activity requests, and the processing cursor
//! - Motion detection: thumbnail scoring and the activity classifier
//! - Manual requests from marker files
//! - The DDPAI camera client
//! - SQLite state (cursor and request log)
//! - Configuration management and logging
//!
//! ## Pipeline
//!
//! Each polling cycle lists the camera's recordings, drops those already
//! behind the processing cursor, scores the remaining thumbnails, and lets
//! the [`ActivityClassifier`] turn the scores into activity requests. The
//! requests are matched against the catalog, downloaded, and merged.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dado_core::{Config, Database};
//! use dado_core::camera::DdpaiCamera;
//! use dado_core::poller::PollCoordinator;
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let camera = DdpaiCamera::new(config.camera.clone()).expect("failed to create client");
//! let mut coordinator = PollCoordinator::new(config, camera, &db);
//! let result = coordinator.run_cycle().expect("cycle failed");
//! println!("{} requests handled", result.handled.len());
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{CursorStore, Database, MemoryCursorStore};
pub use error::{Error, Result};
pub use motion::{ActivityClassifier, Classification, ClassifierState};
pub use poller::{CycleResult, PollCoordinator};
pub use requests::match_requests;
pub use types::*;

// Public modules
pub mod camera;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod media;
pub mod motion;
pub mod paths;
pub mod poller;
pub mod requests;
pub mod types;
