//! # Schoolyard
//!
//! A multi-tenant school management server with live attendance ingestion,
//! usable both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! schoolyard = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use schoolyard::config::ServerConfig;
//! use schoolyard::server::{AppState, create_router};
//! use schoolyard::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::default();
//! let store = SqliteStore::new(config.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(Arc::new(store), config, None));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the `watch` and `sync` client commands and the
//!   HTTP feed source. Disable with `default-features = false`.

pub mod auth;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod live;
pub mod photos;
pub mod server;
pub mod store;
pub mod types;
