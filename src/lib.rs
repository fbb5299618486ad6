//! worldsync: real-time multi-client 3D scene coordination server.
//!
//! Session Store (C2) + Sync Protocol (C3) + World Registry (C4) + Connection
//! Hub (C5) behind a small set of capability facades (`facade.rs`), composed
//! by `Engine` (`engine.rs`). `client.rs` is the only module that touches a
//! live socket; everything else is testable without one.

pub mod asset;
pub mod broadcast;
pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod facade;
pub mod hub;
pub mod ids;
pub mod model;
pub mod seed;
pub mod store;
pub mod sync;
pub mod wire;
pub mod world;

pub use config::Config;
pub use engine::Engine;
