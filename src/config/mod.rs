//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `RAGKB_WORK_DIR` and `RAGKB_LOG_LEVEL` env overrides.
//!
//! # Module layout
//!
//! - **types** — Public configuration structs consumed by the rest of the
//!   crate (`Config`, `ModelGatewayConfig`, `RetrievalConfig`, …).
//! - **raw** — Raw TOML deserialization types (`RawConfig`, `RawRetrieval`,
//!   …). These mirror the file shape and use serde defaults; kept private.
//! - **load** — Loading logic: `merge_toml`, `load_raw_merged`, `load`,
//!   `load_from`, `expand_home`.

mod load;
mod raw;
mod types;

pub use load::{expand_home, load, load_from};
pub use types::*;
