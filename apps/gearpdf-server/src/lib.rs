//! GearPDF Server Library
//!
//! A stateless HTTP service that shrinks PDF uploads with Ghostscript and an
//! in-process lopdf pass.
//! The binary in main.rs wires configuration, logging and the listener.
//!
//! # Modules
//!
//! - `upload`: file intake, validation and per-request workspaces
//! - `compress`: the `Compressor` seam, Ghostscript, the lopdf pass and the
//!   job service
//! - `response`: streaming the result back and cleaning up

pub mod compress;
pub mod config;
pub mod error;
pub mod response;
pub mod routes;
pub mod state;
pub mod upload;

pub use routes::app;
