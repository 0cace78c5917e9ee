//! Admin backend for the showcase landing page
//!
//! Normalizes uploaded images to fixed-size JPEG tiles, stores them in
//! S3-compatible object storage, and manages the projects, clients, contact
//! submissions and newsletter subscribers that reference them.

pub mod app;
pub mod auth;
pub mod catalog;
pub mod error;
pub mod image;
pub mod mime;
pub mod models;
pub mod pipeline;
pub mod records;
pub mod storage;

pub use error::{Error, ErrorKind, Result};
