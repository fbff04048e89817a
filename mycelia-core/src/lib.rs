//! Shared types for Mycelia: `Message`/`MessagePool`, the path grammar, the
//! security core (`Principal`/`PKR`/`RWS`/`Identity`), the closed error
//! taxonomy, and layered configuration.
//!
//! This crate has no dependency on the kernel, router, or scheduler — those
//! live in the `mycelia` facade crate and depend on this one, not the other
//! way around. The `security::KernelLink` trait is the seam that lets
//! `IdentityHandle` reach back into the kernel without an upward dependency.

pub mod config;
pub mod error;
pub mod message;
pub mod path;
pub mod security;

pub use error::{MyceliaError, Result};
pub use message::{FixedMeta, Message, MessageMeta, MessagePool, MessageType, MutableMeta, PoolStats};
pub use path::{Path, Pattern, PatternSegment};
