//! Channel Manager, Response Manager, and the Request/Response engine
//! (spec.md §4.4, §4.5, §4.9).
//!
//! Depends only on `mycelia-core`: the `KernelLink`/`TimeoutEmitter` seams
//! defined there and here let `RequestEngine`/`ResponseManager` reach back
//! into the kernel without this crate depending on the `mycelia` facade.

pub mod channel;
pub mod request;
pub mod response;

pub use channel::{Channel, ChannelManager, RegisterChannelOpts};
pub use request::{CommandRequestBuilder, OneShotRequestBuilder, RequestEngine};
pub use response::{ResponseEntry, ResponseManager, TimeoutEmitter};
