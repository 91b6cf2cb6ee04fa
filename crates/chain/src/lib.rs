//! Chain interaction layer.
//!
//! This crate provides the alloy-backed collaborators consumed by the
//! decision core:
//! - Typed cToken and comptroller contract bindings
//! - RPC chain reader with bounded-backoff retry
//! - Websocket event source with backfill and cToken log decoding
//! - Comptroller parameter and membership cache

mod comptroller;
mod ctoken;
mod listener;
mod reader;
mod retry;

pub use comptroller::RpcMarketRegistry;
pub use ctoken::{ctoken_signatures, IComptroller, ICToken};
pub use listener::{decode_log, WsEventSource};
pub use reader::RpcChainReader;
