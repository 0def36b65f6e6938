//! Data plane components
//!
//! Per-frame dispatch for both translator roles, the tables it consults and
//! the worker threads that drive it.

mod arena;
pub mod backend;
mod client_table;
pub mod front;
mod policy;
mod policy_cache;
pub mod proxy;
mod server_table;
pub mod worker;

pub use arena::{Arena, FlowAddr, Link};
pub use backend::{BackendEgress, BackendIngress, BackendShared, EgressMode, ServerInfo};
pub use client_table::{ClientEntry, ClientTable};
pub use front::FrontEngine;
pub use policy::{FamilyPolicy, PolicyTable, Rule};
pub use policy_cache::{Binding, CacheEntry, EntryState, PolicyCache};
pub use server_table::{ServerEntry, ServerId, ServerStatus, ServerTable};
pub use worker::{PacketEngine, Ready, WorkerHandle};
