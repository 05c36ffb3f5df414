pub mod client;
pub mod registry;
pub mod schedule;

pub use client::{PresenceClient, RegistryPolicy, is_live, merge_announcement};
pub use registry::{HttpRegistry, MemoryRegistry, RegistryDocument, RegistryStore, Snapshot};
pub use schedule::{PollPolicy, TaskGuard, spawn_discovery, spawn_heartbeat};
