//! elined - E-Line circuit daemon
//!
//! Provisions point-to-point Ethernet Virtual Circuits over an SDN-controlled
//! network and keeps them alive: flow synthesis for the chosen path,
//! primary/backup/dynamic path selection, pre-installed failover paths and a
//! periodic consistency check against control-plane traces.

pub mod clients;
pub mod config;
pub mod consistency;
pub mod context;
pub mod dynamic_path;
pub mod error;
pub mod events;
pub mod evc;
pub mod flows;
pub mod notify;
pub mod path;
pub mod registry;
pub mod scheduler;
pub mod topology;
pub mod trace;

#[cfg(test)]
mod testing;

pub use config::{ElineConfig, StoreBackend, DEFAULT_CONFIG_PATH};
pub use consistency::{ConsistencyLoop, SweepReport};
pub use context::{EvcContext, EvcSettings};
pub use dynamic_path::DynamicPathManager;
pub use error::{EvcError, Result};
pub use events::{DeferredEvent, EventRouter, TopologyEvent};
pub use evc::{Evc, EvcChanges, EvcDocument};
pub use notify::{EvcEvent, EvcEventKind, Notifier};
pub use path::Path;
pub use registry::{CircuitEntry, CircuitRegistry};
pub use topology::{TagAllocator, Topology, TopologyCache};
