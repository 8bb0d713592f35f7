// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The durable substrate the other components read and write through: session layout
//! discovery, per-case record persistence, the append-only dependency index, the selection
//! cache, the resource pool file, and the collaborator contracts (`Discoverer`/`Reporter`)
//! through which a full tool integrates with discovery and reporting.
//!
//! Grounded in `_canary/repo.py` and the `.canary/` layout described in §6.

mod cache;
mod collab;
mod index;
mod layout;
mod resource_pool;
mod store;

pub use cache::{SelectionCache, Selection};
pub use collab::{Discoverer, JsonDiscoverer, JsonlReporter, PlainReporter, Reporter, TestEvent};
pub use index::DependencyIndex;
pub use layout::SessionLayout;
pub use resource_pool::load_resource_pool_file;
pub use store::CaseStore;
