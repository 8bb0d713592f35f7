// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! Multi-node, typed resource accounting.

mod pool;
mod request;

pub use pool::{NodeSpec, ResourceInstance, ResourcePool, SlotSpec};
pub use request::{AcquiredItem, Acquisition, AcquisitionGroup, RequestGroup, RequestItem, ResourceRequest};
