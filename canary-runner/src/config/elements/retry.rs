// Copyright (c) The canary Contributors
// SPDX-License-Identifier: MIT

//! The retry ceiling for batch resubmission (§4.3, §9 Open Question (c)).

use serde::{Deserialize, Serialize};

/// The source hard-codes this at 3; we keep that as the default but make it configurable,
/// which is the resolution of Open Question (c).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetryCeiling(pub u32);

impl Default for RetryCeiling {
    fn default() -> Self {
        Self(3)
    }
}
