//! Lifecycle of a reconfigurable detection surface.

use serde::Serialize;
use std::fmt;

/// Lifecycle states.
///
/// ```text
/// Unconfigured --base definitions--> ConfiguredInactive
/// ConfiguredInactive --enabled rules--> Active
/// Active --empty or disabling config--> ConfiguredInactive
/// any --stop--> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Unconfigured,
    ConfiguredInactive,
    Active,
    Destroyed,
}

impl Lifecycle {
    pub fn is_active(self) -> bool {
        self == Lifecycle::Active
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Unconfigured => "unconfigured",
            Lifecycle::ConfiguredInactive => "configured_inactive",
            Lifecycle::Active => "active",
            Lifecycle::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Lifecycle state plus the sticky readiness flag.
///
/// Readiness turns on the first time base definitions and at least one
/// enabled rule have been compiled, survives later inactive states and is
/// cleared only by [`Lifecycle::Destroyed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleState {
    state: Lifecycle,
    ready: bool,
}

impl LifecycleState {
    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Base definitions were accepted. `active` tells whether rules are in use.
    pub fn configured(&mut self, active: bool) {
        self.state = if active {
            self.ready = true;
            Lifecycle::Active
        } else {
            Lifecycle::ConfiguredInactive
        };
    }

    pub fn destroy(&mut self) {
        self.state = Lifecycle::Destroyed;
        self.ready = false;
    }
}
