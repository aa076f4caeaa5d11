// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! The contract for side-effect modules invoked on profile transitions.

use crate::errors::ActionError;
use power_profiles_zbus::Profile;

/// A module invoked on every profile transition for side effects unrelated
/// to CPU or firmware performance controls.
pub trait Action: Send {
    /// A stable identifier for the action.
    fn action_name(&self) -> &'static str;

    /// Looks for whatever the action drives. Cheap and synchronous.
    fn probe(&mut self) -> bool;

    /// Applies the action's side effect for a profile. Idempotent for
    /// repeated identical profiles; failures are logged and never roll back
    /// the profile transition.
    fn activate_profile(&mut self, profile: Profile) -> Result<(), ActionError>;
}
