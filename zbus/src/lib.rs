// SPDX-License-Identifier: MPL-2.0

//! Shared wire types and the client-side proxy for `net.hadess.PowerProfiles`.

use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use zvariant::{OwnedValue, Type};

/// A power profile users can select.
///
/// `Unset` only appears at parse sites and during startup; it is never a
/// valid active profile.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, Type)]
#[serde(rename_all = "kebab-case")]
#[zvariant(signature = "s")]
pub enum Profile {
    Unset,
    /// The battery saving profile.
    PowerSaver,
    /// The default profile.
    #[default]
    Balanced,
    /// As fast as possible, without regard for noise or battery consumption.
    /// Only available on some systems.
    Performance,
}

impl Profile {
    /// The concrete profiles, in the fixed order they are published.
    pub const CONCRETE: [Profile; 3] = [Profile::PowerSaver, Profile::Balanced, Profile::Performance];

    /// Parses a canonical profile name. Unknown names yield `Unset`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "power-saver" => Profile::PowerSaver,
            "balanced" => Profile::Balanced,
            "performance" => Profile::Performance,
            _ => Profile::Unset,
        }
    }

    /// The canonical name of the profile; empty for `Unset`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Unset => "",
            Profile::PowerSaver => "power-saver",
            Profile::Balanced => "balanced",
            Profile::Performance => "performance",
        }
    }

    /// The capability bit of this profile; empty for `Unset`.
    #[must_use]
    pub fn mask(self) -> ProfileMask {
        match self {
            Profile::Unset => ProfileMask::empty(),
            Profile::PowerSaver => ProfileMask::POWER_SAVER,
            Profile::Balanced => ProfileMask::BALANCED,
            Profile::Performance => ProfileMask::PERFORMANCE,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

bitflags! {
    /// The set of profiles a driver is able to activate.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ProfileMask: u8 {
        const POWER_SAVER = 1 << 0;
        const BALANCED = 1 << 1;
        const PERFORMANCE = 1 << 2;
    }
}

impl ProfileMask {
    /// The profiles every bound driver must cover.
    pub const MANDATORY: ProfileMask = ProfileMask::POWER_SAVER.union(ProfileMask::BALANCED);

    /// `true` iff the mask names exactly one profile.
    #[must_use]
    pub fn has_single_flag(self) -> bool { self.bits().count_ones() == 1 }
}

#[zbus::proxy(
    interface = "net.hadess.PowerProfiles",
    default_service = "net.hadess.PowerProfiles",
    default_path = "/net/hadess/PowerProfiles"
)]
pub trait PowerProfiles {
    /// ActiveProfile property
    #[zbus(property)]
    fn active_profile(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn set_active_profile(&self, profile: &str) -> zbus::Result<()>;

    /// PerformanceInhibited property; empty when performance is not inhibited
    #[zbus(property)]
    fn performance_inhibited(&self) -> zbus::Result<String>;

    /// Profiles property: one {Profile, Driver} record per supported profile
    #[zbus(property)]
    fn profiles(&self) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;

    /// Actions property
    #[zbus(property)]
    fn actions(&self) -> zbus::Result<Vec<String>>;
}
