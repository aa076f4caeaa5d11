// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Driver for the ACPI platform profile sysfs interface.
//!
//! For information about this kernel feature, see the following:
//!
//! - Platform Profile Selection:
//!  - https://www.kernel.org/doc/html/latest/userspace-api/sysfs-platform_profile.html
//! - Available Platform Profiles:
//!  - https://mjmwired.net/kernel/Documentation/ABI/testing/sysfs-platform_profile

use crate::{
    driver::{Driver, EventSender, ProbeResult},
    errors::DriverError,
    sysfs,
};
use power_profiles_zbus::{Profile, ProfileMask};
use std::path::PathBuf;

const DRIVER_NAME: &str = "platform_profile";
const ACPI_DIR: &str = "firmware/acpi";
const PROFILE_ATTR: &str = "platform_profile";
const CHOICES_ATTR: &str = "platform_profile_choices";

/// The firmware token for a profile. The three profiles map onto the
/// standard platform profile names.
fn acpi_token(profile: Profile) -> Option<&'static str> {
    match profile {
        Profile::PowerSaver => Some("low-power"),
        Profile::Balanced => Some("balanced"),
        Profile::Performance => Some("performance"),
        Profile::Unset => None,
    }
}

fn profile_for_token(token: &str) -> Profile {
    match token {
        "low-power" => Profile::PowerSaver,
        "balanced" => Profile::Balanced,
        "performance" => Profile::Performance,
        _ => Profile::Unset,
    }
}

pub struct PlatformProfile {
    root: PathBuf,
    events: EventSender,
    profiles: ProfileMask,
    activated: Option<Profile>,
    _appearance_monitor: Option<sysfs::Monitor>,
}

impl PlatformProfile {
    pub fn new(events: EventSender) -> Self { Self::with_root(sysfs::root().to_owned(), events) }

    pub fn with_root(root: PathBuf, events: EventSender) -> Self {
        Self {
            root,
            events,
            profiles: ProfileMask::all(),
            activated: None,
            _appearance_monitor: None,
        }
    }

    fn attribute(&self) -> PathBuf { self.root.join(ACPI_DIR).join(PROFILE_ATTR) }
}

impl Driver for PlatformProfile {
    fn driver_name(&self) -> &'static str { DRIVER_NAME }

    fn profiles(&self) -> ProfileMask { self.profiles }

    fn probe(&mut self, preferred: &mut Profile) -> ProbeResult {
        let attribute = self.attribute();

        if !attribute.exists() {
            // The interface may appear once the platform module loads; watch
            // for it and ask for a new probe sequence when it does.
            let acpi_dir = self.root.join(ACPI_DIR);
            if !acpi_dir.is_dir() {
                log::debug!("didn't find an ACPI platform profile");
                return ProbeResult::Fail;
            }

            let events = self.events.clone();
            match sysfs::Monitor::appearance(&acpi_dir, PROFILE_ATTR, move || {
                events.probe_request(DRIVER_NAME);
            }) {
                Ok(monitor) => {
                    log::debug!("deferring probe until {} appears", attribute.display());
                    self._appearance_monitor = Some(monitor);
                    return ProbeResult::Defer;
                }
                Err(why) => {
                    log::debug!("failed to watch {}: {}", acpi_dir.display(), why);
                    return ProbeResult::Fail;
                }
            }
        }

        let choices = match sysfs::read_trimmed(self.root.join(ACPI_DIR).join(CHOICES_ATTR)) {
            Ok(choices) => choices,
            Err(why) => {
                log::debug!("failed to read platform profile choices: {}", why);
                return ProbeResult::Fail;
            }
        };

        let mut advertised = ProfileMask::empty();
        for token in choices.split_whitespace() {
            advertised |= profile_for_token(token).mask();
        }

        if !advertised.contains(ProfileMask::MANDATORY) {
            log::debug!("platform profile choices '{}' lack low-power or balanced", choices);
            return ProbeResult::Fail;
        }

        self.profiles = advertised;

        // Start from whatever profile the firmware is currently in.
        if let Ok(value) = sysfs::read_trimmed(&attribute) {
            let current = profile_for_token(&value);
            if current != Profile::Unset {
                *preferred = current;
                self.activated = Some(current);
            }
        }

        log::debug!("found an ACPI platform profile with choices '{}'", choices);
        ProbeResult::Ok
    }

    fn activate_profile(&mut self, profile: Profile) -> Result<(), DriverError> {
        if self.activated == Some(profile) {
            return Ok(());
        }

        let token = acpi_token(profile).ok_or(DriverError::Unsupported(profile))?;
        let path = self.attribute();
        sysfs::write(&path, token).map_err(|source| DriverError::Write {
            path,
            value: token.to_owned(),
            source,
        })?;

        self.activated = Some(profile);
        Ok(())
    }
}
