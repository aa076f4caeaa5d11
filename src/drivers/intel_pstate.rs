// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Driver for the energy/performance preference of intel_pstate (and
//! compatible) cpufreq policies.

use crate::{
    driver::{Driver, ProbeResult},
    errors::DriverError,
    sysfs, upower,
};
use power_profiles_zbus::{Profile, ProfileMask};
use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

const DRIVER_NAME: &str = "intel_pstate";
const POLICY_DIR: &str = "devices/system/cpu/cpufreq";
const PREFERENCE_ATTR: &str = "energy_performance_preference";

/// The preference written for a profile. Balanced leans towards power on
/// battery and towards performance on mains.
///
/// `energy_performance_available_preferences` is not consulted, as all the
/// values are always available.
fn preference(profile: Profile, on_battery: bool) -> Option<&'static str> {
    match profile {
        Profile::PowerSaver => Some("power"),
        Profile::Balanced => Some(if on_battery { "balance_power" } else { "balance_performance" }),
        Profile::Performance => Some("performance"),
        Profile::Unset => None,
    }
}

struct Inner {
    /// The preference attribute of every cpufreq policy.
    devices: Vec<PathBuf>,
    on_battery: AtomicBool,
    activated: Mutex<Profile>,
}

impl Inner {
    fn write_preference(&self, profile: Profile) -> Result<(), DriverError> {
        let value = preference(profile, self.on_battery.load(Ordering::SeqCst))
            .ok_or(DriverError::Unsupported(profile))?;

        for path in &self.devices {
            sysfs::write(path, value).map_err(|source| DriverError::Write {
                path: path.clone(),
                value: value.to_owned(),
                source,
            })?;
        }

        *self.activated.lock().unwrap_or_else(PoisonError::into_inner) = profile;
        Ok(())
    }

    /// Re-tunes the balanced preference after a power supply change.
    fn supply_changed(&self, supplies: &[PathBuf]) {
        let on_battery = upower::on_battery(supplies);
        let was_on_battery = self.on_battery.swap(on_battery, Ordering::SeqCst);

        log::debug!(
            "battery status changed from {} to {}",
            if was_on_battery { "on battery" } else { "on mains" },
            if on_battery { "on battery" } else { "on mains" }
        );

        let activated = *self.activated.lock().unwrap_or_else(PoisonError::into_inner);
        if activated == Profile::Balanced {
            if let Err(why) = self.write_preference(Profile::Balanced) {
                log::warn!("failed to re-tune the balanced preference: {}", why);
            }
        }
    }
}

pub struct IntelPstate {
    root: PathBuf,
    inner: Option<Arc<Inner>>,
    _supply_monitors: Vec<sysfs::Monitor>,
}

impl IntelPstate {
    pub fn new() -> Self { Self::with_root(sysfs::root().to_owned()) }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root, inner: None, _supply_monitors: Vec::new() }
    }
}

impl Default for IntelPstate {
    fn default() -> Self { Self::new() }
}

impl Driver for IntelPstate {
    fn driver_name(&self) -> &'static str { DRIVER_NAME }

    fn profiles(&self) -> ProfileMask { ProfileMask::all() }

    fn probe(&mut self, _preferred: &mut Profile) -> ProbeResult {
        let mut devices = Vec::new();

        if let Ok(entries) = fs::read_dir(self.root.join(POLICY_DIR)) {
            for entry in entries.flatten() {
                let path = entry.path().join(PREFERENCE_ATTR);
                if path.exists() {
                    devices.push(path);
                }
            }
        }

        if devices.is_empty() {
            log::debug!("didn't find p-state settings");
            return ProbeResult::Fail;
        }

        devices.sort();

        let inner = Arc::new(Inner {
            devices,
            on_battery: AtomicBool::new(false),
            activated: Mutex::new(Profile::Unset),
        });

        let supplies = upower::mains_supplies(&self.root);
        inner.on_battery.store(upower::on_battery(&supplies), Ordering::SeqCst);

        for supply in &supplies {
            let inner = inner.clone();
            let supplies = supplies.clone();
            match sysfs::Monitor::attribute(supply, move || inner.supply_changed(&supplies)) {
                Ok(monitor) => self._supply_monitors.push(monitor),
                Err(why) => log::warn!("failed to monitor {}: {}", supply.display(), why),
            }
        }

        self.inner = Some(inner);
        log::debug!("found p-state settings");
        ProbeResult::Ok
    }

    fn activate_profile(&mut self, profile: Profile) -> Result<(), DriverError> {
        let inner = self.inner.as_ref().ok_or(DriverError::NotProbed)?;

        if *inner.activated.lock().unwrap_or_else(PoisonError::into_inner) == profile {
            return Ok(());
        }

        inner.write_preference(profile)
    }
}
