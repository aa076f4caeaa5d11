// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Driver for the ThinkPad DYTC performance mode, with lap detection.
//!
//! The thinkpad_acpi platform device exposes `dytc_perfmode`; the firmware
//! also changes it behind our back when the user presses Fn+L/M/H, and the
//! lap proximity switch forbids running hot while the machine sits on a lap.

use crate::{
    driver::{Driver, EventSender, ProbeResult},
    errors::DriverError,
    input::{SwitchMonitor, SW_LAP_PROXIMITY},
    sysfs,
};
use power_profiles_zbus::{Profile, ProfileMask};
use std::{
    ffi::OsStr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

const DRIVER_NAME: &str = "lenovo_dytc";
const PERFMODE_ATTR: &str = "dytc_perfmode";
const LAP_SWITCH_NAME: &str = "Thinkpad proximity switches";
const INHIBITED_REASON: &str = "lap-detected";

fn perfmode_value(profile: Profile) -> Option<&'static str> {
    match profile {
        Profile::PowerSaver => Some("L"),
        Profile::Balanced => Some("M"),
        Profile::Performance => Some("H"),
        Profile::Unset => None,
    }
}

fn profile_for_perfmode(value: &str) -> Profile {
    match value.chars().next() {
        Some('L') => Profile::PowerSaver,
        Some('M') => Profile::Balanced,
        Some('H') => Profile::Performance,
        _ => {
            log::debug!("got unsupported perfmode value '{}'", value);
            Profile::Unset
        }
    }
}

struct Inner {
    lapmode: AtomicBool,
    /// Set while we write the attribute ourselves, so the monitor does not
    /// mistake our own write for a firmware change.
    self_write: AtomicBool,
    perfmode: Mutex<Profile>,
}

impl Inner {
    fn perfmode(&self) -> Profile { *self.perfmode.lock().unwrap_or_else(PoisonError::into_inner) }

    fn set_perfmode(&self, profile: Profile) {
        *self.perfmode.lock().unwrap_or_else(PoisonError::into_inner) = profile;
    }
}

pub struct LenovoDytc {
    root: PathBuf,
    events: EventSender,
    inner: Arc<Inner>,
    perfmode_path: Option<PathBuf>,
    _perfmode_monitor: Option<sysfs::Monitor>,
    _lap_monitor: Option<SwitchMonitor>,
}

impl LenovoDytc {
    pub fn new(events: EventSender) -> Self { Self::with_root(sysfs::root().to_owned(), events) }

    pub fn with_root(root: PathBuf, events: EventSender) -> Self {
        Self {
            root,
            events,
            inner: Arc::new(Inner {
                lapmode: AtomicBool::new(false),
                self_write: AtomicBool::new(false),
                perfmode: Mutex::new(Profile::Unset),
            }),
            perfmode_path: None,
            _perfmode_monitor: None,
            _lap_monitor: None,
        }
    }
}

impl Driver for LenovoDytc {
    fn driver_name(&self) -> &'static str { DRIVER_NAME }

    fn profiles(&self) -> ProfileMask { ProfileMask::all() }

    fn probe(&mut self, preferred: &mut Profile) -> ProbeResult {
        let Some(lap_switch) = sysfs::find_device(&self.root, "input", |device| {
            sysfs::read_trimmed(device.join("name")).is_ok_and(|name| name == LAP_SWITCH_NAME)
        }) else {
            log::debug!("could not find a lap proximity switch");
            return ProbeResult::Fail;
        };

        let Some(device) = sysfs::find_device(&self.root, "platform", |device| {
            device.file_name() == Some(OsStr::new("thinkpad_acpi"))
                && device.join(PERFMODE_ATTR).exists()
        }) else {
            log::debug!("could not find the {} sysfs attribute", PERFMODE_ATTR);
            return ProbeResult::Fail;
        };

        let lap_monitor = {
            let inner = self.inner.clone();
            let events = self.events.clone();
            SwitchMonitor::open(&lap_switch, SW_LAP_PROXIMITY, move |lapped| {
                if inner.lapmode.swap(lapped, Ordering::SeqCst) == lapped {
                    return;
                }
                log::debug!(
                    "dytc_lapmode is now {}, so performance is {}",
                    if lapped { "on" } else { "off" },
                    if lapped { "inhibited" } else { "uninhibited" }
                );
                events.performance_inhibited_changed(DRIVER_NAME);
            })
        };
        let lap_monitor = match lap_monitor {
            Ok(monitor) => monitor,
            Err(why) => {
                log::debug!("could not monitor the lap proximity switch: {}", why);
                return ProbeResult::Fail;
            }
        };

        let perfmode_path = device.join(PERFMODE_ATTR);

        // Start from the mode the firmware is currently in.
        if let Ok(value) = sysfs::read_trimmed(&perfmode_path) {
            let current = profile_for_perfmode(&value);
            if current != Profile::Unset {
                self.inner.set_perfmode(current);
                *preferred = current;
            }
        }

        let perfmode_monitor = {
            let inner = self.inner.clone();
            let events = self.events.clone();
            let path = perfmode_path.clone();
            sysfs::Monitor::attribute(&perfmode_path, move || {
                if inner.self_write.load(Ordering::SeqCst) {
                    return;
                }

                let Ok(value) = sysfs::read_trimmed(&path) else { return };
                let profile = profile_for_perfmode(&value);
                if profile == Profile::Unset || profile == inner.perfmode() {
                    return;
                }

                log::debug!("{} is now {}, so profile is {}", PERFMODE_ATTR, value, profile);
                inner.set_perfmode(profile);
                events.profile_changed(DRIVER_NAME, profile);
            })
        };
        match perfmode_monitor {
            Ok(monitor) => self._perfmode_monitor = Some(monitor),
            Err(why) => {
                log::debug!("could not monitor the {} attribute: {}", PERFMODE_ATTR, why);
                return ProbeResult::Fail;
            }
        }

        self._lap_monitor = Some(lap_monitor);
        self.perfmode_path = Some(perfmode_path);
        log::debug!("found a lap proximity switch and the {} attribute", PERFMODE_ATTR);
        ProbeResult::Ok
    }

    fn activate_profile(&mut self, profile: Profile) -> Result<(), DriverError> {
        let Some(path) = &self.perfmode_path else { return Err(DriverError::NotProbed) };

        if self.inner.perfmode() == profile {
            log::debug!("already in {} mode", profile);
            return Ok(());
        }

        if profile == Profile::Performance && self.inner.lapmode.load(Ordering::SeqCst) {
            log::debug!("can't switch to performance mode, lapmode is detected");
            return Err(DriverError::Inhibited);
        }

        let value = perfmode_value(profile).ok_or(DriverError::Unsupported(profile))?;

        self.inner.self_write.store(true, Ordering::SeqCst);
        let result = sysfs::write(path, value);
        self.inner.self_write.store(false, Ordering::SeqCst);

        result.map_err(|source| DriverError::Write {
            path: path.clone(),
            value: value.to_owned(),
            source,
        })?;

        self.inner.set_perfmode(profile);
        Ok(())
    }

    fn performance_inhibited(&self) -> String {
        if self.inner.lapmode.load(Ordering::SeqCst) {
            INHIBITED_REASON.to_owned()
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfmode_values_round_trip() {
        assert_eq!(perfmode_value(Profile::PowerSaver), Some("L"));
        assert_eq!(perfmode_value(Profile::Balanced), Some("M"));
        assert_eq!(perfmode_value(Profile::Performance), Some("H"));
        assert_eq!(perfmode_value(Profile::Unset), None);

        for profile in Profile::CONCRETE {
            assert_eq!(profile_for_perfmode(perfmode_value(profile).unwrap()), profile);
        }
    }

    #[test]
    fn unknown_perfmode_values_are_ignored() {
        assert_eq!(profile_for_perfmode(""), Profile::Unset);
        assert_eq!(profile_for_perfmode("X"), Profile::Unset);
    }

    #[test]
    fn probe_requires_the_lap_switch() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("bus/platform/devices/thinkpad_acpi");
        std::fs::create_dir_all(&device).unwrap();
        std::fs::write(device.join(PERFMODE_ATTR), "M\n").unwrap();

        let (events, _rx) = EventSender::channel();
        let mut driver = LenovoDytc::with_root(dir.path().to_owned(), events);
        let mut preferred = Profile::Balanced;
        assert_eq!(driver.probe(&mut preferred), ProbeResult::Fail);
    }

    #[test]
    fn activation_respects_lapmode() {
        let dir = tempfile::tempdir().unwrap();
        let perfmode = dir.path().join(PERFMODE_ATTR);
        std::fs::write(&perfmode, "M\n").unwrap();

        let (events, _rx) = EventSender::channel();
        let mut driver = LenovoDytc::with_root(dir.path().to_owned(), events);
        driver.perfmode_path = Some(perfmode.clone());
        driver.inner.set_perfmode(Profile::Balanced);
        driver.inner.lapmode.store(true, Ordering::SeqCst);

        assert!(matches!(
            driver.activate_profile(Profile::Performance),
            Err(DriverError::Inhibited)
        ));
        assert_eq!(driver.performance_inhibited(), INHIBITED_REASON);

        driver.activate_profile(Profile::PowerSaver).unwrap();
        assert_eq!(std::fs::read_to_string(&perfmode).unwrap(), "L");

        driver.inner.lapmode.store(false, Ordering::SeqCst);
        assert!(driver.performance_inhibited().is_empty());
        driver.activate_profile(Profile::Performance).unwrap();
        assert_eq!(std::fs::read_to_string(&perfmode).unwrap(), "H");
    }
}
