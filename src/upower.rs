// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! AC adapter observation through the power-supply class.

use crate::sysfs;
use std::path::{Path, PathBuf};

/// The `online` attributes of every mains power supply under the given sysfs
/// root, in name order.
pub fn mains_supplies(root: &Path) -> Vec<PathBuf> {
    let mut supplies = Vec::new();

    let base = root.join("class/power_supply");
    let Ok(entries) = std::fs::read_dir(&base) else {
        log::debug!("no power supplies found under {}", base.display());
        return supplies;
    };

    for entry in entries.flatten() {
        let device = entry.path();
        let kind = sysfs::read_trimmed(device.join("type")).unwrap_or_default();
        if kind == "Mains" && device.join("online").exists() {
            supplies.push(device.join("online"));
        }
    }

    supplies.sort();
    supplies
}

/// Whether the machine currently runs on battery. A machine without any
/// mains supply is treated as externally powered.
pub fn on_battery(online: &[PathBuf]) -> bool {
    if online.is_empty() {
        return false;
    }

    !online.iter().any(|supply| sysfs::read_trimmed(supply).is_ok_and(|value| value == "1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn add_supply(root: &Path, name: &str, kind: &str, online: Option<&str>) {
        let device = root.join("class/power_supply").join(name);
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("type"), format!("{}\n", kind)).unwrap();
        if let Some(online) = online {
            fs::write(device.join("online"), format!("{}\n", online)).unwrap();
        }
    }

    #[test]
    fn batteries_are_not_mains_supplies() {
        let dir = tempfile::tempdir().unwrap();
        add_supply(dir.path(), "BAT0", "Battery", None);
        add_supply(dir.path(), "AC", "Mains", Some("1"));

        let supplies = mains_supplies(dir.path());
        assert_eq!(supplies, vec![dir.path().join("class/power_supply/AC/online")]);
    }

    #[test]
    fn on_battery_follows_the_online_attribute() {
        let dir = tempfile::tempdir().unwrap();
        add_supply(dir.path(), "AC", "Mains", Some("1"));

        let supplies = mains_supplies(dir.path());
        assert!(!on_battery(&supplies));

        fs::write(&supplies[0], "0\n").unwrap();
        assert!(on_battery(&supplies));
    }

    #[test]
    fn desktops_without_mains_count_as_powered() {
        assert!(!on_battery(&[]));
    }
}
