// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Slows down battery charging while in the power-saver profile, for
//! batteries whose firmware exposes a charge type.

use crate::{action::Action, errors::ActionError, sysfs};
use power_profiles_zbus::Profile;
use std::{fs, path::PathBuf};

const ACTION_NAME: &str = "trickle_charge";
const CHARGE_TYPE_ATTR: &str = "charge_type";

fn charge_type(profile: Profile) -> &'static str {
    if profile == Profile::PowerSaver {
        "Trickle"
    } else {
        "Fast"
    }
}

pub struct TrickleCharge {
    root: PathBuf,
    batteries: Vec<PathBuf>,
    activated: Option<Profile>,
}

impl TrickleCharge {
    pub fn new() -> Self { Self::with_root(sysfs::root().to_owned()) }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root, batteries: Vec::new(), activated: None }
    }
}

impl Default for TrickleCharge {
    fn default() -> Self { Self::new() }
}

impl Action for TrickleCharge {
    fn action_name(&self) -> &'static str { ACTION_NAME }

    fn probe(&mut self) -> bool {
        self.batteries.clear();

        if let Ok(entries) = fs::read_dir(self.root.join("class/power_supply")) {
            for entry in entries.flatten() {
                let attr = entry.path().join(CHARGE_TYPE_ATTR);
                if attr.exists() {
                    self.batteries.push(attr);
                }
            }
        }

        self.batteries.sort();
        !self.batteries.is_empty()
    }

    fn activate_profile(&mut self, profile: Profile) -> Result<(), ActionError> {
        if self.activated == Some(profile) {
            return Ok(());
        }

        let value = charge_type(profile);
        for path in &self.batteries {
            sysfs::write(path, value).map_err(|source| ActionError::Write {
                path: path.clone(),
                value: value.to_owned(),
                source,
            })?;
        }

        self.activated = Some(profile);
        Ok(())
    }
}
