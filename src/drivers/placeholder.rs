// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! The catch-all driver bound when no hardware driver matched. It drives no
//! hardware and only carries the mandatory profiles.

use crate::{
    driver::{Driver, ProbeResult},
    errors::DriverError,
};
use power_profiles_zbus::{Profile, ProfileMask};

const DRIVER_NAME: &str = "placeholder";

#[derive(Default)]
pub struct Placeholder {
    activated: Option<Profile>,
}

impl Placeholder {
    pub fn new() -> Self { Self::default() }
}

impl Driver for Placeholder {
    fn driver_name(&self) -> &'static str { DRIVER_NAME }

    fn profiles(&self) -> ProfileMask { ProfileMask::MANDATORY }

    fn probe(&mut self, _preferred: &mut Profile) -> ProbeResult { ProbeResult::Ok }

    fn activate_profile(&mut self, profile: Profile) -> Result<(), DriverError> {
        if self.activated == Some(profile) {
            return Ok(());
        }

        self.activated = Some(profile);
        Ok(())
    }
}
