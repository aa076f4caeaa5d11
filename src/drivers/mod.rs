// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! The hardware profile drivers and the compiled-in probe registry.

pub mod fake;
pub mod intel_pstate;
pub mod lenovo_dytc;
pub mod placeholder;
pub mod platform_profile;

use crate::{
    action::Action,
    actions::trickle_charge::TrickleCharge,
    driver::{Driver, EventSender},
};

pub type DriverConstructor = Box<dyn Fn(EventSender) -> Box<dyn Driver> + Send + Sync>;
pub type ActionConstructor = Box<dyn Fn() -> Box<dyn Action> + Send + Sync>;

/// The ordered candidates walked on every probe sequence: drivers and
/// actions are registered separately so the probe loop needs no runtime
/// type checks.
pub struct Registry {
    pub drivers: Vec<DriverConstructor>,
    pub actions: Vec<ActionConstructor>,
}

impl Registry {
    /// The compiled-in registry: hardware-specific drivers first, the
    /// generic placeholder last.
    pub fn compiled_in() -> Self {
        Self {
            drivers: vec![
                Box::new(|events| Box::new(fake::FakeDriver::new(events)) as Box<dyn Driver>),
                Box::new(|events| {
                    Box::new(lenovo_dytc::LenovoDytc::new(events)) as Box<dyn Driver>
                }),
                Box::new(|events| {
                    Box::new(platform_profile::PlatformProfile::new(events)) as Box<dyn Driver>
                }),
                Box::new(|_| Box::new(intel_pstate::IntelPstate::new()) as Box<dyn Driver>),
                Box::new(|_| Box::new(placeholder::Placeholder::new()) as Box<dyn Driver>),
            ],
            actions: vec![Box::new(|| Box::new(TrickleCharge::new()) as Box<dyn Action>)],
        }
    }
}
