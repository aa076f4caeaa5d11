// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

#![deny(clippy::all)]

pub mod action;
pub mod actions;
pub mod daemon;
pub mod driver;
pub mod drivers;
pub mod errors;
pub mod input;
pub mod logging;
pub mod sysfs;
pub mod upower;

pub use power_profiles_zbus::{Profile, ProfileMask};

pub static DBUS_NAME: &str = "net.hadess.PowerProfiles";
pub static DBUS_PATH: &str = "/net/hadess/PowerProfiles";
pub static DBUS_IFACE: &str = "net.hadess.PowerProfiles";
