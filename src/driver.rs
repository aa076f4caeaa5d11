// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! The contract every hardware profile driver satisfies.

use crate::errors::DriverError;
use power_profiles_zbus::{Profile, ProfileMask};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Outcome of probing a driver for its hardware.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProbeResult {
    /// The driver bound to its hardware and is ready to activate profiles.
    Ok,
    /// The hardware may appear later; the driver emits [`Event::ProbeRequest`]
    /// when it does.
    Defer,
    /// The hardware is not present; the driver is discarded.
    Fail,
}

/// Events drivers publish to the mediation core.
#[derive(Debug)]
pub enum Event {
    /// The hardware switched profiles out from under the daemon, e.g. through
    /// a hotkey or a firmware policy.
    ProfileChanged { driver: &'static str, profile: Profile },
    /// The driver's performance inhibition reason changed.
    PerformanceInhibitedChanged { driver: &'static str },
    /// A deferred driver's hardware appeared; the whole probe sequence must
    /// be restarted.
    ProbeRequest { driver: &'static str },
}

/// The publisher half of the driver event channel, handed to every driver at
/// construction. Sending never blocks; events are drained by the daemon's
/// main loop.
#[derive(Clone)]
pub struct EventSender(UnboundedSender<Event>);

impl EventSender {
    pub fn channel() -> (Self, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    pub fn profile_changed(&self, driver: &'static str, profile: Profile) {
        let _ = self.0.send(Event::ProfileChanged { driver, profile });
    }

    pub fn performance_inhibited_changed(&self, driver: &'static str) {
        let _ = self.0.send(Event::PerformanceInhibitedChanged { driver });
    }

    pub fn probe_request(&self, driver: &'static str) {
        let _ = self.0.send(Event::ProbeRequest { driver });
    }
}

/// A hardware backend mapping the power profiles onto a concrete control
/// surface.
///
/// A driver's life cycle is `Unprobed -> Probing -> {Ready, Deferred,
/// Rejected}`; a deferred driver re-enters `Probing` through the probe
/// sequence restart, and `Ready` is terminal until teardown.
pub trait Driver: Send {
    /// A stable identifier for the driver.
    fn driver_name(&self) -> &'static str;

    /// The profiles this driver is able to activate. May be refined by a
    /// successful probe, and is never empty afterwards.
    fn profiles(&self) -> ProfileMask;

    /// Looks for the driver's hardware. On success the driver may overwrite
    /// `preferred` with the profile the hardware is currently in, which
    /// becomes the daemon's starting profile.
    fn probe(&mut self, preferred: &mut Profile) -> ProbeResult;

    /// Applies a profile to the hardware. The profile is in [`Self::profiles`],
    /// and re-activating the current profile is a no-op. Failures are
    /// reported but never abort a transition.
    fn activate_profile(&mut self, profile: Profile) -> Result<(), DriverError>;

    /// Why performance is inhibited, as a short machine-readable token; empty
    /// when it is not. Only drivers claiming the performance profile report
    /// a reason, and they emit [`Event::PerformanceInhibitedChanged`] on
    /// every change.
    fn performance_inhibited(&self) -> String { String::new() }
}
