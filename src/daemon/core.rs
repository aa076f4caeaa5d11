// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! The mediation core: probe sequencing, the driver/action registry, the
//! profile state machine and the inhibition policy.

use crate::{
    action::Action,
    driver::{Driver, Event, EventSender, ProbeResult},
    drivers::Registry,
    errors::{RequestError, StartupError},
};
use bitflags::bitflags;
use power_profiles_zbus::{Profile, ProfileMask};
use tokio::sync::mpsc::UnboundedReceiver;

bitflags! {
    /// The DBus properties a state change touched. The caller republishes
    /// exactly these after the change has been committed.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PropertiesMask: u8 {
        const ACTIVE_PROFILE = 1 << 0;
        const PERFORMANCE_INHIBITED = 1 << 1;
        const PROFILES = 1 << 2;
        const ACTIONS = 1 << 3;
    }
}

/// Why a profile transition is happening.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ActivationReason {
    /// A client asked for it over DBus.
    User,
    /// The driver reported that the hardware already switched.
    Internal,
    /// Performance became inhibited and the profile is forced down.
    Inhibition,
    /// Initial synchronization of the hardware after a probe.
    Reset,
}

impl ActivationReason {
    fn as_str(self) -> &'static str {
        match self {
            ActivationReason::User => "user request",
            ActivationReason::Internal => "internal change",
            ActivationReason::Inhibition => "inhibition",
            ActivationReason::Reset => "reset",
        }
    }
}

/// The daemon state: one bound driver, the probed actions, and the drivers
/// waiting for their hardware.
pub struct PowerDaemon {
    registry: Registry,
    events: EventSender,
    active_profile: Profile,
    driver: Option<Box<dyn Driver>>,
    deferred_drivers: Vec<Box<dyn Driver>>,
    actions: Vec<Box<dyn Action>>,
    started: bool,
}

impl PowerDaemon {
    pub fn new(registry: Registry) -> (Self, UnboundedReceiver<Event>) {
        let (events, receiver) = EventSender::channel();

        let daemon = Self {
            registry,
            events,
            active_profile: Profile::Balanced,
            driver: None,
            deferred_drivers: Vec::new(),
            actions: Vec::new(),
            started: false,
        };

        (daemon, receiver)
    }

    /// Whether a valid driver set has been installed at least once.
    pub fn started(&self) -> bool { self.started }

    /// Walks the registry, binding the first driver whose probe succeeds and
    /// every action whose probe succeeds. Returns the properties to publish,
    /// or the packaging error that must take the daemon down.
    pub fn start_profile_drivers(&mut self) -> Result<PropertiesMask, StartupError> {
        let mut preferred = self.active_profile;

        for constructor in &self.registry.drivers {
            let mut driver = constructor(self.events.clone());
            log::debug!("handling driver '{}'", driver.driver_name());

            if let Some(bound) = &self.driver {
                log::debug!(
                    "driver '{}' already probed, skipping driver '{}'",
                    bound.driver_name(),
                    driver.driver_name()
                );
                continue;
            }

            if driver.profiles().is_empty() {
                log::warn!("profile driver '{}' implements no valid profiles", driver.driver_name());
                continue;
            }

            match driver.probe(&mut preferred) {
                ProbeResult::Fail => {
                    log::debug!("probe() failed for driver '{}', skipping", driver.driver_name());
                }
                ProbeResult::Defer => {
                    log::debug!("driver '{}' deferred, waiting for its hardware", driver.driver_name());
                    self.deferred_drivers.push(driver);
                }
                ProbeResult::Ok => self.driver = Some(driver),
            }
        }

        for constructor in &self.registry.actions {
            let mut action = constructor();
            log::debug!("handling action '{}'", action.action_name());

            if action.probe() {
                self.actions.push(action);
            } else {
                log::debug!("probe() failed for action '{}', skipping", action.action_name());
            }
        }

        let driver = self.driver.as_ref().ok_or(StartupError::NoDriver)?;
        if !driver.profiles().contains(ProfileMask::MANDATORY) {
            return Err(StartupError::MissingMandatoryProfiles(driver.driver_name()));
        }

        if preferred != self.active_profile {
            log::debug!("using '{}' as current profile from probed driver", preferred);
            self.active_profile = preferred;
        }

        if !driver.profiles().contains(self.active_profile.mask()) {
            log::warn!(
                "driver '{}' does not support profile '{}', falling back to '{}'",
                driver.driver_name(),
                self.active_profile,
                Profile::Balanced
            );
            self.active_profile = Profile::Balanced;
        }

        // Force the hardware in sync with the software state.
        let initial = self.active_profile;
        self.activate_target_profile(initial, ActivationReason::Reset);
        self.started = true;

        Ok(PropertiesMask::all())
    }

    fn stop_profile_drivers(&mut self) {
        self.deferred_drivers.clear();
        self.actions.clear();
        self.driver = None;
    }

    fn activate_target_profile(&mut self, target: Profile, reason: ActivationReason) {
        log::debug!(
            "setting active profile '{}' for reason '{}' (current: '{}')",
            target,
            reason.as_str(),
            self.active_profile
        );

        if let Some(driver) = &mut self.driver {
            if let Err(why) = driver.activate_profile(target) {
                log::warn!("failed to activate driver '{}': {}", driver.driver_name(), why);
            }
        }

        for action in &mut self.actions {
            if let Err(why) = action.activate_profile(target) {
                log::warn!(
                    "failed to activate action '{}' for profile '{}': {}",
                    action.action_name(),
                    target,
                    why
                );
            }
        }

        self.active_profile = target;
    }

    /// Handles an `ActiveProfile` write from a client. Failures leave the
    /// state untouched.
    pub fn set_active_profile(&mut self, name: &str) -> Result<PropertiesMask, RequestError> {
        let target = Profile::from_name(name);
        if target == Profile::Unset {
            return Err(RequestError::InvalidProfile(name.to_owned()));
        }

        let supported = self.driver.as_ref().map_or(ProfileMask::empty(), |driver| driver.profiles());
        if !supported.contains(target.mask()) {
            return Err(RequestError::InvalidProfile(name.to_owned()));
        }

        if target == Profile::Performance && !self.performance_inhibited().is_empty() {
            return Err(RequestError::ProfileInhibited(name.to_owned()));
        }

        if target == self.active_profile {
            log::debug!("profile '{}' was already active", target);
            return Ok(PropertiesMask::empty());
        }

        log::debug!(
            "transitioning active profile from '{}' to '{}' by user request",
            self.active_profile,
            target
        );

        self.activate_target_profile(target, ActivationReason::User);
        Ok(PropertiesMask::ACTIVE_PROFILE)
    }

    /// Dispatches a driver event. The error case only arises from a failed
    /// re-probe, which is fatal.
    pub fn handle_event(&mut self, event: Event) -> Result<PropertiesMask, StartupError> {
        match event {
            Event::ProfileChanged { driver, profile } => Ok(self.on_profile_changed(driver, profile)),
            Event::PerformanceInhibitedChanged { driver } => {
                Ok(self.on_performance_inhibited_changed(driver))
            }
            Event::ProbeRequest { driver } => self.on_probe_request(driver),
        }
    }

    fn on_profile_changed(&mut self, source: &'static str, profile: Profile) -> PropertiesMask {
        let Some(driver) = &self.driver else { return PropertiesMask::empty() };

        if driver.driver_name() != source {
            log::warn!("ignoring profile change from unbound driver '{}'", source);
            return PropertiesMask::empty();
        }

        log::debug!(
            "driver '{}' switched internally to profile '{}' (current: '{}')",
            source,
            profile,
            self.active_profile
        );

        if !profile.mask().has_single_flag() || !driver.profiles().contains(profile.mask()) {
            log::warn!("driver '{}' reported unsupported profile '{}', ignoring", source, profile);
            return PropertiesMask::empty();
        }

        if profile == self.active_profile {
            return PropertiesMask::empty();
        }

        self.activate_target_profile(profile, ActivationReason::Internal);
        PropertiesMask::ACTIVE_PROFILE
    }

    fn on_performance_inhibited_changed(&mut self, source: &'static str) -> PropertiesMask {
        let Some(driver) = &self.driver else { return PropertiesMask::empty() };

        if driver.driver_name() != source {
            log::warn!("ignoring inhibition change from unbound driver '{}'", source);
            return PropertiesMask::empty();
        }

        if !driver.profiles().contains(ProfileMask::PERFORMANCE) {
            log::warn!("ignored inhibition change on non-performance driver '{}'", source);
            return PropertiesMask::empty();
        }

        let inhibited = !driver.performance_inhibited().is_empty();

        let mut mask = PropertiesMask::PERFORMANCE_INHIBITED;
        if inhibited && self.active_profile == Profile::Performance {
            self.activate_target_profile(Profile::Balanced, ActivationReason::Inhibition);
            mask |= PropertiesMask::ACTIVE_PROFILE;
        }

        // Clearing the inhibition never restores performance; the user has
        // to ask for it again.
        mask
    }

    fn on_probe_request(&mut self, source: &'static str) -> Result<PropertiesMask, StartupError> {
        if !self.deferred_drivers.iter().any(|driver| driver.driver_name() == source) {
            log::warn!("ignoring probe request from unknown driver '{}'", source);
            return Ok(PropertiesMask::empty());
        }

        log::debug!("driver '{}' requested a new probe sequence", source);
        self.stop_profile_drivers();
        self.start_profile_drivers()
    }

    pub fn active_profile(&self) -> Profile { self.active_profile }

    /// The inhibition reason published over DBus. Empty when performance is
    /// not inhibited, or when the driver does not claim the performance
    /// profile at all.
    pub fn performance_inhibited(&self) -> String {
        match &self.driver {
            Some(driver) if driver.profiles().contains(ProfileMask::PERFORMANCE) => {
                driver.performance_inhibited()
            }
            _ => String::new(),
        }
    }

    /// The supported profiles with the driver providing them, in the fixed
    /// publication order.
    pub fn profiles(&self) -> Vec<(Profile, &'static str)> {
        let Some(driver) = &self.driver else { return Vec::new() };

        let supported = driver.profiles();
        Profile::CONCRETE
            .iter()
            .copied()
            .filter(|profile| supported.contains(profile.mask()))
            .map(|profile| (profile, driver.driver_name()))
            .collect()
    }

    /// The probed action names, in probe order.
    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|action| action.action_name().to_owned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        actions::trickle_charge::TrickleCharge,
        drivers::{placeholder::Placeholder, ActionConstructor, DriverConstructor},
        errors::{ActionError, DriverError},
    };
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex, PoisonError,
        },
    };

    #[derive(Default)]
    struct DriverState {
        probe_results: Mutex<VecDeque<ProbeResult>>,
        probed_with: Mutex<Vec<Profile>>,
        initial: Mutex<Option<Profile>>,
        inhibited: Mutex<String>,
        /// The profile the fake hardware is currently in; activation skips
        /// the write when it already matches.
        hardware: Mutex<Profile>,
        writes: Mutex<Vec<Profile>>,
        fail_activate: AtomicBool,
    }

    impl DriverState {
        fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
            mutex.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn writes(&self) -> Vec<Profile> { Self::lock(&self.writes).clone() }

        fn set_hardware(&self, profile: Profile) { *Self::lock(&self.hardware) = profile; }

        fn set_inhibited(&self, reason: &str) { *Self::lock(&self.inhibited) = reason.to_owned(); }
    }

    struct TestDriver {
        name: &'static str,
        profiles: ProfileMask,
        state: Arc<DriverState>,
    }

    impl Driver for TestDriver {
        fn driver_name(&self) -> &'static str { self.name }

        fn profiles(&self) -> ProfileMask { self.profiles }

        fn probe(&mut self, preferred: &mut Profile) -> ProbeResult {
            DriverState::lock(&self.state.probed_with).push(*preferred);

            let result = DriverState::lock(&self.state.probe_results)
                .pop_front()
                .unwrap_or(ProbeResult::Ok);

            if result == ProbeResult::Ok {
                if let Some(initial) = *DriverState::lock(&self.state.initial) {
                    *preferred = initial;
                }
            }

            result
        }

        fn activate_profile(&mut self, profile: Profile) -> Result<(), DriverError> {
            if self.state.fail_activate.load(Ordering::SeqCst) {
                return Err(DriverError::NotProbed);
            }

            if *DriverState::lock(&self.state.hardware) != profile {
                DriverState::lock(&self.state.writes).push(profile);
                *DriverState::lock(&self.state.hardware) = profile;
            }

            Ok(())
        }

        fn performance_inhibited(&self) -> String {
            DriverState::lock(&self.state.inhibited).clone()
        }
    }

    #[derive(Default)]
    struct ActionState {
        probes: AtomicBool,
        activations: Mutex<Vec<Profile>>,
    }

    struct TestAction {
        name: &'static str,
        state: Arc<ActionState>,
    }

    impl Action for TestAction {
        fn action_name(&self) -> &'static str { self.name }

        fn probe(&mut self) -> bool { self.state.probes.load(Ordering::SeqCst) }

        fn activate_profile(&mut self, profile: Profile) -> Result<(), ActionError> {
            DriverState::lock(&self.state.activations).push(profile);
            Ok(())
        }
    }

    fn driver(name: &'static str, profiles: ProfileMask, state: &Arc<DriverState>) -> DriverConstructor {
        let state = state.clone();
        Box::new(move |_| Box::new(TestDriver { name, profiles, state: state.clone() }) as Box<dyn Driver>)
    }

    fn action(name: &'static str, state: &Arc<ActionState>) -> ActionConstructor {
        let state = state.clone();
        Box::new(move || Box::new(TestAction { name, state: state.clone() }) as Box<dyn Action>)
    }

    fn state_with_probes(results: &[ProbeResult]) -> Arc<DriverState> {
        let state = Arc::new(DriverState::default());
        *DriverState::lock(&state.probe_results) = results.iter().copied().collect();
        // Fresh hardware is in no profile yet, so the initial reset writes.
        *DriverState::lock(&state.hardware) = Profile::Unset;
        state
    }

    fn registry(drivers: Vec<DriverConstructor>, actions: Vec<ActionConstructor>) -> Registry {
        Registry { drivers, actions }
    }

    /// No hardware driver matches: the placeholder binds with the two
    /// mandatory profiles and no actions.
    #[test]
    fn placeholder_binds_as_last_resort() {
        let empty = tempfile::tempdir().unwrap();
        let trickle_root = empty.path().to_owned();
        let registry = registry(
            vec![Box::new(|_| Box::new(Placeholder::new()) as Box<dyn Driver>)],
            vec![Box::new(move || {
                Box::new(TrickleCharge::with_root(trickle_root.clone())) as Box<dyn Action>
            })],
        );

        let (mut daemon, _events) = PowerDaemon::new(registry);
        assert_eq!(daemon.start_profile_drivers().unwrap(), PropertiesMask::all());

        assert!(daemon.started());
        assert_eq!(daemon.active_profile(), Profile::Balanced);
        assert_eq!(daemon.performance_inhibited(), "");
        assert_eq!(
            daemon.profiles(),
            vec![(Profile::PowerSaver, "placeholder"), (Profile::Balanced, "placeholder")]
        );
        assert!(daemon.action_names().is_empty());
    }

    /// The first driver probing Ok wins; later candidates are never probed
    /// or activated.
    #[test]
    fn first_successful_probe_wins() {
        let failing = state_with_probes(&[ProbeResult::Fail]);
        let winner = state_with_probes(&[ProbeResult::Ok]);
        let shadowed = state_with_probes(&[ProbeResult::Ok]);

        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![
                driver("failing", ProfileMask::all(), &failing),
                driver("winner", ProfileMask::all(), &winner),
                driver("shadowed", ProfileMask::all(), &shadowed),
            ],
            Vec::new(),
        ));

        daemon.start_profile_drivers().unwrap();

        assert_eq!(daemon.profiles()[0].1, "winner");
        assert!(DriverState::lock(&shadowed.probed_with).is_empty());
        assert!(shadowed.writes().is_empty());
        assert_eq!(winner.writes(), vec![Profile::Balanced]);
    }

    /// A user switch activates the driver once and reports the property.
    #[test]
    fn user_switch_reaches_the_hardware() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) =
            PowerDaemon::new(registry(vec![driver("test", ProfileMask::all(), &state)], Vec::new()));
        daemon.start_profile_drivers().unwrap();

        let mask = daemon.set_active_profile("performance").unwrap();
        assert_eq!(mask, PropertiesMask::ACTIVE_PROFILE);
        assert_eq!(daemon.active_profile(), Profile::Performance);
        assert_eq!(state.writes(), vec![Profile::Balanced, Profile::Performance]);
    }

    /// An unknown profile name fails without touching any state.
    #[test]
    fn invalid_profile_names_are_rejected() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) =
            PowerDaemon::new(registry(vec![driver("test", ProfileMask::all(), &state)], Vec::new()));
        daemon.start_profile_drivers().unwrap();

        assert!(matches!(
            daemon.set_active_profile("turbo"),
            Err(RequestError::InvalidProfile(_))
        ));
        assert_eq!(daemon.active_profile(), Profile::Balanced);
        assert_eq!(state.writes(), vec![Profile::Balanced]);
    }

    /// A profile outside the driver's mask is rejected, keeping the active
    /// profile within the supported set.
    #[test]
    fn unsupported_profiles_are_rejected() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![driver("test", ProfileMask::MANDATORY, &state)],
            Vec::new(),
        ));
        daemon.start_profile_drivers().unwrap();

        assert!(matches!(
            daemon.set_active_profile("performance"),
            Err(RequestError::InvalidProfile(_))
        ));
        assert_eq!(daemon.active_profile(), Profile::Balanced);
    }

    /// Setting the already-active profile succeeds without property changes
    /// or action invocations.
    #[test]
    fn repeated_requests_are_idempotent() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let action_state = Arc::new(ActionState::default());
        action_state.probes.store(true, Ordering::SeqCst);

        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![driver("test", ProfileMask::all(), &state)],
            vec![action("charge", &action_state)],
        ));
        daemon.start_profile_drivers().unwrap();

        let before = DriverState::lock(&action_state.activations).len();
        let mask = daemon.set_active_profile("balanced").unwrap();

        assert!(mask.is_empty());
        assert_eq!(DriverState::lock(&action_state.activations).len(), before);
        assert_eq!(state.writes(), vec![Profile::Balanced]);
    }

    /// Actions run after the driver on every transition, in probe order.
    #[test]
    fn actions_follow_every_transition() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let action_state = Arc::new(ActionState::default());
        action_state.probes.store(true, Ordering::SeqCst);

        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![driver("test", ProfileMask::all(), &state)],
            vec![action("charge", &action_state)],
        ));
        daemon.start_profile_drivers().unwrap();

        daemon.set_active_profile("power-saver").unwrap();

        assert_eq!(daemon.action_names(), vec!["charge".to_owned()]);
        assert_eq!(
            *DriverState::lock(&action_state.activations),
            vec![Profile::Balanced, Profile::PowerSaver]
        );
    }

    /// Becoming inhibited while in performance forces a demotion to
    /// balanced; clearing the inhibition does not restore performance.
    #[test]
    fn inhibition_demotes_performance() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) =
            PowerDaemon::new(registry(vec![driver("test", ProfileMask::all(), &state)], Vec::new()));
        daemon.start_profile_drivers().unwrap();

        daemon.set_active_profile("performance").unwrap();

        state.set_inhibited("lap-detected");
        let mask = daemon
            .handle_event(Event::PerformanceInhibitedChanged { driver: "test" })
            .unwrap();

        assert_eq!(mask, PropertiesMask::PERFORMANCE_INHIBITED | PropertiesMask::ACTIVE_PROFILE);
        assert_eq!(daemon.active_profile(), Profile::Balanced);
        assert_eq!(daemon.performance_inhibited(), "lap-detected");

        assert!(matches!(
            daemon.set_active_profile("performance"),
            Err(RequestError::ProfileInhibited(_))
        ));

        state.set_inhibited("");
        let mask = daemon
            .handle_event(Event::PerformanceInhibitedChanged { driver: "test" })
            .unwrap();

        assert_eq!(mask, PropertiesMask::PERFORMANCE_INHIBITED);
        assert_eq!(daemon.active_profile(), Profile::Balanced);
    }

    /// Inhibition while outside performance only republishes the reason.
    #[test]
    fn inhibition_outside_performance_changes_no_profile() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) =
            PowerDaemon::new(registry(vec![driver("test", ProfileMask::all(), &state)], Vec::new()));
        daemon.start_profile_drivers().unwrap();

        state.set_inhibited("lap-detected");
        let mask = daemon
            .handle_event(Event::PerformanceInhibitedChanged { driver: "test" })
            .unwrap();

        assert_eq!(mask, PropertiesMask::PERFORMANCE_INHIBITED);
        assert_eq!(daemon.active_profile(), Profile::Balanced);
    }

    /// Inhibition events from drivers that do not claim performance are
    /// anomalies and ignored.
    #[test]
    fn inhibition_on_non_performance_driver_is_ignored() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![driver("test", ProfileMask::MANDATORY, &state)],
            Vec::new(),
        ));
        daemon.start_profile_drivers().unwrap();

        state.set_inhibited("lap-detected");
        let mask = daemon
            .handle_event(Event::PerformanceInhibitedChanged { driver: "test" })
            .unwrap();

        assert!(mask.is_empty());
        assert_eq!(daemon.performance_inhibited(), "");
    }

    /// A hardware-initiated change updates the software state without a
    /// redundant hardware write.
    #[test]
    fn hardware_hotkey_updates_without_a_write() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) =
            PowerDaemon::new(registry(vec![driver("test", ProfileMask::all(), &state)], Vec::new()));
        daemon.start_profile_drivers().unwrap();

        // The hardware already moved before the event was delivered.
        state.set_hardware(Profile::PowerSaver);
        let mask = daemon
            .handle_event(Event::ProfileChanged { driver: "test", profile: Profile::PowerSaver })
            .unwrap();

        assert_eq!(mask, PropertiesMask::ACTIVE_PROFILE);
        assert_eq!(daemon.active_profile(), Profile::PowerSaver);
        assert_eq!(state.writes(), vec![Profile::Balanced]);
    }

    /// Hardware changes to the profile we already run are ignored.
    #[test]
    fn redundant_hardware_changes_are_ignored() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) =
            PowerDaemon::new(registry(vec![driver("test", ProfileMask::all(), &state)], Vec::new()));
        daemon.start_profile_drivers().unwrap();

        let mask = daemon
            .handle_event(Event::ProfileChanged { driver: "test", profile: Profile::Balanced })
            .unwrap();

        assert!(mask.is_empty());
    }

    /// Hardware events naming a profile outside the driver's mask, or from a
    /// driver that is not bound, are anomalies and ignored.
    #[test]
    fn anomalous_hardware_events_are_ignored() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![driver("test", ProfileMask::MANDATORY, &state)],
            Vec::new(),
        ));
        daemon.start_profile_drivers().unwrap();

        let mask = daemon
            .handle_event(Event::ProfileChanged { driver: "test", profile: Profile::Performance })
            .unwrap();
        assert!(mask.is_empty());
        assert_eq!(daemon.active_profile(), Profile::Balanced);

        let mask = daemon
            .handle_event(Event::ProfileChanged { driver: "stale", profile: Profile::PowerSaver })
            .unwrap();
        assert!(mask.is_empty());

        let mask = daemon
            .handle_event(Event::ProfileChanged { driver: "test", profile: Profile::Unset })
            .unwrap();
        assert!(mask.is_empty());
    }

    /// A probe request from a deferred driver restarts the whole sequence,
    /// preserving the active profile as the preferred starting point.
    #[test]
    fn deferred_drivers_restart_the_probe_sequence() {
        let deferred = state_with_probes(&[ProbeResult::Defer, ProbeResult::Ok]);
        let fallback = state_with_probes(&[ProbeResult::Ok, ProbeResult::Ok]);

        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![
                driver("deferred", ProfileMask::all(), &deferred),
                driver("fallback", ProfileMask::MANDATORY, &fallback),
            ],
            Vec::new(),
        ));

        daemon.start_profile_drivers().unwrap();
        assert_eq!(daemon.profiles()[0].1, "fallback");

        daemon.set_active_profile("power-saver").unwrap();

        let mask = daemon.handle_event(Event::ProbeRequest { driver: "deferred" }).unwrap();
        assert_eq!(mask, PropertiesMask::all());

        assert_eq!(daemon.profiles()[0].1, "deferred");
        assert_eq!(daemon.active_profile(), Profile::PowerSaver);
        // The preserved profile was offered to the second probe.
        assert_eq!(
            *DriverState::lock(&deferred.probed_with),
            vec![Profile::Balanced, Profile::PowerSaver]
        );
        // The reset wrote the preserved profile to the new hardware.
        assert_eq!(deferred.writes(), vec![Profile::PowerSaver]);
    }

    /// Probe requests from drivers that never deferred are ignored.
    #[test]
    fn unknown_probe_requests_are_ignored() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) =
            PowerDaemon::new(registry(vec![driver("test", ProfileMask::all(), &state)], Vec::new()));
        daemon.start_profile_drivers().unwrap();

        let mask = daemon.handle_event(Event::ProbeRequest { driver: "test" }).unwrap();
        assert!(mask.is_empty());
        assert_eq!(daemon.profiles()[0].1, "test");
    }

    /// When the re-bound driver cannot run the preserved profile, the daemon
    /// falls back to balanced instead of activating an unsupported profile.
    #[test]
    fn rebinding_falls_back_to_balanced() {
        let deferred = state_with_probes(&[ProbeResult::Defer, ProbeResult::Ok]);
        let fallback = state_with_probes(&[ProbeResult::Ok, ProbeResult::Ok]);

        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![
                driver("deferred", ProfileMask::MANDATORY, &deferred),
                driver("fallback", ProfileMask::all(), &fallback),
            ],
            Vec::new(),
        ));

        daemon.start_profile_drivers().unwrap();
        daemon.set_active_profile("performance").unwrap();

        daemon.handle_event(Event::ProbeRequest { driver: "deferred" }).unwrap();

        assert_eq!(daemon.profiles()[0].1, "deferred");
        assert_eq!(daemon.active_profile(), Profile::Balanced);
    }

    /// A probe that reads the current hardware state overrides the cached
    /// starting profile.
    #[test]
    fn probed_hardware_state_becomes_the_starting_profile() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        *DriverState::lock(&state.initial) = Some(Profile::Performance);
        state.set_hardware(Profile::Performance);

        let (mut daemon, _events) =
            PowerDaemon::new(registry(vec![driver("test", ProfileMask::all(), &state)], Vec::new()));
        daemon.start_profile_drivers().unwrap();

        assert_eq!(daemon.active_profile(), Profile::Performance);
        // The hardware is already there; the reset performs no write.
        assert!(state.writes().is_empty());
    }

    /// A driver activation failure is logged, yet the profile still commits
    /// and the actions still run.
    #[test]
    fn activation_failures_still_commit() {
        let state = state_with_probes(&[ProbeResult::Ok]);
        let action_state = Arc::new(ActionState::default());
        action_state.probes.store(true, Ordering::SeqCst);

        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![driver("test", ProfileMask::all(), &state)],
            vec![action("charge", &action_state)],
        ));
        daemon.start_profile_drivers().unwrap();

        state.fail_activate.store(true, Ordering::SeqCst);
        let mask = daemon.set_active_profile("performance").unwrap();

        assert_eq!(mask, PropertiesMask::ACTIVE_PROFILE);
        assert_eq!(daemon.active_profile(), Profile::Performance);
        assert_eq!(
            DriverState::lock(&action_state.activations).last(),
            Some(&Profile::Performance)
        );
    }

    /// No driver at all, or a driver missing the mandatory profiles, is a
    /// packaging bug.
    #[test]
    fn missing_drivers_are_fatal() {
        let (mut daemon, _events) = PowerDaemon::new(registry(Vec::new(), Vec::new()));
        assert!(matches!(daemon.start_profile_drivers(), Err(StartupError::NoDriver)));
        assert!(!daemon.started());

        let state = state_with_probes(&[ProbeResult::Ok]);
        let (mut daemon, _events) = PowerDaemon::new(registry(
            vec![driver("test", ProfileMask::BALANCED, &state)],
            Vec::new(),
        ));
        assert!(matches!(
            daemon.start_profile_drivers(),
            Err(StartupError::MissingMandatoryProfiles("test"))
        ));
    }
}
