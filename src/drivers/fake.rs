// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! An interactive driver for end-to-end testing, enabled through the
//! `POWER_PROFILE_DAEMON_FAKE_DRIVER` environment variable. Keyboard input
//! drives the hardware side: `i` toggles performance inhibition.

use crate::{
    driver::{Driver, EventSender, ProbeResult},
    errors::DriverError,
};
use power_profiles_zbus::{Profile, ProfileMask};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

const DRIVER_NAME: &str = "fake";
const ENABLE_VAR: &str = "POWER_PROFILE_DAEMON_FAKE_DRIVER";

/// `0…` and `f…` (false) values leave the driver disabled.
fn enabled(value: Option<&str>) -> bool {
    value.is_some_and(|value| {
        !value.is_empty() && !value.starts_with('0') && !value.starts_with('f')
    })
}

fn keyboard_usage() {
    println!("Valid keys are: i (toggle inhibition)");
}

pub struct FakeDriver {
    events: EventSender,
    inhibited: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    activated: Option<Profile>,
    saved_termios: Option<libc::termios>,
}

impl FakeDriver {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            inhibited: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            activated: None,
            saved_termios: None,
        }
    }

    /// Puts stdin into raw mode and spawns the key reader.
    fn setup_keyboard(&mut self) -> io::Result<()> {
        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut termios) } < 0 {
            return Err(io::Error::last_os_error());
        }
        self.saved_termios = Some(termios);

        termios.c_lflag &= !(libc::ICANON | libc::ECHO);
        if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &termios) } < 0 {
            return Err(io::Error::last_os_error());
        }

        let events = self.events.clone();
        let inhibited = self.inhibited.clone();
        let stop = self.stop.clone();
        thread::spawn(move || {
            let mut pollfd =
                libc::pollfd { fd: libc::STDIN_FILENO, events: libc::POLLIN, revents: 0 };

            while !stop.load(Ordering::SeqCst) {
                let ready = unsafe { libc::poll(&mut pollfd, 1, 500) };
                if ready <= 0 {
                    continue;
                }

                let mut key = [0u8; 1];
                let read =
                    unsafe { libc::read(libc::STDIN_FILENO, key.as_mut_ptr().cast(), 1) };
                if read != 1 {
                    continue;
                }

                match key[0] {
                    b'i' => {
                        println!("Toggling inhibition");
                        inhibited.fetch_xor(true, Ordering::SeqCst);
                        events.performance_inhibited_changed(DRIVER_NAME);
                    }
                    _ => keyboard_usage(),
                }
            }
        });

        Ok(())
    }
}

impl Driver for FakeDriver {
    fn driver_name(&self) -> &'static str { DRIVER_NAME }

    fn profiles(&self) -> ProfileMask { ProfileMask::all() }

    fn probe(&mut self, _preferred: &mut Profile) -> ProbeResult {
        if !enabled(std::env::var(ENABLE_VAR).ok().as_deref()) {
            return ProbeResult::Fail;
        }

        if let Err(why) = self.setup_keyboard() {
            log::warn!("failed to set up the keyboard: {}", why);
            return ProbeResult::Fail;
        }

        keyboard_usage();
        ProbeResult::Ok
    }

    fn activate_profile(&mut self, profile: Profile) -> Result<(), DriverError> {
        if self.activated == Some(profile) {
            return Ok(());
        }

        self.activated = Some(profile);
        Ok(())
    }

    fn performance_inhibited(&self) -> String {
        if self.inhibited.load(Ordering::SeqCst) {
            "lap-detected".to_owned()
        } else {
            String::new()
        }
    }
}

impl Drop for FakeDriver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(termios) = self.saved_termios {
            unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &termios) };
        }
    }
}
