// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! The daemon: serves `net.hadess.PowerProfiles` on the system bus and
//! drains driver events into the mediation core.

mod core;

pub use self::core::{PowerDaemon, PropertiesMask};

use anyhow::Context;
use futures_lite::StreamExt;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::Mutex,
};
use zbus::{
    fdo::{DBusProxy, RequestNameFlags, RequestNameReply},
    object_server::InterfaceRef,
};

use crate::{drivers::Registry, DBUS_NAME, DBUS_PATH};

struct PowerProfiles(Arc<Mutex<PowerDaemon>>);

#[zbus::interface(name = "net.hadess.PowerProfiles")]
impl PowerProfiles {
    #[zbus(property)]
    async fn active_profile(&self) -> String {
        self.0.lock().await.active_profile().to_string()
    }

    #[zbus(property)]
    async fn set_active_profile(&mut self, profile: &str) -> zbus::fdo::Result<()> {
        self.0
            .lock()
            .await
            .set_active_profile(profile)
            .map(|_| ())
            .map_err(zbus::fdo::Error::from)
    }

    #[zbus(property)]
    async fn performance_inhibited(&self) -> String {
        self.0.lock().await.performance_inhibited()
    }

    #[zbus(property)]
    async fn profiles(&self) -> Vec<HashMap<&'static str, zvariant::Value<'static>>> {
        self.0
            .lock()
            .await
            .profiles()
            .into_iter()
            .map(|(profile, driver)| {
                let mut record = HashMap::new();
                record.insert("Profile", zvariant::Value::new(profile.as_str()));
                record.insert("Driver", zvariant::Value::new(driver));
                record
            })
            .collect()
    }

    #[zbus(property)]
    async fn actions(&self) -> Vec<String> {
        self.0.lock().await.action_names()
    }
}

/// Republishes the properties a committed state change touched. Values are
/// read back from the core, so every notification carries the state it
/// describes.
async fn emit_properties_changed(iface: &InterfaceRef<PowerProfiles>, mask: PropertiesMask) {
    let context = iface.signal_context();
    let iface = iface.get().await;

    if mask.contains(PropertiesMask::ACTIVE_PROFILE) {
        if let Err(why) = iface.active_profile_changed(context).await {
            log::warn!("failed to notify ActiveProfile change: {}", why);
        }
    }
    if mask.contains(PropertiesMask::PERFORMANCE_INHIBITED) {
        if let Err(why) = iface.performance_inhibited_changed(context).await {
            log::warn!("failed to notify PerformanceInhibited change: {}", why);
        }
    }
    if mask.contains(PropertiesMask::PROFILES) {
        if let Err(why) = iface.profiles_changed(context).await {
            log::warn!("failed to notify Profiles change: {}", why);
        }
    }
    if mask.contains(PropertiesMask::ACTIONS) {
        if let Err(why) = iface.actions_changed(context).await {
            log::warn!("failed to notify Actions change: {}", why);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
pub async fn daemon(replace: bool) -> anyhow::Result<i32> {
    let (daemon, mut events) = PowerDaemon::new(Registry::compiled_in());
    let daemon = Arc::new(Mutex::new(daemon));

    let connection = zbus::connection::Builder::system()
        .context("failed to create zbus connection builder")?
        .serve_at(DBUS_PATH, PowerProfiles(daemon.clone()))
        .context("unable to serve the power profiles interface")?
        .build()
        .await
        .context("unable to connect to the system bus")?;

    let mut name_lost = DBusProxy::new(&connection)
        .await
        .context("failed to create a DBus proxy")?
        .receive_name_lost()
        .await
        .context("failed to watch for bus name loss")?;

    let mut flags = RequestNameFlags::AllowReplacement | RequestNameFlags::DoNotQueue;
    if replace {
        flags |= RequestNameFlags::ReplaceExisting;
    }

    let reply = connection
        .request_name_with_flags(DBUS_NAME, flags)
        .await
        .context("unable to request the bus name")?;
    if !matches!(reply, RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner) {
        log::error!("power-profiles-daemon is already running, or {} cannot be owned", DBUS_NAME);
        return Ok(1);
    }

    // Probe the hardware. An error here is a packaging bug.
    let mask = match daemon.lock().await.start_profile_drivers() {
        Ok(mask) => mask,
        Err(why) => {
            log::error!("{}", why);
            return Ok(1);
        }
    };

    let iface = connection
        .object_server()
        .interface::<_, PowerProfiles>(DBUS_PATH)
        .await
        .context("interface not registered")?;
    emit_properties_changed(&iface, mask).await;

    let mut int = signal(SignalKind::interrupt()).context("failed to install the SIGINT handler")?;
    let mut hup = signal(SignalKind::hangup()).context("failed to install the SIGHUP handler")?;
    let mut term = signal(SignalKind::terminate()).context("failed to install the SIGTERM handler")?;

    log::info!("handling DBus requests as {}", DBUS_NAME);

    let mut name_watched = true;
    loop {
        tokio::select! {
            _ = int.recv() => {
                log::info!("caught signal: SIGINT");
                break;
            }
            _ = hup.recv() => {
                log::info!("caught signal: SIGHUP");
                break;
            }
            _ = term.recv() => {
                log::info!("caught signal: SIGTERM");
                break;
            }
            lost = name_lost.next(), if name_watched => {
                let Some(lost) = lost else {
                    log::warn!("the bus name watch ended");
                    name_watched = false;
                    continue;
                };
                if let Ok(args) = lost.args() {
                    if args.name().as_str() == DBUS_NAME {
                        let started = daemon.lock().await.started();
                        log::info!("lost {}; another daemon has taken over", DBUS_NAME);
                        return Ok(if started { 0 } else { 1 });
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let result = daemon.lock().await.handle_event(event);
                match result {
                    Ok(mask) => emit_properties_changed(&iface, mask).await,
                    Err(why) => {
                        log::error!("failed to restart profile drivers: {}", why);
                        return Ok(1);
                    }
                }
            }
        }
    }

    log::info!("daemon exited from loop");
    Ok(0)
}
