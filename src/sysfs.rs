// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Scoped access to the sysfs tree.
//!
//! All paths are resolved against [`root`], which honors the `UMOCKDEV_DIR`
//! environment variable so the daemon can run against a mocked device tree.

use futures_lite::StreamExt;
use inotify::{Inotify, WatchMask};
use once_cell::sync::Lazy;
use std::{
    ffi::OsStr,
    fs, io,
    path::{Path, PathBuf},
};
use tokio::task::JoinHandle;

static ROOT: Lazy<PathBuf> = Lazy::new(|| match std::env::var("UMOCKDEV_DIR") {
    Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
    _ => PathBuf::from("/sys"),
});

/// The canonical sysfs root, or the tree named by `UMOCKDEV_DIR`.
pub fn root() -> &'static Path { &ROOT }

/// Reads a sysfs attribute, without its trailing newline.
pub fn read_trimmed<P: AsRef<Path>>(path: P) -> io::Result<String> {
    fs::read_to_string(path.as_ref()).map(|value| value.trim_end().to_owned())
}

/// Writes a sysfs attribute.
pub fn write<P: AsRef<Path>>(path: P, value: &str) -> io::Result<()> {
    let path = path.as_ref();
    log::debug!("writing '{}' to {}", value, path.display());
    fs::write(path, value)
}

/// Iterates the devices of a subsystem and returns the first one matching the
/// predicate. Class subsystems live under `class/<name>`, bus subsystems
/// under `bus/<name>/devices`; devices are visited in name order.
pub fn find_device<F: Fn(&Path) -> bool>(root: &Path, subsystem: &str, matches: F) -> Option<PathBuf> {
    let bases = [root.join("class").join(subsystem), root.join("bus").join(subsystem).join("devices")];

    for base in bases {
        let Ok(entries) = fs::read_dir(&base) else { continue };

        let mut devices: Vec<PathBuf> = entries.filter_map(|entry| entry.ok().map(|entry| entry.path())).collect();
        devices.sort();

        if let Some(device) = devices.into_iter().find(|device| matches(device)) {
            return Some(device);
        }
    }

    None
}

/// A live inotify watch. The handle owns the task draining the watch;
/// dropping it stops event delivery.
pub struct Monitor {
    task: JoinHandle<()>,
}

impl Monitor {
    /// Watches a single attribute for modification, invoking the callback on
    /// every change.
    pub fn attribute<F>(path: &Path, mut on_change: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let inotify = Inotify::init()?;
        inotify.watches().add(path, WatchMask::MODIFY | WatchMask::CLOSE_WRITE)?;

        let path = path.to_owned();
        let task = tokio::spawn(async move {
            let mut events = match inotify.into_event_stream([0u8; 1024]) {
                Ok(events) => events,
                Err(why) => {
                    log::error!("{}: failed to stream attribute events: {}", path.display(), why);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                match event {
                    Ok(_) => on_change(),
                    Err(why) => {
                        log::warn!("{}: attribute monitor stopped: {}", path.display(), why);
                        break;
                    }
                }
            }
        });

        Ok(Self { task })
    }

    /// Watches a directory for a file with the given name to appear. The
    /// callback fires at most once; the watch ends afterwards.
    pub fn appearance<F>(dir: &Path, name: &'static str, on_appear: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let inotify = Inotify::init()?;
        inotify.watches().add(dir, WatchMask::CREATE | WatchMask::MOVED_TO)?;

        let dir = dir.to_owned();
        let task = tokio::spawn(async move {
            let mut events = match inotify.into_event_stream([0u8; 1024]) {
                Ok(events) => events,
                Err(why) => {
                    log::error!("{}: failed to stream directory events: {}", dir.display(), why);
                    return;
                }
            };

            let mut on_appear = Some(on_appear);
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.name.as_deref() == Some(OsStr::new(name)) => {
                        if let Some(on_appear) = on_appear.take() {
                            on_appear();
                        }
                        break;
                    }
                    Ok(_) => (),
                    Err(why) => {
                        log::warn!("{}: directory monitor stopped: {}", dir.display(), why);
                        break;
                    }
                }
            }
        });

        Ok(Self { task })
    }
}

impl Drop for Monitor {
    fn drop(&mut self) { self.task.abort(); }
}
