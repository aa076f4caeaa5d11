// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Monitoring of input device switches through evdev.

use std::{
    fs::{self, File},
    io,
    os::fd::AsRawFd,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

/// Lap proximity switch. Not yet part of the uapi input-event-codes mirrored
/// by the libc crate.
pub const SW_LAP_PROXIMITY: u16 = 0x0b;

const EV_SW: u16 = 0x05;

/// struct input_event is two native longs of timestamp followed by the
/// type/code/value triple.
const INPUT_EVENT_SIZE: usize = std::mem::size_of::<libc::timeval>() + 8;
const TIMEVAL_SIZE: usize = std::mem::size_of::<libc::timeval>();

/// ioctl request for `EVIOCGSW(len)`: read the global switch state bitmap.
fn eviocgsw(len: usize) -> libc::c_ulong {
    // _IOC(_IOC_READ, 'E', 0x1b, len)
    (2 as libc::c_ulong) << 30 | (len as libc::c_ulong) << 16 | (b'E' as libc::c_ulong) << 8 | 0x1b
}

/// Watches one switch of an input device. The callback runs on a dedicated
/// reader thread; dropping the handle stops it.
pub struct SwitchMonitor {
    stop: Arc<AtomicBool>,
}

impl SwitchMonitor {
    /// Opens the event node of the given sysfs input device and monitors a
    /// switch. The callback receives the coldplug state before this returns,
    /// then every subsequent switch event.
    pub fn open<F>(device: &Path, switch: u16, mut on_change: F) -> io::Result<Self>
    where
        F: FnMut(bool) + Send + 'static,
    {
        let node = event_node(device)?;
        let file = fs::OpenOptions::new().read(true).custom_flags(libc::O_NONBLOCK).open(&node)?;

        on_change(read_switch_state(&file, switch)?);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        thread::spawn(move || {
            let mut pollfd =
                libc::pollfd { fd: file.as_raw_fd(), events: libc::POLLIN, revents: 0 };
            let mut buf = [0u8; INPUT_EVENT_SIZE];

            while !thread_stop.load(Ordering::SeqCst) {
                let ready = unsafe { libc::poll(&mut pollfd, 1, 500) };
                if ready <= 0 {
                    continue;
                }

                loop {
                    let read = unsafe {
                        libc::read(file.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
                    };
                    if read != INPUT_EVENT_SIZE as isize {
                        break;
                    }

                    let kind = u16::from_ne_bytes([buf[TIMEVAL_SIZE], buf[TIMEVAL_SIZE + 1]]);
                    let code = u16::from_ne_bytes([buf[TIMEVAL_SIZE + 2], buf[TIMEVAL_SIZE + 3]]);
                    let value = i32::from_ne_bytes([
                        buf[TIMEVAL_SIZE + 4],
                        buf[TIMEVAL_SIZE + 5],
                        buf[TIMEVAL_SIZE + 6],
                        buf[TIMEVAL_SIZE + 7],
                    ]);

                    if kind == EV_SW && code == switch {
                        on_change(value != 0);
                    }
                }
            }
        });

        Ok(Self { stop })
    }
}

impl Drop for SwitchMonitor {
    fn drop(&mut self) { self.stop.store(true, Ordering::SeqCst); }
}

/// Resolves the `/dev/input/eventN` node of a sysfs input device directory.
fn event_node(device: &Path) -> io::Result<PathBuf> {
    for entry in fs::read_dir(device)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with("event") {
                return Ok(Path::new("/dev/input").join(name));
            }
        }
    }

    Err(io::Error::new(io::ErrorKind::NotFound, "input device has no event node"))
}

fn read_switch_state(file: &File, switch: u16) -> io::Result<bool> {
    let mut bits = [0u8; 8];
    let ret =
        unsafe { libc::ioctl(file.as_raw_fd(), eviocgsw(bits.len()), bits.as_mut_ptr()) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(bits[usize::from(switch / 8)] & (1 << (switch % 8)) != 0)
}
