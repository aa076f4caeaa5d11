// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use crate::Profile;
use std::{io, path::PathBuf};

/// Failures reported back to DBus clients for an `ActiveProfile` write.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid profile name '{0}'")]
    InvalidProfile(String),
    #[error("Profile '{0}' is inhibited")]
    ProfileInhibited(String),
}

impl From<RequestError> for zbus::fdo::Error {
    fn from(error: RequestError) -> Self { zbus::fdo::Error::Failed(error.to_string()) }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to write '{value}' to {path:?}: {source}")]
    Write { path: PathBuf, value: String, source: io::Error },
    #[error("performance mode is inhibited")]
    Inhibited,
    #[error("profile '{0}' is not supported by this driver")]
    Unsupported(Profile),
    #[error("driver has not probed its hardware")]
    NotProbed,
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("failed to write '{value}' to {path:?}: {source}")]
    Write { path: PathBuf, value: String, source: io::Error },
}

/// Fatal configuration problems found while probing drivers. These indicate
/// a packaging bug and exit the daemon with a nonzero status.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no profile driver could be probed")]
    NoDriver,
    #[error("driver '{0}' is missing mandatory profiles (power-saver and balanced)")]
    MissingMandatoryProfiles(&'static str),
}
