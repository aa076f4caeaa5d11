// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Side-effect modules invoked on every profile transition.

pub mod trickle_charge;
