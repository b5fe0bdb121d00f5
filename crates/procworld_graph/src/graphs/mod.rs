// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node sets built on the core framework.

pub mod boundary;
pub mod terrain;
