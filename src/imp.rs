// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Device backends.  At the moment the crate ships the software device only.

mod soft;

pub(crate) use soft::*;
