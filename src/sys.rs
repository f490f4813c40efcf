// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0

//! System abstractions.
//!
//! The software device only runs on native targets, so these are thin re-exports kept in
//! one place for the timeline clock.

pub mod time {
    //! Clock used for device timeline timestamps.

    pub use std::time::Instant;
}
