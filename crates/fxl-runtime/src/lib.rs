#![forbid(unsafe_code)]

//! FXL runtime: operating mode and the transform trace ledger shared by the
//! layout layer.
//!
//! ## Module layout
//!
//! | Module  | Contents                                                    |
//! |---------|-------------------------------------------------------------|
//! | `mode`  | [`RuntimeMode`] enum (Strict / Hardened)                    |
//! | `trace` | [`TransformTrace`], [`TraceLedger`], [`next_operation_id`]  |

pub mod mode;
pub mod trace;

pub use mode::RuntimeMode;
pub use trace::{TraceLedger, TraceOutcome, TransformTrace, next_operation_id};
