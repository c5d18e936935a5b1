//! Coded runtime diagnostics.
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | TA0xx | Allocation path                |
//! | TA1xx | NUMA and page placement        |
//! | TA2xx | Linked blocks                  |
//! | TA3xx | Maintenance                    |
//! | TA9xx | Internal errors                |
//!
//! Everything is emitted through the `log` facade; install a
//! [`DiagnosticSink`] to capture diagnostics programmatically.

pub mod emit;
pub mod kind;
pub(crate) mod memory_map;

pub use emit::{
    clear_sink, emit, emit_with_context, install_sink, suppress_diagnostics, CollectingSink,
    DiagnosticSink,
};
pub use kind::{Diagnostic, DiagnosticKind};

pub use kind::{TA001, TA002, TA003, TA004, TA101, TA102, TA103, TA201, TA301, TA302, TA303, TA901};
