//! Graphite plugin kit - shared plumbing for metric collector plugins
//!
//! Every collector in this workspace produces the same thing: a batch of
//! flat [`MetricRecord`]s per poll cycle. This crate provides:
//! - The record type and its line serializations (PUTVAL, carbon plaintext)
//! - Output sinks (stdout, one TCP connection per batch to a carbon relay)
//! - The [`Plugin`] trait and the fixed-interval poll runner
//! - Logging bootstrap (rolling log file in verbose mode, stderr otherwise)

pub mod emitter;
pub mod logging;
pub mod output;
pub mod plugin;
pub mod record;

pub use emitter::{render_batch, CarbonEmitter, CarbonPath, ConsoleEmitter, Emitter, LineProtocolEmitter};
pub use output::{EmitError, Output};
pub use plugin::{run_once, run_plugin, Plugin, Schedule};
pub use record::MetricRecord;
