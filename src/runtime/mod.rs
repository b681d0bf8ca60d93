//! JavaScript runtime pieces around the Boa engine
//!
//! Features provided:
//! - [`EventLoop`]: a Node.js-style loop owning a context on its own thread
//! - Timer globals (setTimeout, setInterval, setImmediate and the clear functions)
//! - [`TimerRegistry`]: thread-per-timer scheduling for hosts without a loop
//! - Core modules `console` and `process`, also reachable as `node:console`
//!   and `node:process`

pub mod console;
mod event_loop;
pub mod process;
mod scheduler;
mod timer;
mod timers;

pub use console::{Printer, StdPrinter};
pub use event_loop::{EventLoop, Interval, LoopConfig, LoopError, LoopHandle, LoopResult, Timer};
pub use scheduler::JobId;
pub use timer::TimerRegistry;

use crate::resolver::register_core_module;
use std::sync::{Arc, Once};

/// Register the built-in core modules with the process-wide module table.
///
/// Called by every [`EventLoop`]; hosts using a bare context call it before
/// [`console::enable`] or [`process::enable`].
pub fn register_core_modules() {
    static REGISTERED: Once = Once::new();
    REGISTERED.call_once(|| {
        register_core_module(console::MODULE_NAME, console::loader(Arc::new(StdPrinter)));
        register_core_module(process::MODULE_NAME, process::load);
        tracing::debug!("core modules registered");
    });
}
