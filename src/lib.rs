//! nodeloop - Node.js-style `require()` and event loop for the Boa JS engine
//!
//! nodeloop provides the pieces a host needs to run CommonJS code on Boa:
//! - [`resolver`]: Node.js module resolution with pluggable source loading
//! - [`runtime`]: an event loop thread with timers, plus `console` and `process`
//! - [`cli`]: an interactive REPL on top of the event loop

pub mod cli;
pub mod resolver;
pub mod runtime;

// Re-export commonly used types
pub use resolver::{
    ModuleLoader, Registry, RegistryBuilder, RequireError, RequireModule, RequireResult,
    register_core_module, register_native_module, require,
};
pub use runtime::{EventLoop, LoopConfig, LoopError, LoopHandle, LoopResult, TimerRegistry};
