//! `process` core module
//!
//! A small slice of the Node.js process object:
//! - process.env, a snapshot of the environment
//! - process.argv, process.platform, process.arch
//! - process.hrtime([previous])

use crate::resolver;
use boa_engine::{
    Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction,
    js_string, object::builtins::JsArray,
};
use std::sync::OnceLock;
use std::time::Instant;

pub const MODULE_NAME: &str = "process";

/// Reference point for process.hrtime()
static PROCESS_START_TIME: OnceLock<Instant> = OnceLock::new();

const NANOS_PER_SEC: u128 = 1_000_000_000;

fn platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "win32"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "freebsd") {
        "freebsd"
    } else if cfg!(target_os = "openbsd") {
        "openbsd"
    } else {
        "unknown"
    }
}

fn arch() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "x64"
    } else if cfg!(target_arch = "aarch64") {
        "arm64"
    } else if cfg!(target_arch = "x86") {
        "ia32"
    } else if cfg!(target_arch = "arm") {
        "arm"
    } else {
        "unknown"
    }
}

/// Module loader for `process`
pub fn load(module: &JsObject, context: &mut Context) -> JsResult<()> {
    PROCESS_START_TIME.get_or_init(Instant::now);

    let exports = module
        .get(js_string!("exports"), context)?
        .to_object(context)?;

    let env = JsObject::with_object_proto(context.intrinsics());
    for (key, value) in std::env::vars_os() {
        env.set(
            JsString::from(key.to_string_lossy().as_ref()),
            JsString::from(value.to_string_lossy().as_ref()),
            false,
            context,
        )?;
    }
    exports.set(js_string!("env"), env, false, context)?;

    let argv = JsArray::from_iter(
        std::env::args().map(|arg| JsValue::from(JsString::from(arg))),
        context,
    );
    exports.set(js_string!("argv"), argv, false, context)?;
    exports.set(js_string!("platform"), js_string!(platform()), false, context)?;
    exports.set(js_string!("arch"), js_string!(arch()), false, context)?;

    let hrtime = NativeFunction::from_fn_ptr(hrtime).to_js_function(context.realm());
    exports.set(js_string!("hrtime"), hrtime, false, context)?;
    Ok(())
}

/// Install the result of `require("process")` as the global `process`
pub fn enable(context: &mut Context) -> JsResult<()> {
    let process = resolver::require(context, MODULE_NAME)?;
    context
        .global_object()
        .set(js_string!("process"), process, false, context)?;
    Ok(())
}

/// `process.hrtime([previous])`: `[seconds, nanoseconds]`, relative to
/// `previous` when given
fn hrtime(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let now = PROCESS_START_TIME
        .get_or_init(Instant::now)
        .elapsed()
        .as_nanos();

    let previous = args.get_or_undefined(0);
    let elapsed = if previous.is_undefined() {
        now
    } else {
        let array = previous
            .as_object()
            .map(|o| o.clone())
            .and_then(|o| JsArray::from_object(o).ok());
        let Some(array) = array else {
            return Err(hrtime_type_error());
        };
        if array.length(context)? != 2 {
            return Err(hrtime_type_error());
        }
        let seconds = array.get(0u32, context)?.to_number(context)?;
        let nanos = array.get(1u32, context)?.to_number(context)?;
        if !seconds.is_finite() || !nanos.is_finite() {
            return Err(hrtime_type_error());
        }
        let before = (seconds.max(0.0) as u128)
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(nanos.max(0.0) as u128);
        now.saturating_sub(before)
    };

    let seconds = (elapsed / NANOS_PER_SEC) as f64;
    let nanos = (elapsed % NANOS_PER_SEC) as f64;
    Ok(JsArray::from_iter([JsValue::from(seconds), JsValue::from(nanos)], context).into())
}

fn hrtime_type_error() -> boa_engine::JsError {
    JsNativeError::typ()
        .with_message("process.hrtime() only accepts an Array tuple of [seconds, nanoseconds]")
        .into()
}
