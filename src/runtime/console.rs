//! `console` core module
//!
//! Arguments are joined with a single space. Strings print as-is, other values
//! in their display form. Output goes through a [`Printer`] so hosts can
//! redirect it by registering their own `console` native module.

use crate::resolver;
use boa_engine::{Context, JsObject, JsResult, JsValue, NativeFunction, js_string};
use boa_gc::{Finalize, Trace};
use std::sync::Arc;

pub const MODULE_NAME: &str = "console";

/// Destination of console output
pub trait Printer: Send + Sync {
    fn log(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Prints `log`, `info` and `debug` to stdout, `warn` and `error` to stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct StdPrinter;

impl Printer for StdPrinter {
    fn log(&self, message: &str) {
        println!("{message}");
    }

    fn warn(&self, message: &str) {
        eprintln!("{message}");
    }

    fn error(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Log,
    Warn,
    Error,
}

#[derive(Trace, Finalize)]
struct PrinterBinding {
    #[unsafe_ignore_trace]
    printer: Arc<dyn Printer>,
    #[unsafe_ignore_trace]
    level: Level,
}

/// Module loader populating `exports` with the console methods
pub fn loader(
    printer: Arc<dyn Printer>,
) -> impl Fn(&JsObject, &mut Context) -> JsResult<()> + Send + Sync + 'static {
    move |module: &JsObject, context: &mut Context| {
        let exports = module
            .get(js_string!("exports"), context)?
            .to_object(context)?;
        let methods = [
            ("log", Level::Log),
            ("info", Level::Log),
            ("debug", Level::Log),
            ("warn", Level::Warn),
            ("error", Level::Error),
        ];
        for (name, level) in methods {
            let binding = PrinterBinding {
                printer: printer.clone(),
                level,
            };
            let function = NativeFunction::from_copy_closure_with_captures(print, binding)
                .to_js_function(context.realm());
            exports.set(js_string!(name), function, false, context)?;
        }
        Ok(())
    }
}

/// Install the result of `require("console")` as the global `console`
pub fn enable(context: &mut Context) -> JsResult<()> {
    let console = resolver::require(context, MODULE_NAME)?;
    context
        .global_object()
        .set(js_string!("console"), console, false, context)?;
    Ok(())
}

fn print(
    _this: &JsValue,
    args: &[JsValue],
    binding: &PrinterBinding,
    _context: &mut Context,
) -> JsResult<JsValue> {
    let message = format_args(args);
    match binding.level {
        Level::Log => binding.printer.log(&message),
        Level::Warn => binding.printer.warn(&message),
        Level::Error => binding.printer.error(&message),
    }
    Ok(JsValue::undefined())
}

fn format_args(args: &[JsValue]) -> String {
    args.iter()
        .map(|arg| match arg.as_string() {
            Some(text) => text.to_std_string_escaped(),
            None => arg.display().to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
