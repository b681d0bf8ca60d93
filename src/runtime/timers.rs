//! Script-facing timer globals
//!
//! `setTimeout`, `setInterval`, `setImmediate` and their `clear*` counterparts.
//! The functions share the loop thread's scheduler; the handles they return
//! are opaque objects carrying the job id.

use super::scheduler::{Callback, JobId, JobKind, Scheduler, deadline_after};
use boa_engine::{
    Context, JsArgs, JsData, JsNativeError, JsObject, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Trace};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Largest delay accepted before falling back to 1 ms
const TIMEOUT_MAX: f64 = 2_147_483_647.0;

/// Data behind a timer handle object
#[derive(Debug, Clone, Trace, Finalize, JsData)]
pub(crate) struct TimerHandle {
    #[unsafe_ignore_trace]
    id: JobId,
    immediate: bool,
}

#[derive(Trace, Finalize)]
struct TimerBinding {
    #[unsafe_ignore_trace]
    scheduler: Rc<RefCell<Scheduler>>,
}

/// Clamp a script-supplied delay in milliseconds.
///
/// NaN and negative values become 0 for timeouts and 1 for intervals; values
/// beyond the 32-bit signed range become 1.
pub(crate) fn normalize_delay(raw: f64, repeating: bool) -> Duration {
    let floor = if repeating { 1.0 } else { 0.0 };
    let millis = if raw.is_nan() {
        floor
    } else if raw > TIMEOUT_MAX {
        1.0
    } else {
        raw.trunc().max(floor)
    };
    Duration::from_millis(millis as u64)
}

/// Install the timer functions as globals
pub(crate) fn register(scheduler: Rc<RefCell<Scheduler>>, context: &mut Context) -> JsResult<()> {
    type TimerFn = fn(&JsValue, &[JsValue], &TimerBinding, &mut Context) -> JsResult<JsValue>;
    let functions: [(&str, usize, TimerFn); 6] = [
        ("setTimeout", 2, set_timeout),
        ("setInterval", 2, set_interval),
        ("setImmediate", 1, set_immediate),
        ("clearTimeout", 1, clear_timer),
        ("clearInterval", 1, clear_timer),
        ("clearImmediate", 1, clear_immediate),
    ];

    for (name, length, function) in functions {
        let binding = TimerBinding {
            scheduler: scheduler.clone(),
        };
        context.register_global_callable(
            name.into(),
            length,
            NativeFunction::from_copy_closure_with_captures(function, binding),
        )?;
    }
    Ok(())
}

fn set_timeout(
    _this: &JsValue,
    args: &[JsValue],
    binding: &TimerBinding,
    context: &mut Context,
) -> JsResult<JsValue> {
    let delay = normalize_delay(args.get_or_undefined(1).to_number(context)?, false);
    schedule(binding, "setTimeout", JobKind::Timeout, delay, args, 2, context)
}

fn set_interval(
    _this: &JsValue,
    args: &[JsValue],
    binding: &TimerBinding,
    context: &mut Context,
) -> JsResult<JsValue> {
    let period = normalize_delay(args.get_or_undefined(1).to_number(context)?, true);
    schedule(binding, "setInterval", JobKind::Interval(period), period, args, 2, context)
}

fn set_immediate(
    _this: &JsValue,
    args: &[JsValue],
    binding: &TimerBinding,
    context: &mut Context,
) -> JsResult<JsValue> {
    schedule(binding, "setImmediate", JobKind::Immediate, Duration::ZERO, args, 1, context)
}

fn schedule(
    binding: &TimerBinding,
    name: &str,
    kind: JobKind,
    delay: Duration,
    args: &[JsValue],
    extra_from: usize,
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(function) = args.get_or_undefined(0).as_callable().map(|f| f.clone()) else {
        return Err(JsNativeError::typ()
            .with_message(format!("{name}: callback must be a function"))
            .into());
    };
    let callback = Callback::Script {
        function,
        args: args.iter().skip(extra_from).cloned().collect(),
    };

    let mut scheduler = binding.scheduler.borrow_mut();
    let id = scheduler.next_id();
    scheduler.insert(id, kind, deadline_after(delay), callback);
    drop(scheduler);

    let handle = TimerHandle {
        id,
        immediate: kind == JobKind::Immediate,
    };
    let prototype = context.intrinsics().constructors().object().prototype();
    Ok(JsObject::from_proto_and_data(prototype, handle).into())
}

fn timer_handle(value: &JsValue) -> Option<TimerHandle> {
    let object = value.as_object().map(|o| o.clone())?;
    let handle = object.downcast_ref::<TimerHandle>()?;
    Some(handle.clone())
}

/// `clearTimeout` and `clearInterval` accept either kind of timer
fn clear_timer(
    _this: &JsValue,
    args: &[JsValue],
    binding: &TimerBinding,
    _context: &mut Context,
) -> JsResult<JsValue> {
    match timer_handle(args.get_or_undefined(0)) {
        Some(handle) if !handle.immediate => {
            binding.scheduler.borrow_mut().cancel(handle.id);
        }
        _ => {}
    }
    Ok(JsValue::undefined())
}

fn clear_immediate(
    _this: &JsValue,
    args: &[JsValue],
    binding: &TimerBinding,
    _context: &mut Context,
) -> JsResult<JsValue> {
    if let Some(handle) = timer_handle(args.get_or_undefined(0)) {
        let mut scheduler = binding.scheduler.borrow_mut();
        if scheduler.is_immediate(handle.id) {
            scheduler.cancel(handle.id);
        }
    }
    Ok(JsValue::undefined())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scheduler::IdGen;
    use boa_engine::Source;
    use std::sync::Arc;

    #[test]
    fn test_normalize_delay() {
        assert_eq!(normalize_delay(10.7, false), Duration::from_millis(10));
        assert_eq!(normalize_delay(f64::NAN, false), Duration::ZERO);
        assert_eq!(normalize_delay(-5.0, false), Duration::ZERO);
        assert_eq!(normalize_delay(f64::NAN, true), Duration::from_millis(1));
        assert_eq!(normalize_delay(0.0, true), Duration::from_millis(1));
        assert_eq!(normalize_delay(-5.0, true), Duration::from_millis(1));
        assert_eq!(normalize_delay(2_147_483_648.0, false), Duration::from_millis(1));
        assert_eq!(normalize_delay(f64::INFINITY, false), Duration::from_millis(1));
        assert_eq!(
            normalize_delay(2_147_483_647.0, false),
            Duration::from_millis(2_147_483_647)
        );
    }

    fn context_with_timers() -> (Context, Rc<RefCell<Scheduler>>) {
        let scheduler = Rc::new(RefCell::new(Scheduler::new(Arc::new(IdGen::default()))));
        let mut context = Context::default();
        register(scheduler.clone(), &mut context).unwrap();
        (context, scheduler)
    }

    #[test]
    fn test_globals_schedule_and_clear() {
        let (mut context, scheduler) = context_with_timers();
        let handle = context
            .eval(Source::from_bytes(
                "var t = setTimeout(function() {}, 10); var i = setInterval(function() {}, 5); \
                 var m = setImmediate(function() {}); t",
            ))
            .unwrap();
        assert!(timer_handle(&handle).is_some());
        assert_eq!(scheduler.borrow().live(), 3);

        // clearImmediate ignores timers, clearTimeout ignores immediates
        context
            .eval(Source::from_bytes("clearImmediate(t); clearTimeout(m);"))
            .unwrap();
        assert_eq!(scheduler.borrow().live(), 3);

        context
            .eval(Source::from_bytes(
                "clearInterval(t); clearTimeout(i); clearImmediate(m); clearTimeout(t); clearTimeout(42);",
            ))
            .unwrap();
        assert_eq!(scheduler.borrow().live(), 0);
    }

    #[test]
    fn test_handle_data_is_read_back_from_the_object() {
        let (mut context, _scheduler) = context_with_timers();
        let timeout = context
            .eval(Source::from_bytes("setTimeout(function() {}, 10)"))
            .unwrap();
        let immediate = context
            .eval(Source::from_bytes("setImmediate(function() {})"))
            .unwrap();
        let plain = context.eval(Source::from_bytes("({})")).unwrap();

        let first = timer_handle(&timeout).unwrap();
        let second = timer_handle(&timeout).unwrap();
        assert_eq!(first.id, second.id);
        assert!(!first.immediate);

        let immediate = timer_handle(&immediate).unwrap();
        assert!(immediate.immediate);
        assert_ne!(immediate.id, first.id);

        assert!(timer_handle(&plain).is_none());
        assert!(timer_handle(&JsValue::from(7)).is_none());
    }

    #[test]
    fn test_non_callable_callback_throws_type_error() {
        let (mut context, scheduler) = context_with_timers();
        let result = context
            .eval(Source::from_bytes(
                "try { setTimeout('code', 1); 'no error' } catch (e) { e instanceof TypeError }",
            ))
            .unwrap();
        assert_eq!(result.as_boolean(), Some(true));
        assert_eq!(scheduler.borrow().live(), 0);
    }

    #[test]
    fn test_extra_arguments_are_forwarded() {
        let (mut context, scheduler) = context_with_timers();
        context
            .eval(Source::from_bytes(
                "var seen; setImmediate(function(a, b) { seen = a + b; }, 2, 3);",
            ))
            .unwrap();

        let mut callback = scheduler.borrow_mut().take_immediate().unwrap();
        callback.invoke(&mut context).unwrap();
        let seen = context.eval(Source::from_bytes("seen")).unwrap();
        assert_eq!(seen.to_number(&mut context).unwrap(), 5.0);
    }
}
