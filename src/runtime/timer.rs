//! Thread-per-timer scheduling for contexts without an [`EventLoop`]
//!
//! Each armed timer gets a waiter thread that sleeps for the delay and posts
//! the timer id over a channel. [`TimerRegistry::wait`] receives the ids and
//! runs the callbacks on the calling thread until no timers remain. Clearing
//! a timer removes it from the table, so a late post for it is ignored.
//!
//! [`EventLoop`]: super::EventLoop

use super::timers::normalize_delay;
use boa_engine::{
    Context, JsArgs, JsNativeError, JsObject, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, Trace};
use crossbeam::channel::{Receiver, Sender, unbounded};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

struct LegacyTimer {
    function: JsObject,
    args: Vec<JsValue>,
    delay: Duration,
    repeating: bool,
}

struct RegistryState {
    tx: Sender<u64>,
    rx: Receiver<u64>,
    next_id: Cell<u64>,
    timers: RefCell<HashMap<u64, LegacyTimer>>,
}

/// Timer table of one context; cloning shares it
#[derive(Clone)]
pub struct TimerRegistry {
    state: Rc<RegistryState>,
}

#[derive(Trace, Finalize)]
struct RegistryBinding {
    #[unsafe_ignore_trace]
    registry: TimerRegistry,
}

impl TimerRegistry {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            state: Rc::new(RegistryState {
                tx,
                rx,
                next_id: Cell::new(0),
                timers: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Install `setTimeout`, `setInterval`, `clearTimeout` and `clearInterval`.
    ///
    /// Handles are plain numbers; the clear functions are interchangeable.
    pub fn enable(&self, context: &mut Context) -> JsResult<()> {
        type TimerFn = fn(&JsValue, &[JsValue], &RegistryBinding, &mut Context) -> JsResult<JsValue>;
        let functions: [(&str, usize, TimerFn); 4] = [
            ("setTimeout", 2, set_timeout),
            ("setInterval", 2, set_interval),
            ("clearTimeout", 1, clear_timer),
            ("clearInterval", 1, clear_timer),
        ];
        for (name, length, function) in functions {
            let binding = RegistryBinding {
                registry: self.clone(),
            };
            context.register_global_callable(
                name.into(),
                length,
                NativeFunction::from_copy_closure_with_captures(function, binding),
            )?;
        }
        Ok(())
    }

    /// Number of timers that are armed and not cleared
    pub fn pending(&self) -> usize {
        self.state.timers.borrow().len()
    }

    /// Run callbacks as their timers fire until none remain.
    ///
    /// Stops at the first callback that throws; the failing timeout has already
    /// been removed and a failing interval stays armed.
    pub fn wait(&self, context: &mut Context) -> JsResult<()> {
        while self.pending() > 0 {
            let Ok(id) = self.state.rx.recv() else {
                break;
            };

            let (function, args, repeat) = {
                let mut timers = self.state.timers.borrow_mut();
                let Some(timer) = timers.get(&id) else {
                    continue;
                };
                if timer.repeating {
                    (timer.function.clone(), timer.args.clone(), Some(timer.delay))
                } else {
                    let Some(timer) = timers.remove(&id) else {
                        continue;
                    };
                    (timer.function, timer.args, None)
                }
            };

            let result = function.call(&JsValue::undefined(), &args, context);
            if let Some(delay) = repeat {
                if self.state.timers.borrow().contains_key(&id) {
                    self.arm(id, delay);
                }
            }
            result?;
            context.run_jobs()?;
        }
        Ok(())
    }

    fn add(&self, timer: LegacyTimer) -> u64 {
        let id = self.state.next_id.get() + 1;
        self.state.next_id.set(id);
        let delay = timer.delay;
        self.state.timers.borrow_mut().insert(id, timer);
        self.arm(id, delay);
        id
    }

    fn clear(&self, id: u64) {
        self.state.timers.borrow_mut().remove(&id);
    }

    fn arm(&self, id: u64, delay: Duration) {
        let tx = self.state.tx.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = tx.send(id);
        });
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn set_timeout(
    _this: &JsValue,
    args: &[JsValue],
    binding: &RegistryBinding,
    context: &mut Context,
) -> JsResult<JsValue> {
    schedule(args, binding, false, context)
}

fn set_interval(
    _this: &JsValue,
    args: &[JsValue],
    binding: &RegistryBinding,
    context: &mut Context,
) -> JsResult<JsValue> {
    schedule(args, binding, true, context)
}

fn schedule(
    args: &[JsValue],
    binding: &RegistryBinding,
    repeating: bool,
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(function) = args.get_or_undefined(0).as_callable().map(|f| f.clone()) else {
        return Err(JsNativeError::typ()
            .with_message("timer callback must be a function")
            .into());
    };
    let delay = normalize_delay(args.get_or_undefined(1).to_number(context)?, repeating);
    let id = binding.registry.add(LegacyTimer {
        function,
        args: args.iter().skip(2).cloned().collect(),
        delay,
        repeating,
    });
    Ok(JsValue::from(id as f64))
}

fn clear_timer(
    _this: &JsValue,
    args: &[JsValue],
    binding: &RegistryBinding,
    _context: &mut Context,
) -> JsResult<JsValue> {
    if let Some(id) = args.get_or_undefined(0).as_number() {
        if id >= 1.0 && id.fract() == 0.0 {
            binding.registry.clear(id as u64);
        }
    }
    Ok(JsValue::undefined())
}
