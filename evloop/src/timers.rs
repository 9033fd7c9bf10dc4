// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsResult, JsValue, NativeFunction,
};

use crate::{HostCaptures, LoopShared};

///
/// The worker-owned timer queue backing the `setTimeout` / `setInterval` script globals. The
/// worker sleeps on `recv_deadline` until the earliest entry; timers therefore fire with macrotask
/// granularity, never concurrently with other script work.
///
#[derive(Clone)]
pub struct TimerQueue(Rc<RefCell<TimerQueueInner>>);

#[derive(Default)]
struct TimerQueueInner {
    due: BTreeMap<(Instant, u64), TimerEntry>,
    // Live timer ids, mapping to the deadline currently in `due` (absent while an interval entry
    // is mid-fire). Cancellation works by removing the id from this index.
    index: HashMap<u64, Option<Instant>>,
    id_generator: u64,
}

pub(crate) struct TimerEntry {
    id: u64,
    callback: boa_engine::JsObject,
    args: Vec<JsValue>,
    period: Option<Duration>,
}

impl TimerEntry {
    pub(crate) fn fire(&self, context: &mut Context) -> JsResult<JsValue> {
        self.callback.call(&JsValue::undefined(), &self.args, context)
    }
}

impl TimerQueue {
    pub fn new() -> TimerQueue {
        TimerQueue(Rc::new(RefCell::new(TimerQueueInner::default())))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.0.borrow().due.keys().next().map(|(when, _)| *when)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().index.len()
    }

    fn schedule(
        &self,
        callback: boa_engine::JsObject,
        args: Vec<JsValue>,
        delay: Duration,
        period: Option<Duration>,
    ) -> u64 {
        let mut inner = self.0.borrow_mut();
        inner.id_generator += 1;
        let id = inner.id_generator;
        let when = Instant::now() + delay;
        inner.index.insert(id, Some(when));
        inner.due.insert(
            (when, id),
            TimerEntry {
                id,
                callback,
                args,
                period,
            },
        );
        id
    }

    fn cancel(&self, id: u64) {
        let mut inner = self.0.borrow_mut();
        if let Some(when) = inner.index.remove(&id).flatten() {
            inner.due.remove(&(when, id));
        }
    }

    pub(crate) fn pop_due(&self, now: Instant) -> Vec<TimerEntry> {
        let mut inner = self.0.borrow_mut();
        let mut fired = Vec::new();
        loop {
            let Some((&(when, id), _)) = inner.due.iter().next() else {
                break;
            };
            if when > now {
                break;
            }
            let entry = inner.due.remove(&(when, id)).expect("peeked entry exists");
            if entry.period.is_some() {
                // Keep the id live (with no queued deadline) so that a clear from within the
                // callback is honored by `reschedule`.
                inner.index.insert(id, None);
            } else {
                inner.index.remove(&id);
            }
            fired.push(entry);
        }
        fired
    }

    ///
    /// Re-queue a fired interval entry, unless it was cleared while firing.
    ///
    pub(crate) fn reschedule(&self, entry: TimerEntry, now: Instant) {
        let Some(period) = entry.period else {
            return;
        };
        let mut inner = self.0.borrow_mut();
        if !inner.index.contains_key(&entry.id) {
            return;
        }
        let when = now + period;
        inner.index.insert(entry.id, Some(when));
        inner.due.insert((when, entry.id), entry);
    }
}

fn delay_from(args: &[JsValue], position: usize, context: &mut Context) -> JsResult<Duration> {
    let millis = args.get_or_undefined(position).to_number(context)?;
    if millis.is_finite() && millis > 0.0 {
        Ok(Duration::from_millis(millis as u64))
    } else {
        Ok(Duration::ZERO)
    }
}

fn callable_from(args: &[JsValue], name: &str) -> JsResult<boa_engine::JsObject> {
    args.get_or_undefined(0)
        .as_object()
        .filter(|o| o.is_callable())
        .cloned()
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message(format!("{name} requires a callable first argument"))
                .into()
        })
}

///
/// Install the timer globals into the context.
///
pub(crate) fn install(context: &mut Context, shared: &LoopShared) -> JsResult<()> {
    let set_timeout = unsafe {
        NativeFunction::from_closure_with_captures(
            |_this, args, captures, context| {
                let callback = callable_from(args, "setTimeout")?;
                let delay = delay_from(args, 1, context)?;
                let rest: Vec<JsValue> = args.iter().skip(2).cloned().collect();
                let id = captures.0.schedule(callback, rest, delay, None);
                Ok(JsValue::from(id as f64))
            },
            HostCaptures(shared.timers().clone()),
        )
    };
    context.register_global_builtin_callable(js_string!("setTimeout"), 2, set_timeout)?;

    let set_interval = unsafe {
        NativeFunction::from_closure_with_captures(
            |_this, args, captures, context| {
                let callback = callable_from(args, "setInterval")?;
                let delay = delay_from(args, 1, context)?;
                let rest: Vec<JsValue> = args.iter().skip(2).cloned().collect();
                let period = if delay.is_zero() {
                    Duration::from_millis(1)
                } else {
                    delay
                };
                let id = captures.0.schedule(callback, rest, delay, Some(period));
                Ok(JsValue::from(id as f64))
            },
            HostCaptures(shared.timers().clone()),
        )
    };
    context.register_global_builtin_callable(js_string!("setInterval"), 2, set_interval)?;

    for name in ["clearTimeout", "clearInterval"] {
        let clear = unsafe {
            NativeFunction::from_closure_with_captures(
                |_this, args, captures, context| {
                    let id = args.get_or_undefined(0).to_number(context)?;
                    if id.is_finite() && id >= 0.0 {
                        captures.0.cancel(id as u64);
                    }
                    Ok(JsValue::undefined())
                },
                HostCaptures(shared.timers().clone()),
            )
        };
        context.register_global_builtin_callable(
            boa_engine::JsString::from(name),
            1,
            clear,
        )?;
    }

    Ok(())
}
