// Copyright zmq-bridge-core contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The timer adapter (spec §2 module 9, §9 "from global timer heap to
//! injected service"). The timer-heap implementation itself is an
//! external collaborator (spec §1); this module only defines the
//! `TimerService` seam and bridges its firings into the tagged-event
//! queue form the rest of the crate uses, instead of a raw callback
//! through a process-wide singleton.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crate::queue::{EventQueue, TaggedEvent};

static CANCEL_FLAGS: OnceLock<Mutex<HashMap<u64, Arc<AtomicBool>>>> = OnceLock::new();

fn cancel_flags() -> &'static Mutex<HashMap<u64, Arc<AtomicBool>>> {
    CANCEL_FLAGS.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// An injected timer source. Exactly one typically exists per
/// process, but nothing in this crate assumes that; construction
/// takes an `Arc<dyn TimerService>` explicitly rather than reaching
/// for a global.
pub trait TimerService: Send + Sync {
    /// Schedules `callback` to fire after `interval`, once or
    /// repeatedly, returning a handle usable with `cancel`.
    fn schedule(&self, interval: Duration, repeating: bool, callback: Box<dyn Fn() + Send + Sync>) -> TimerHandle;

    fn cancel(&self, handle: TimerHandle);
}

/// A tagged, cancellable timer firing. Holding this (rather than a
/// bare closure) lets a firing already in flight on a host-API queue
/// be suppressed if `cancel` raced it.
pub struct TimerRecord {
    cancelled: AtomicBool,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl TimerRecord {
    pub fn fire(&self) {
        if !self.cancelled.load(Ordering::Acquire) {
            (self.callback)();
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Bridges a `TimerService` firing into a `TaggedEvent::Timer` pushed
/// onto a host-API `EventQueue`, the host's event-queue callback form
/// (spec §2).
pub struct TimerAdapter {
    service: Arc<dyn TimerService>,
    queue: Arc<dyn EventQueue>,
    record: Arc<TimerRecord>,
    handle: TimerHandle,
}

impl TimerAdapter {
    pub fn schedule(
        service: Arc<dyn TimerService>,
        queue: Arc<dyn EventQueue>,
        interval: Duration,
        repeating: bool,
        on_fire: impl Fn() + Send + Sync + 'static,
    ) -> TimerAdapter {
        let record = Arc::new(TimerRecord { cancelled: AtomicBool::new(false), callback: Box::new(on_fire) });
        let record_for_cb = record.clone();
        let queue_for_cb = queue.clone();

        let handle = service.schedule(
            interval,
            repeating,
            Box::new(move || {
                queue_for_cb.enqueue(TaggedEvent::Timer(record_for_cb.clone()));
            }),
        );

        TimerAdapter { service, queue, record, handle }
    }

    pub fn cancel(&self) {
        self.record.cancel();
        self.service.cancel(self.handle);
    }
}

/// A `TimerService` backed by one dedicated thread per scheduled
/// timer, used by tests and by hosts with no timer heap of their own.
/// Production hosts are expected to supply their own implementation
/// backed by a shared timer wheel.
pub struct ThreadTimerService;

impl Default for ThreadTimerService {
    fn default() -> ThreadTimerService {
        ThreadTimerService
    }
}

impl TimerService for ThreadTimerService {
    fn schedule(&self, interval: Duration, repeating: bool, callback: Box<dyn Fn() + Send + Sync>) -> TimerHandle {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_for_thread = cancelled.clone();

        std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            if cancelled_for_thread.load(Ordering::Acquire) {
                break;
            }
            callback();
            if !repeating {
                break;
            }
        });

        cancel_flags().lock().expect("timer cancel-flags mutex poisoned").insert(id, cancelled);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(flag) = cancel_flags().lock().expect("timer cancel-flags mutex poisoned").get(&handle.0) {
            flag.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ImmediateQueue;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn fire_invokes_callback_when_not_cancelled() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let record = Arc::new(TimerRecord { cancelled: AtomicBool::new(false), callback: Box::new(move || { fired_clone.fetch_add(1, Ordering::SeqCst); }) });
        record.fire();
        assert_eq!(1, fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelled_record_suppresses_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let record = Arc::new(TimerRecord { cancelled: AtomicBool::new(false), callback: Box::new(move || { fired_clone.fetch_add(1, Ordering::SeqCst); }) });
        record.cancel();
        record.fire();
        assert_eq!(0, fired.load(Ordering::SeqCst));
    }

    #[test]
    fn thread_timer_service_fires_once() {
        let service: Arc<dyn TimerService> = Arc::new(ThreadTimerService);
        let queue = Arc::new(ImmediateQueue);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        let adapter = TimerAdapter::schedule(service, queue, Duration::from_millis(20), false, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(80));
        adapter.cancel();

        assert_eq!(1, fired.load(Ordering::SeqCst));
    }
}
