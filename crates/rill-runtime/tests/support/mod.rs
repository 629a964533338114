#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use rill_runtime::{ExitCase, Pull, StreamError};

pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Events::default()
}

pub fn snapshot(events: &Events) -> Vec<String> {
    events.lock().clone()
}

pub fn record(events: &Events, entry: impl Into<String>) {
    events.lock().push(entry.into());
}

pub fn exit_label(exit: &ExitCase) -> &'static str {
    match exit {
        ExitCase::Completed => "completed",
        ExitCase::Failure(_) => "failed",
        ExitCase::Cancelled => "cancelled",
    }
}

/// Acquires `name` in the current scope, logging acquisition and release.
pub fn resource(events: &Events, name: &'static str) -> Pull<i32, &'static str> {
    resource_with(events, name, None)
}

pub fn resource_with(
    events: &Events,
    name: &'static str,
    release_error: Option<&'static str>,
) -> Pull<i32, &'static str> {
    let on_acquire = Arc::clone(events);
    let on_release = Arc::clone(events);
    Pull::acquire(
        move || async move {
            record(&on_acquire, format!("acquire {name}"));
            Ok(name)
        },
        move |name, exit| async move {
            record(&on_release, format!("release {name} {}", exit_label(&exit)));
            match release_error {
                Some(message) => Err(StreamError::msg(message)),
                None => Ok(()),
            }
        },
    )
}

/// `body` runs in its own scope holding `name`.
pub fn bracket(
    events: &Events,
    name: &'static str,
    body: impl FnOnce(&'static str) -> Pull<i32, ()> + Send + 'static,
) -> Pull<i32, ()> {
    resource(events, name).flat_map(body).scope()
}

pub fn log_effect(events: &Events, entry: &'static str) -> Pull<i32, ()> {
    let events = Arc::clone(events);
    Pull::eval(move || async move {
        record(&events, entry);
        Ok(())
    })
}

/// Tracks how many resources are alive at once.
#[derive(Clone, Default)]
pub struct Gauge {
    live: Arc<AtomicI64>,
    peak: Arc<AtomicI64>,
    released: Arc<AtomicI64>,
}

impl Gauge {
    pub fn acquire(&self) -> Pull<i32, ()> {
        let up = self.clone();
        let down = self.clone();
        Pull::acquire(
            move || async move {
                let live = up.live.fetch_add(1, Ordering::SeqCst) + 1;
                up.peak.fetch_max(live, Ordering::SeqCst);
                Ok(())
            },
            move |(), _| async move {
                down.live.fetch_sub(1, Ordering::SeqCst);
                down.released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
    }

    pub fn live(&self) -> i64 {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> i64 {
        self.released.load(Ordering::SeqCst)
    }
}
