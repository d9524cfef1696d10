//! Hooks around snapshot lifecycle operations.
//!
//! For each [`LifecycleEvent`] a run goes: `before` hooks in registration
//! order (any `false` halts with `Ok(false)`), then the `around` hooks nested
//! with the first registered outermost, then `after` hooks when the result
//! is `Ok(true)`.

use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use vsm_core::error::Result;

use crate::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Create,
    Save,
    Destroy,
    Revert,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Create => "create",
            LifecycleEvent::Save => "save",
            LifecycleEvent::Destroy => "destroy",
            LifecycleEvent::Revert => "revert",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The rest of the operation, handed to an around hook.
pub type Continuation<'a> = &'a mut dyn FnMut(&mut Snapshot) -> Result<bool>;

pub type BeforeHook = Box<dyn Fn(&mut Snapshot) -> bool + Send + Sync>;
pub type AroundHook = Box<dyn Fn(&mut Snapshot, Continuation<'_>) -> Result<bool> + Send + Sync>;
pub type AfterHook = Box<dyn Fn(&Snapshot) + Send + Sync>;

#[derive(Default)]
struct EventHooks {
    before: Vec<BeforeHook>,
    around: Vec<AroundHook>,
    after: Vec<AfterHook>,
}

#[derive(Default)]
pub struct SnapshotCallbacks {
    hooks: HashMap<LifecycleEvent, EventHooks>,
}

impl SnapshotCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F>(mut self, event: LifecycleEvent, hook: F) -> Self
    where
        F: Fn(&mut Snapshot) -> bool + Send + Sync + 'static,
    {
        self.hooks.entry(event).or_default().before.push(Box::new(hook));
        self
    }

    pub fn around<F>(mut self, event: LifecycleEvent, hook: F) -> Self
    where
        F: Fn(&mut Snapshot, Continuation<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        self.hooks.entry(event).or_default().around.push(Box::new(hook));
        self
    }

    pub fn after<F>(mut self, event: LifecycleEvent, hook: F) -> Self
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.hooks.entry(event).or_default().after.push(Box::new(hook));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(|h| {
            h.before.is_empty() && h.around.is_empty() && h.after.is_empty()
        })
    }

    pub(crate) fn run(
        &self,
        event: LifecycleEvent,
        snapshot: &mut Snapshot,
        op: &mut dyn FnMut(&mut Snapshot) -> Result<bool>,
    ) -> Result<bool> {
        let Some(hooks) = self.hooks.get(&event) else {
            return op(snapshot);
        };

        for (index, before) in hooks.before.iter().enumerate() {
            if !before(snapshot) {
                debug!(event = %event, hook = index, "Halted by before hook");
                return Ok(false);
            }
        }

        let result = run_around(&hooks.around, snapshot, op)?;

        if result {
            for after in &hooks.after {
                after(snapshot);
            }
        }
        Ok(result)
    }
}

fn run_around(
    hooks: &[AroundHook],
    snapshot: &mut Snapshot,
    op: &mut dyn FnMut(&mut Snapshot) -> Result<bool>,
) -> Result<bool> {
    match hooks.split_first() {
        None => op(snapshot),
        Some((outer, inner)) => {
            outer(snapshot, &mut |s: &mut Snapshot| run_around(inner, s, &mut *op))
        }
    }
}

impl fmt::Debug for SnapshotCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (event, hooks) in &self.hooks {
            map.entry(
                &event.as_str(),
                &format_args!(
                    "before={} around={} after={}",
                    hooks.before.len(),
                    hooks.around.len(),
                    hooks.after.len()
                ),
            );
        }
        map.finish()
    }
}
