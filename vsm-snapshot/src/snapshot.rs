use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info_span, warn};
use vsm_core::capability::Capability;
use vsm_core::error::{Result, SnapshotError};
use vsm_provider::{Host, HostId, ParentRef, RawSnapshot, SnapshotOptions};

use crate::attributes::{sanitize_for_mass_assignment, Attribute};
use crate::callbacks::{LifecycleEvent, SnapshotCallbacks};
use crate::errors::{ErrorField, ValidationErrors};

fn ensure_snapshots(host: &Host) -> Result<()> {
    let resource = host.compute_resource();
    resource
        .capabilities()
        .ensure(resource.name(), Capability::Snapshots)
}

/// A point-in-time capture of a host's VM, backed by its compute resource.
///
/// Entities come from [`Snapshot::all_for_host`] / [`Snapshot::find_for_host`]
/// or are built fresh with [`Snapshot::new`] and then [`create`](Snapshot::create)d.
/// Creating does not populate `id`; fetch the snapshot again to get a
/// persisted entity.
pub struct Snapshot {
    id: Option<String>,
    name: String,
    description: String,
    host: Arc<Host>,
    raw_snapshot: Option<RawSnapshot>,
    parent: Option<ParentRef>,
    create_time: Option<DateTime<Utc>>,
    options: SnapshotOptions,
    errors: ValidationErrors,
    saved_name: String,
    saved_description: String,
    callbacks: Arc<SnapshotCallbacks>,
}

impl Snapshot {
    pub fn new(host: Arc<Host>) -> Self {
        Self {
            id: None,
            name: String::new(),
            description: String::new(),
            host,
            raw_snapshot: None,
            parent: None,
            create_time: None,
            options: SnapshotOptions::default(),
            errors: ValidationErrors::new(),
            saved_name: String::new(),
            saved_description: String::new(),
            callbacks: Arc::new(SnapshotCallbacks::new()),
        }
    }

    /// Build an entity from a backend handle. Without an explicit `parent`
    /// the handle's own parent reference is used.
    pub fn from_raw(host: Arc<Host>, raw: RawSnapshot, parent: Option<ParentRef>) -> Self {
        let name = raw.name().to_string();
        let description = raw.description().to_string();
        Self {
            id: Some(raw.reference().to_string()),
            saved_name: name.clone(),
            saved_description: description.clone(),
            name,
            description,
            parent: parent.or_else(|| raw.parent_reference()),
            create_time: raw.create_time(),
            raw_snapshot: Some(raw),
            ..Self::new(host)
        }
    }

    pub fn all_for_host(host: &Arc<Host>) -> Result<Vec<Snapshot>> {
        ensure_snapshots(host)?;
        let snapshots = host.compute_resource().get_snapshots(host)?;
        debug!(host = %host.name, count = snapshots.len(), "Loaded snapshots");
        Ok(snapshots
            .into_iter()
            .map(|raw| Snapshot::from_raw(Arc::clone(host), raw, None))
            .collect())
    }

    pub fn find_for_host(host: &Arc<Host>, id: &str) -> Result<Option<Snapshot>> {
        ensure_snapshots(host)?;
        Ok(host
            .compute_resource()
            .get_snapshot(host, id)?
            .map(|raw| Snapshot::from_raw(Arc::clone(host), raw, None)))
    }

    pub fn with_callbacks(mut self, callbacks: Arc<SnapshotCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn set_callbacks(&mut self, callbacks: Arc<SnapshotCallbacks>) {
        self.callbacks = callbacks;
    }

    // Accessors

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn host_id(&self) -> HostId {
        self.host.id
    }

    pub fn raw_snapshot(&self) -> Option<&RawSnapshot> {
        self.raw_snapshot.as_ref()
    }

    pub fn parent(&self) -> Option<&ParentRef> {
        self.parent.as_ref()
    }

    pub fn create_time(&self) -> Option<DateTime<Utc>> {
        self.create_time
    }

    pub fn formatted_create_time(&self) -> Option<String> {
        self.create_time
            .map(|t| t.format("%F %H:%M").to_string())
    }

    /// Options passed to the backend on [`create`](Snapshot::create).
    pub fn options(&self) -> SnapshotOptions {
        self.options
    }

    pub fn set_options(&mut self, options: SnapshotOptions) {
        self.options = options;
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn is_persisted(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
    }

    // Mass assignment

    /// Set attributes from key/value pairs. Nothing is applied unless every
    /// key is permitted.
    pub fn assign_attributes<K, V, I>(&mut self, attrs: I) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (attr, value) in sanitize_for_mass_assignment(attrs)? {
            match attr {
                Attribute::Name => self.name = value.into(),
                Attribute::Description => self.description = value.into(),
            }
        }
        Ok(())
    }

    pub fn update_attributes<K, V, I>(&mut self, attrs: I) -> Result<bool>
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.assign_attributes(attrs)?;
        self.save()
    }

    // Dirty tracking

    /// Permitted attributes whose value differs from the last loaded or
    /// saved state.
    pub fn changed(&self) -> Vec<Attribute> {
        let mut changed = Vec::new();
        if self.name != self.saved_name {
            changed.push(Attribute::Name);
        }
        if self.description != self.saved_description {
            changed.push(Attribute::Description);
        }
        changed
    }

    pub fn is_changed(&self) -> bool {
        !self.changed().is_empty()
    }

    // Lifecycle

    /// Take the snapshot on the backend. `id` stays unset.
    pub fn create(&mut self) -> Result<bool> {
        self.run(LifecycleEvent::Create, &mut |snapshot: &mut Snapshot| {
            if snapshot.name.trim().is_empty() {
                snapshot
                    .errors
                    .add(ErrorField::Attribute(Attribute::Name), "can't be blank");
                return Ok(false);
            }
            let result = snapshot
                .host
                .compute_resource()
                .create_snapshot(
                    &snapshot.host,
                    &snapshot.name,
                    &snapshot.description,
                    snapshot.options,
                )
                .map(|()| true);
            snapshot.handle_snapshot_errors(result)
        })
    }

    /// Push name and description to the backend.
    pub fn save(&mut self) -> Result<bool> {
        self.run(LifecycleEvent::Save, &mut |snapshot: &mut Snapshot| {
            let result = match &snapshot.raw_snapshot {
                Some(raw) => snapshot.host.compute_resource().update_snapshot(
                    raw,
                    &snapshot.name,
                    &snapshot.description,
                ),
                None => return Err(SnapshotError::MissingHandle("save")),
            };
            let saved = snapshot.handle_snapshot_errors(result)?;
            if saved {
                snapshot.saved_name = snapshot.name.clone();
                snapshot.saved_description = snapshot.description.clone();
            }
            Ok(saved)
        })
    }

    /// Remove the snapshot, keeping its children. `id` is cleared once the
    /// backend call completes, even when it failed with a recorded error.
    pub fn destroy(&mut self) -> Result<bool> {
        self.run(LifecycleEvent::Destroy, &mut |snapshot: &mut Snapshot| {
            let result = match &snapshot.raw_snapshot {
                Some(raw) => snapshot
                    .host
                    .compute_resource()
                    .remove_snapshot(raw, false)
                    .map(|()| true),
                None => return Err(SnapshotError::MissingHandle("destroy")),
            };
            let destroyed = snapshot.handle_snapshot_errors(result)?;
            snapshot.id = None;
            Ok(destroyed)
        })
    }

    pub fn revert(&mut self) -> Result<bool> {
        self.run(LifecycleEvent::Revert, &mut |snapshot: &mut Snapshot| {
            let result = match &snapshot.raw_snapshot {
                Some(raw) => snapshot
                    .host
                    .compute_resource()
                    .revert_snapshot(raw)
                    .map(|()| true),
                None => return Err(SnapshotError::MissingHandle("revert")),
            };
            snapshot.handle_snapshot_errors(result)
        })
    }

    fn run(
        &mut self,
        event: LifecycleEvent,
        op: &mut dyn FnMut(&mut Snapshot) -> Result<bool>,
    ) -> Result<bool> {
        let span = info_span!(
            "snapshot",
            op = event.as_str(),
            host = %self.host.name,
            snapshot = %self.name
        );
        let _entered = span.enter();

        self.errors.clear();
        let callbacks = Arc::clone(&self.callbacks);
        let result = callbacks.run(event, self, op);
        debug!(result = ?result.as_ref().ok(), "Snapshot operation finished");
        result
    }

    /// Record a wrapped backend fault as a base error.
    fn handle_snapshot_errors(&mut self, result: Result<bool>) -> Result<bool> {
        match result {
            Err(SnapshotError::Wrapped(wrapped)) => {
                let message = wrapped.wrapped_error().to_string();
                warn!(error = %message, "{}", wrapped.message());
                self.errors.add_base(message);
                Ok(false)
            }
            other => other,
        }
    }

    // Tree navigation

    /// Every descendant: direct children first, then each child's own
    /// descendants. Empty on flat backends.
    pub fn children(&self) -> Vec<Snapshot> {
        let mut visited = HashSet::new();
        if let Some(id) = &self.id {
            visited.insert(id.clone());
        }
        self.collect_children(&mut visited)
    }

    fn collect_children(&self, visited: &mut HashSet<String>) -> Vec<Snapshot> {
        let Some(raw) = &self.raw_snapshot else {
            return Vec::new();
        };

        let me = ParentRef {
            id: self.id.clone().unwrap_or_default(),
            name: self.name.clone(),
        };
        let direct: Vec<Snapshot> = raw
            .child_snapshots()
            .into_iter()
            .filter(|child| visited.insert(child.reference().to_string()))
            .map(|child| {
                Snapshot::from_raw(Arc::clone(&self.host), child, Some(me.clone()))
                    .with_callbacks(Arc::clone(&self.callbacks))
            })
            .collect();

        let mut descendants = Vec::new();
        for child in &direct {
            descendants.extend(child.collect_children(visited));
        }

        let mut all = direct;
        all.extend(descendants);
        all
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Snapshot")
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children: Vec<String> = self
            .children()
            .into_iter()
            .filter_map(|c| c.id)
            .collect();
        f.debug_struct("Snapshot")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("description", &self.description)
            .field("host_id", &self.host.id)
            .field("parent", &self.parent.as_ref().map(|p| p.id.as_str()))
            .field("children", &children)
            .finish()
    }
}
