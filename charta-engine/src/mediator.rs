//! Local/remote classification and echo suppression.
//!
//! The mediator sits between the editor event bus and the wire. Locally
//! originated events are debounced, coalesced per element, and handed to
//! the outbound callback; inbound batches are applied through the silent
//! mutation layer while every locally-observed aftershock of them is
//! dropped.
//!
//! ```text
//! editor event ──► should_ignore? ──► debounce buffer (100ms) ──► on_local
//!                      │                   (coalesced by id)
//!                      │ immediate (add/remove)
//!                      └────────────────────────────────────────► on_local
//!
//! remote batch ──► processing flag set
//!                  render gate suspended
//!                  create → property → position → remove
//!                  ids marked remote for 5s ─────────────────────► on_remote
//! ```
//!
//! TTL entries carry their insertion instant and are pruned by the 5 s
//! sweep, never by per-entry timers.

use crate::codec::ChangeEvent;
use crate::editor::LowLevelEditor;
use crate::mutation::{BatchReport, SilentUpdateService};
use charta_model::{ElementKind, ModelStore};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Where a change was last seen coming from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// Last origin seen per element id. TTL 5 s.
#[derive(Debug, Clone, Copy)]
struct SourceRecord {
    origin: ChangeOrigin,
    at: Instant,
    processed: bool,
}

/// Change-rate bookkeeping per element id. TTL 10 s.
#[derive(Debug, Clone)]
struct TrackRecord {
    last_change: ChangeEvent,
    at: Instant,
    change_count: u32,
}

/// Payload equality, ignoring timestamp and originator: the duplicate
/// filter targets one edit surfacing through two bus topics, not two
/// distinct edits in quick succession.
fn same_payload(a: &ChangeEvent, b: &ChangeEvent) -> bool {
    a.kind == b.kind
        && a.properties == b.properties
        && a.x == b.x
        && a.y == b.y
        && a.width == b.width
        && a.height == b.height
}

/// The editor event topics the mediator subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    ElementChanged { element_id: String },
    CommandStackChanged { command: String, element_id: String },
    ShapeAdded { element_id: String },
    ConnectionAdded { element_id: String },
    ShapeRemoved { element_id: String },
    ConnectionRemoved { element_id: String },
    ShapeMoved { element_id: String },
    ConnectionMoved { element_id: String },
}

impl EditorEvent {
    pub fn element_id(&self) -> &str {
        match self {
            Self::ElementChanged { element_id }
            | Self::CommandStackChanged { element_id, .. }
            | Self::ShapeAdded { element_id }
            | Self::ConnectionAdded { element_id }
            | Self::ShapeRemoved { element_id }
            | Self::ConnectionRemoved { element_id }
            | Self::ShapeMoved { element_id }
            | Self::ConnectionMoved { element_id } => element_id,
        }
    }
}

type ChangeSink = Box<dyn FnMut(&[ChangeEvent]) + Send>;

/// The reentrancy guard between local edits and remote application.
pub struct EventMediator {
    processing_remote: bool,
    /// Ids recently touched by an inbound change; one-shot, 5 s expiry.
    remote_sources: HashMap<String, Instant>,
    source_history: HashMap<String, SourceRecord>,
    tracker: HashMap<String, TrackRecord>,
    /// Outbound buffer, insertion-ordered, coalesced by element id.
    buffer: Vec<ChangeEvent>,
    last_buffered: Option<Instant>,
    last_sweep: Instant,
    debounce: Duration,
    duplicate_window: Duration,
    source_ttl: Duration,
    tracker_ttl: Duration,
    sweep_interval: Duration,
    user_id: Option<String>,
    on_local: Option<ChangeSink>,
    on_remote: Option<ChangeSink>,
}

impl Default for EventMediator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMediator {
    pub fn new() -> Self {
        Self {
            processing_remote: false,
            remote_sources: HashMap::new(),
            source_history: HashMap::new(),
            tracker: HashMap::new(),
            buffer: Vec::new(),
            last_buffered: None,
            last_sweep: Instant::now(),
            debounce: Duration::from_millis(100),
            duplicate_window: Duration::from_millis(50),
            source_ttl: Duration::from_secs(5),
            tracker_ttl: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            user_id: None,
            on_local: None,
            on_remote: None,
        }
    }

    /// Shrink the debounce and duplicate-filter windows (for tests).
    pub fn with_windows(debounce: Duration, duplicate_window: Duration) -> Self {
        let mut mediator = Self::new();
        mediator.debounce = debounce;
        mediator.duplicate_window = duplicate_window;
        mediator
    }

    pub fn set_user(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
    }

    /// Outbound sink: called with each flushed batch of local changes.
    pub fn on_local_change<F>(&mut self, sink: F)
    where
        F: FnMut(&[ChangeEvent]) + Send + 'static,
    {
        self.on_local = Some(Box::new(sink));
    }

    /// Inbound notification: called after a remote batch is applied.
    pub fn on_remote_change<F>(&mut self, sink: F)
    where
        F: FnMut(&[ChangeEvent]) + Send + 'static,
    {
        self.on_remote = Some(Box::new(sink));
    }

    pub fn is_processing_remote(&self) -> bool {
        self.processing_remote
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// The inbound decision function: should a locally-observed event be
    /// dropped as a remote aftershock?
    ///
    /// 1. While an inbound batch is applying — always.
    /// 2. The id was marked by a recent remote change — consume the mark
    ///    and drop; the history keeps dropping aftershocks until the TTL.
    /// 3. The id's history says remote, unprocessed, within 5 s — drop.
    fn should_ignore(&mut self, element_id: &str) -> bool {
        if self.processing_remote {
            return true;
        }
        if self.remote_sources.remove(element_id).is_some() {
            self.source_history.insert(
                element_id.to_string(),
                SourceRecord {
                    origin: ChangeOrigin::Remote,
                    at: Instant::now(),
                    processed: false,
                },
            );
            return true;
        }
        if let Some(record) = self.source_history.get(element_id) {
            if record.origin == ChangeOrigin::Remote
                && !record.processed
                && record.at.elapsed() < self.source_ttl
            {
                return true;
            }
        }
        false
    }

    /// Two identical same-kind changes on one id within the window
    /// collapse to one tracked entry; the repeat is dropped.
    fn is_duplicate(&mut self, change: &ChangeEvent) -> bool {
        let now = Instant::now();
        match self.tracker.get_mut(&change.element_id) {
            Some(record) => {
                let duplicate = now.duration_since(record.at) < self.duplicate_window
                    && same_payload(&record.last_change, change);
                if !duplicate {
                    record.last_change = change.clone();
                    record.at = now;
                    record.change_count += 1;
                }
                duplicate
            }
            None => {
                self.tracker.insert(
                    change.element_id.clone(),
                    TrackRecord {
                        last_change: change.clone(),
                        at: now,
                        change_count: 1,
                    },
                );
                false
            }
        }
    }

    /// Feed one editor event through classification. Local changes end up
    /// buffered (property/position) or emitted immediately (add/remove).
    pub fn handle_event(&mut self, model: &ModelStore, event: &EditorEvent) {
        let element_id = event.element_id().to_string();
        if element_id.is_empty() || self.should_ignore(&element_id) {
            return;
        }

        match event {
            EditorEvent::ElementChanged { .. } => {
                if let Some(element) = model.get(&element_id) {
                    self.buffer_change(ChangeEvent::property(element));
                }
            }
            EditorEvent::CommandStackChanged { command, .. } => {
                // Only the property and move commands are broadcast-worthy;
                // everything else already surfaces as a structural event.
                match command.as_str() {
                    "element.updateProperties" => {
                        if let Some(element) = model.get(&element_id) {
                            self.buffer_change(ChangeEvent::property(element));
                        }
                    }
                    "elements.move" => {
                        if let Some(element) = model.get(&element_id) {
                            self.buffer_change(ChangeEvent::position(element));
                        }
                    }
                    _ => {}
                }
            }
            EditorEvent::ShapeMoved { .. } | EditorEvent::ConnectionMoved { .. } => {
                if let Some(element) = model.get(&element_id) {
                    self.buffer_change(ChangeEvent::position(element));
                }
            }
            EditorEvent::ShapeAdded { .. } | EditorEvent::ConnectionAdded { .. } => {
                if let Some(element) = model.get(&element_id) {
                    let change = match element.kind {
                        ElementKind::Shape => ChangeEvent::create(element),
                        ElementKind::Connection => ChangeEvent::connection(element),
                    };
                    self.emit_local(vec![self.stamp(change)]);
                }
            }
            EditorEvent::ShapeRemoved { .. } | EditorEvent::ConnectionRemoved { .. } => {
                self.buffer_discard(&element_id);
                let change = self.stamp(ChangeEvent::remove(&element_id));
                self.emit_local(vec![change]);
            }
        }
    }

    fn stamp(&self, mut change: ChangeEvent) -> ChangeEvent {
        change.user_id = self.user_id.clone();
        change
    }

    /// Coalesce into the outbound buffer: per id, last value wins; the
    /// slot keeps its insertion position.
    fn buffer_change(&mut self, change: ChangeEvent) {
        if self.is_duplicate(&change) {
            return;
        }
        let change = self.stamp(change);
        match self
            .buffer
            .iter_mut()
            .find(|buffered| buffered.element_id == change.element_id)
        {
            Some(slot) => *slot = change,
            None => self.buffer.push(change),
        }
        self.last_buffered = Some(Instant::now());
    }

    /// Drop any pending buffered change for a removed element.
    fn buffer_discard(&mut self, element_id: &str) {
        self.buffer.retain(|c| c.element_id != element_id);
    }

    fn emit_local(&mut self, changes: Vec<ChangeEvent>) {
        let now = Instant::now();
        for change in &changes {
            self.source_history.insert(
                change.element_id.clone(),
                SourceRecord {
                    origin: ChangeOrigin::Local,
                    at: now,
                    processed: false,
                },
            );
        }
        if let Some(sink) = self.on_local.as_mut() {
            sink(&changes);
        }
    }

    /// Host-driven heartbeat: runs the TTL sweep when due and flushes the
    /// debounce buffer after a quiet window.
    pub fn tick(&mut self) {
        if self.last_sweep.elapsed() >= self.sweep_interval {
            self.sweep();
        }
        if let Some(last) = self.last_buffered {
            if last.elapsed() >= self.debounce && !self.buffer.is_empty() {
                self.flush();
            }
        }
    }

    /// Flush the buffered changes now, regardless of the quiet window.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let changes = std::mem::take(&mut self.buffer);
        self.last_buffered = None;
        self.emit_local(changes);
    }

    /// Apply an inbound batch through the silent mutation layer.
    ///
    /// The processing flag and the render gate bracket the whole batch;
    /// afterwards every touched id is marked as a remote source for the
    /// TTL window and the remote callback fires.
    pub fn apply_remote_changes<E: LowLevelEditor>(
        &mut self,
        service: &mut SilentUpdateService<E>,
        changes: &[ChangeEvent],
    ) -> BatchReport {
        if changes.is_empty() {
            return BatchReport::default();
        }
        self.processing_remote = true;
        let report = service.batch_update_optimized(changes);

        let now = Instant::now();
        for change in changes {
            self.remote_sources.insert(change.element_id.clone(), now);
            self.source_history.insert(
                change.element_id.clone(),
                SourceRecord {
                    origin: ChangeOrigin::Remote,
                    at: now,
                    processed: true,
                },
            );
        }
        if let Some(sink) = self.on_remote.as_mut() {
            sink(changes);
        }
        self.processing_remote = false;
        report
    }

    /// Drop expired TTL entries. Runs from `tick` every 5 s.
    pub fn sweep(&mut self) {
        let source_ttl = self.source_ttl;
        let tracker_ttl = self.tracker_ttl;
        self.remote_sources.retain(|_, at| at.elapsed() < source_ttl);
        self.source_history.retain(|_, r| r.at.elapsed() < source_ttl);
        self.tracker.retain(|_, r| r.at.elapsed() < tracker_ttl);
        self.last_sweep = Instant::now();
    }

    /// Hard teardown: clears timers, buffers, maps, and callbacks.
    pub fn cleanup(&mut self) {
        self.processing_remote = false;
        self.remote_sources.clear();
        self.source_history.clear();
        self.tracker.clear();
        self.buffer.clear();
        self.last_buffered = None;
        self.on_local = None;
        self.on_remote = None;
    }

    #[cfg(test)]
    fn tracked_count(&self, element_id: &str) -> u32 {
        self.tracker
            .get(element_id)
            .map(|r| r.change_count)
            .unwrap_or(0)
    }
}
