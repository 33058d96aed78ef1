//! The scheme manager service: lifecycle state machine plus the thread
//! driving it.

use crate::compiler::build_inspection_matrix;
use crate::dictionary::extract_decoder_dictionary;
use crate::{CheckinSender, SchemeCodec};
use fleetd_app_config::SchemeManagerConfig;
use fleetd_channel::{bounded, Receiver, Sender, SIGNAL_CHANNEL_SIZE};
use fleetd_db::{CacheAndPersist, DataType};
use fleetd_logger::{debug, info, warn};
use fleetd_systemtime::unix_time_as_millis;
use fleetd_types::{
    CollectionScheme, CollectionSchemeList, DecoderDictionary, DecoderDictionaryListener,
    DecoderManifest, InspectionMatrix, InspectionMatrixListener, Timestamp,
};
use fleetd_util::Mutex;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum DeadlineKind {
    Activate,
    Expire,
}

/// One scheduled lifecycle transition. Ordered by time, scheme id as the
/// tie-break, so the min-heap pops deterministically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TimeData {
    time_ms: Timestamp,
    scheme_id: String,
    kind: DeadlineKind,
}

/// The manager's single-threaded state: scheme maps, manifest, timeline.
///
/// Kept separate from the service so the lifecycle logic is testable with
/// explicit clocks.
pub(crate) struct SchemeManagerState {
    enabled: BTreeMap<String, Arc<CollectionScheme>>,
    idle: BTreeMap<String, Arc<CollectionScheme>>,
    manifest: Option<Arc<DecoderManifest>>,
    timeline: BinaryHeap<Reverse<TimeData>>,
    max_expression_depth: u32,
}

impl SchemeManagerState {
    pub(crate) fn new(max_expression_depth: u32) -> Self {
        SchemeManagerState {
            enabled: BTreeMap::new(),
            idle: BTreeMap::new(),
            manifest: None,
            timeline: BinaryHeap::new(),
            max_expression_depth,
        }
    }

    pub(crate) fn manifest_id(&self) -> Option<&str> {
        self.manifest.as_deref().map(|m| m.manifest_id.as_str())
    }

    pub(crate) fn enabled_ids(&self) -> Vec<&str> {
        self.enabled.keys().map(String::as_str).collect()
    }

    /// Installs a manifest. A different generation invalidates every
    /// scheme authored against another manifest and rebuilds the timeline
    /// from the survivors. Returns true when the enabled set changed.
    pub(crate) fn process_manifest(&mut self, manifest: Arc<DecoderManifest>) -> bool {
        let same_generation = self
            .manifest
            .as_deref()
            .is_some_and(|current| current.manifest_id == manifest.manifest_id);
        if same_generation {
            self.manifest = Some(manifest);
            return false;
        }

        let manifest_id = manifest.manifest_id.clone();
        let enabled_before = self.enabled.len();
        self.enabled
            .retain(|_, scheme| scheme.decoder_manifest_id == manifest_id);
        self.idle
            .retain(|_, scheme| scheme.decoder_manifest_id == manifest_id);
        let changed = self.enabled.len() != enabled_before;

        info!(
            "decoder manifest `{}` installed, {} enabled / {} idle schemes survive",
            manifest_id,
            self.enabled.len(),
            self.idle.len()
        );
        self.manifest = Some(manifest);
        self.rebuild_timeline();
        changed
    }

    /// Applies a scheme list update incrementally: new ids enter idle with
    /// an activation deadline, ids missing from the list are removed from
    /// both maps, unchanged schemes stay in place. Within the list the
    /// latest entry wins when two share one id. Returns true when the
    /// enabled set changed.
    pub(crate) fn process_scheme_list(
        &mut self,
        list: &CollectionSchemeList,
        now_ms: Timestamp,
    ) -> bool {
        let mut incoming: BTreeMap<&str, &CollectionScheme> = BTreeMap::new();
        for scheme in &list.schemes {
            incoming.insert(scheme.scheme_id.as_str(), scheme);
        }

        let mut changed = false;

        let removed: Vec<String> = self
            .enabled
            .keys()
            .chain(self.idle.keys())
            .filter(|id| !incoming.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in removed {
            changed |= self.enabled.remove(&id).is_some();
            self.idle.remove(&id);
            debug!("scheme `{}` removed by update", id);
        }

        for (id, scheme) in incoming {
            if scheme.is_expired_at(now_ms) {
                changed |= self.enabled.remove(id).is_some();
                self.idle.remove(id);
                debug!("scheme `{}` already expired at ingest", id);
                continue;
            }

            let unchanged = self
                .enabled
                .get(id)
                .or_else(|| self.idle.get(id))
                .is_some_and(|existing| existing.as_ref() == scheme);
            if unchanged {
                continue;
            }

            changed |= self.enabled.remove(id).is_some();
            self.idle.insert(id.to_string(), Arc::new(scheme.clone()));
            self.timeline.push(Reverse(TimeData {
                time_ms: scheme.start_time_ms,
                scheme_id: id.to_string(),
                kind: DeadlineKind::Activate,
            }));
        }

        changed
    }

    /// Pops every due deadline. Stale entries, whose scheme disappeared or
    /// was replaced with different times, are discarded silently.
    /// Returns true when the enabled set changed.
    pub(crate) fn check_timeline(&mut self, now_ms: Timestamp) -> bool {
        let mut changed = false;
        while let Some(Reverse(deadline)) = self.timeline.peek() {
            if deadline.time_ms > now_ms {
                break;
            }
            let Some(Reverse(deadline)) = self.timeline.pop() else {
                break;
            };
            match deadline.kind {
                DeadlineKind::Activate => {
                    let current = self
                        .idle
                        .get(&deadline.scheme_id)
                        .is_some_and(|s| s.start_time_ms == deadline.time_ms);
                    if !current {
                        continue;
                    }
                    let Some(scheme) = self.idle.remove(&deadline.scheme_id) else {
                        continue;
                    };
                    if scheme.is_expired_at(now_ms) {
                        debug!("scheme `{}` expired before activation", deadline.scheme_id);
                        continue;
                    }
                    self.timeline.push(Reverse(TimeData {
                        time_ms: scheme.expiry_time_ms,
                        scheme_id: deadline.scheme_id.clone(),
                        kind: DeadlineKind::Expire,
                    }));
                    info!("scheme `{}` enabled", deadline.scheme_id);
                    self.enabled.insert(deadline.scheme_id, scheme);
                    changed = true;
                }
                DeadlineKind::Expire => {
                    let current = self
                        .enabled
                        .get(&deadline.scheme_id)
                        .is_some_and(|s| s.expiry_time_ms == deadline.time_ms);
                    if current {
                        self.enabled.remove(&deadline.scheme_id);
                        info!("scheme `{}` expired", deadline.scheme_id);
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    fn rebuild_timeline(&mut self) {
        self.timeline.clear();
        for (id, scheme) in &self.idle {
            self.timeline.push(Reverse(TimeData {
                time_ms: scheme.start_time_ms,
                scheme_id: id.clone(),
                kind: DeadlineKind::Activate,
            }));
        }
        for (id, scheme) in &self.enabled {
            self.timeline.push(Reverse(TimeData {
                time_ms: scheme.expiry_time_ms,
                scheme_id: id.clone(),
                kind: DeadlineKind::Expire,
            }));
        }
    }

    pub(crate) fn next_deadline_ms(&self) -> Option<Timestamp> {
        self.timeline.peek().map(|Reverse(deadline)| deadline.time_ms)
    }

    pub(crate) fn build_matrix(&self) -> InspectionMatrix {
        match &self.manifest {
            Some(manifest) => build_inspection_matrix(
                self.enabled.values().map(Arc::as_ref),
                manifest,
                self.max_expression_depth,
            ),
            None => InspectionMatrix::default(),
        }
    }

    pub(crate) fn build_dictionary(&self) -> DecoderDictionary {
        match &self.manifest {
            Some(manifest) => {
                extract_decoder_dictionary(self.enabled.values().map(Arc::as_ref), manifest)
            }
            None => DecoderDictionary::default(),
        }
    }
}

#[derive(Default)]
struct UpdateSlots {
    inner: Mutex<UpdateSlotsInner>,
}

#[derive(Default)]
struct UpdateSlotsInner {
    manifest: Option<Arc<DecoderManifest>>,
    manifest_available: bool,
    scheme_list: Option<Arc<CollectionSchemeList>>,
    scheme_list_available: bool,
}

impl UpdateSlots {
    fn put_manifest(&self, manifest: Arc<DecoderManifest>) {
        let mut inner = self.inner.lock();
        inner.manifest = Some(manifest);
        inner.manifest_available = true;
    }

    fn put_scheme_list(&self, list: Arc<CollectionSchemeList>) {
        let mut inner = self.inner.lock();
        inner.scheme_list = Some(list);
        inner.scheme_list_available = true;
    }

    /// Copies the pending manifest pointer out of the critical section.
    fn take_manifest(&self) -> Option<Arc<DecoderManifest>> {
        let mut inner = self.inner.lock();
        if !inner.manifest_available {
            return None;
        }
        inner.manifest_available = false;
        inner.manifest.clone()
    }

    /// Copies the pending scheme list pointer out of the critical section.
    fn take_scheme_list(&self) -> Option<Arc<CollectionSchemeList>> {
        let mut inner = self.inner.lock();
        if !inner.scheme_list_available {
            return None;
        }
        inner.scheme_list_available = false;
        inner.scheme_list.clone()
    }

    /// Whether an update is still waiting to be processed.
    fn has_pending(&self) -> bool {
        let inner = self.inner.lock();
        inner.manifest_available || inner.scheme_list_available
    }
}

/// What the checkin message looks like on the wire.
#[derive(Serialize)]
struct Checkin<'a> {
    timestamp_ms: Timestamp,
    decoder_manifest_id: Option<&'a str>,
    collection_scheme_ids: Vec<&'a str>,
}

/// Cloneable handle on a running scheme manager; the transport ingestion
/// path calls the two update entry points.
#[derive(Clone)]
pub struct SchemeManagerHandle {
    slots: Arc<UpdateSlots>,
    wake: Sender<()>,
    should_stop: Arc<AtomicBool>,
}

impl SchemeManagerHandle {
    /// Hands over a freshly received scheme list and wakes the manager.
    pub fn on_collection_scheme_update(&self, list: CollectionSchemeList) {
        self.slots.put_scheme_list(Arc::new(list));
        let _ = self.wake.try_send(());
    }

    /// Hands over a freshly received decoder manifest and wakes the
    /// manager.
    pub fn on_decoder_manifest_update(&self, manifest: DecoderManifest) {
        self.slots.put_manifest(Arc::new(manifest));
        let _ = self.wake.try_send(());
    }
}

/// Owner of the manager thread; stopping consumes the controller.
pub struct SchemeManagerController {
    handle: SchemeManagerHandle,
    thread: JoinHandle<()>,
}

impl SchemeManagerController {
    pub fn handle(&self) -> SchemeManagerHandle {
        self.handle.clone()
    }

    pub fn stop(self) {
        self.handle.should_stop.store(true, Ordering::Relaxed);
        let _ = self.handle.wake.try_send(());
        if self.thread.join().is_err() {
            warn!("SchemeManager thread panicked before join");
        }
    }
}

/// Builder for the scheme manager service. Listeners and collaborators
/// are installed before start; none of them is mandatory, absent ones are
/// simply skipped.
pub struct SchemeManagerService {
    config: SchemeManagerConfig,
    persistency: Option<Arc<dyn CacheAndPersist>>,
    codec: Option<Arc<dyn SchemeCodec>>,
    checkin: Option<Arc<dyn CheckinSender>>,
    matrix_listeners: Vec<Arc<dyn InspectionMatrixListener>>,
    dictionary_listeners: Vec<Arc<dyn DecoderDictionaryListener>>,
}

impl SchemeManagerService {
    pub fn new(config: SchemeManagerConfig) -> Self {
        SchemeManagerService {
            config,
            persistency: None,
            codec: None,
            checkin: None,
            matrix_listeners: Vec::new(),
            dictionary_listeners: Vec::new(),
        }
    }

    pub fn persistency(mut self, persistency: Arc<dyn CacheAndPersist>) -> Self {
        self.persistency = Some(persistency);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn SchemeCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn checkin_sender(mut self, sender: Arc<dyn CheckinSender>) -> Self {
        self.checkin = Some(sender);
        self
    }

    pub fn register_matrix_listener(mut self, listener: Arc<dyn InspectionMatrixListener>) -> Self {
        self.matrix_listeners.push(listener);
        self
    }

    pub fn register_dictionary_listener(
        mut self,
        listener: Arc<dyn DecoderDictionaryListener>,
    ) -> Self {
        self.dictionary_listeners.push(listener);
        self
    }

    /// Spawns the manager thread.
    pub fn start(self) -> SchemeManagerController {
        let (wake_tx, wake_rx) = bounded(SIGNAL_CHANNEL_SIZE);
        let slots = Arc::new(UpdateSlots::default());
        let should_stop = Arc::new(AtomicBool::new(false));

        let manager = Manager {
            state: SchemeManagerState::new(self.config.max_expression_depth),
            config: self.config,
            persistency: self.persistency,
            codec: self.codec,
            checkin: self.checkin,
            matrix_listeners: self.matrix_listeners,
            dictionary_listeners: self.dictionary_listeners,
            slots: Arc::clone(&slots),
            wake_rx,
            should_stop: Arc::clone(&should_stop),
        };

        let thread = thread::Builder::new()
            .name("SchemeManager".to_string())
            .spawn(move || manager.run())
            .expect("Start SchemeManager thread failed");
        info!("scheme manager started");

        SchemeManagerController {
            handle: SchemeManagerHandle {
                slots,
                wake: wake_tx,
                should_stop,
            },
            thread,
        }
    }
}

struct Manager {
    state: SchemeManagerState,
    config: SchemeManagerConfig,
    persistency: Option<Arc<dyn CacheAndPersist>>,
    codec: Option<Arc<dyn SchemeCodec>>,
    checkin: Option<Arc<dyn CheckinSender>>,
    matrix_listeners: Vec<Arc<dyn InspectionMatrixListener>>,
    dictionary_listeners: Vec<Arc<dyn DecoderDictionaryListener>>,
    slots: Arc<UpdateSlots>,
    wake_rx: Receiver<()>,
    should_stop: Arc<AtomicBool>,
}

impl Manager {
    fn run(mut self) {
        self.restore();
        let mut last_checkin_ms: Timestamp = 0;

        while !self.should_stop.load(Ordering::Relaxed) {
            let now = unix_time_as_millis();

            let mut enabled_changed = false;
            let mut dictionary_due = false;

            // a pending manifest goes first; a scheme list arriving in the
            // same wake stays queued and diffs against the post-swap maps
            // on the next tick
            if let Some(manifest) = self.slots.take_manifest() {
                self.persist(DataType::DecoderManifest, &manifest.source_bytes);
                enabled_changed |= self.state.process_manifest(manifest);
                dictionary_due = true;
            } else if let Some(list) = self.slots.take_scheme_list() {
                self.persist(DataType::SchemeList, &list.source_bytes);
                enabled_changed |= self.state.process_scheme_list(&list, now);
            }
            enabled_changed |= self.state.check_timeline(now);

            // the dictionary tracks the enabled set as well as the manifest
            if enabled_changed || dictionary_due {
                let dictionary = Arc::new(self.state.build_dictionary());
                for listener in &self.dictionary_listeners {
                    listener.on_dictionary_changed(Arc::clone(&dictionary));
                }
            }
            if enabled_changed {
                let matrix = Arc::new(self.state.build_matrix());
                info!(
                    "inspection matrix rebuilt: {} conditions from {} enabled schemes",
                    matrix.conditions.len(),
                    self.state.enabled.len()
                );
                for listener in &self.matrix_listeners {
                    listener.on_matrix_changed(Arc::clone(&matrix));
                }
            }

            if now.saturating_sub(last_checkin_ms) >= self.config.checkin_interval_ms {
                self.send_checkin(now);
                last_checkin_ms = now;
            }

            // a queued update must not wait out the park below
            if self.slots.has_pending() {
                continue;
            }

            let now = unix_time_as_millis();
            let mut wait_ms = (last_checkin_ms + self.config.checkin_interval_ms)
                .saturating_sub(now);
            if let Some(next) = self.state.next_deadline_ms() {
                wait_ms = wait_ms.min(next.saturating_sub(now));
            }
            let _ = self
                .wake_rx
                .recv_timeout(Duration::from_millis(wait_ms.max(1)));
        }
        info!("scheme manager stopped");
    }

    /// Replays the persisted manifest and scheme list, as if they had just
    /// arrived from the transport. Blobs that no longer decode are erased.
    fn restore(&mut self) {
        let (Some(persistency), Some(codec)) = (&self.persistency, &self.codec) else {
            return;
        };

        match persistency.read(DataType::DecoderManifest) {
            Ok(Some(bytes)) => match codec.decode_manifest(&bytes) {
                Ok(manifest) => {
                    info!("restored decoder manifest `{}`", manifest.manifest_id);
                    self.slots.put_manifest(Arc::new(manifest));
                }
                Err(err) => {
                    warn!("persisted manifest no longer decodes ({}), erasing", err);
                    let _ = persistency.erase(DataType::DecoderManifest);
                }
            },
            Ok(None) => {}
            Err(err) => warn!("reading persisted manifest failed: {}", err),
        }

        match persistency.read(DataType::SchemeList) {
            Ok(Some(bytes)) => match codec.decode_scheme_list(&bytes) {
                Ok(list) => {
                    info!("restored scheme list with {} schemes", list.schemes.len());
                    self.slots.put_scheme_list(Arc::new(list));
                }
                Err(err) => {
                    warn!("persisted scheme list no longer decodes ({}), erasing", err);
                    let _ = persistency.erase(DataType::SchemeList);
                }
            },
            Ok(None) => {}
            Err(err) => warn!("reading persisted scheme list failed: {}", err),
        }
    }

    fn persist(&self, kind: DataType, bytes: &[u8]) {
        let Some(persistency) = &self.persistency else {
            return;
        };
        if let Err(err) = persistency.write(kind, bytes) {
            // non-fatal: the agent keeps running on the in-memory state
            warn!("persisting `{}` failed: {}", kind.key(), err);
        }
    }

    fn send_checkin(&self, now_ms: Timestamp) {
        let Some(sender) = &self.checkin else {
            return;
        };
        let checkin = Checkin {
            timestamp_ms: now_ms,
            decoder_manifest_id: self.state.manifest_id(),
            collection_scheme_ids: self.state.enabled_ids(),
        };
        let bytes = match serde_json::to_vec(&checkin) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("checkin serialization failed: {}", err);
                return;
            }
        };
        if let Err(err) = sender.send(&bytes) {
            warn!("checkin send failed, retrying at the next cadence: {}", err);
        }
    }
}
