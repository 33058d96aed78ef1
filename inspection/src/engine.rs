use fleetd_eval::{evaluate, EvalContext, EvalValue};
use fleetd_logger::{debug, trace, warn};
use fleetd_store::SignalHistoryStore;
use fleetd_types::{
    CanFrame, Condition, ConditionId, DtcInfo, InspectionMatrix, SignalSample, Timestamp,
    TriggeredCollectionSchemeData,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

/// A trigger whose payload is waiting for its after-duration to elapse.
struct PendingCollection {
    trigger_time_ms: Timestamp,
    /// Instant the payload may be sealed: trigger time plus after-duration.
    seal_time_ms: Timestamp,
    window_start_ms: i64,
    window_end_ms: i64,
}

/// Mutable per-condition evaluation state. Reset when a matrix is
/// installed; conditions start out `Undefined` (no previous result).
#[derive(Default)]
struct ConditionState {
    last_result: Option<bool>,
    last_trigger_time_ms: Option<Timestamp>,
    pending: Option<PendingCollection>,
    /// A sealed payload the output queue has not accepted yet. A
    /// re-trigger of the same condition replaces it.
    ready: Option<Arc<TriggeredCollectionSchemeData>>,
}

/// Evaluates the installed inspection matrix against the signal history
/// and produces triggered payloads.
///
/// Owned by the inspection worker; all methods take `&mut self` and are
/// driven from a single thread.
pub struct CollectionInspectionEngine {
    matrix: Option<Arc<InspectionMatrix>>,
    store: SignalHistoryStore,
    states: Vec<ConditionState>,
    ring_buffer_ceiling_samples: usize,
    data_reduction_probability_disabled: bool,
    rng: StdRng,
}

impl CollectionInspectionEngine {
    pub fn new(ring_buffer_ceiling_samples: usize, data_reduction_probability_disabled: bool) -> Self {
        CollectionInspectionEngine {
            matrix: None,
            store: SignalHistoryStore::new(),
            states: Vec::new(),
            ring_buffer_ceiling_samples,
            data_reduction_probability_disabled,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn has_matrix(&self) -> bool {
        self.matrix.is_some()
    }

    /// Atomically replaces the active matrix.
    ///
    /// History buffers are reconciled: signals no longer referenced are
    /// dropped, new ones allocated, surviving ones kept (growing only).
    /// Condition state starts fresh for the new generation.
    pub fn install_matrix(&mut self, matrix: Arc<InspectionMatrix>) {
        self.store.reconcile(
            &matrix.signal_capture_windows_ms,
            &matrix.frame_capture_windows_ms,
            self.ring_buffer_ceiling_samples,
        );
        self.states = matrix.conditions.iter().map(|_| ConditionState::default()).collect();
        debug!(
            "inspection matrix installed: {} conditions, {} signals",
            matrix.conditions.len(),
            matrix.signal_capture_windows_ms.len()
        );
        self.matrix = Some(matrix);
    }

    pub fn add_signal(&mut self, sample: SignalSample) {
        self.store.append_sample(&sample);
    }

    pub fn add_frame(&mut self, frame: CanFrame) {
        self.store.append_frame(&frame);
    }

    pub fn set_active_dtcs(&mut self, info: DtcInfo) {
        self.store.set_active_dtcs(info);
    }

    /// Evaluates every condition of the matrix at `now_ms` and schedules
    /// payload collections for the ones that trigger.
    ///
    /// An evaluation error in one condition never affects the others; it
    /// counts as "not triggering" and leaves the edge state untouched.
    pub fn evaluate_conditions(&mut self, now_ms: Timestamp) {
        let Some(matrix) = self.matrix.clone() else {
            return;
        };

        for (index, condition) in matrix.conditions.iter().enumerate() {
            let ctx = EvalContext {
                now_ms,
                window_ms: condition.capture_window_ms,
                store: &self.store,
            };
            let root_result = match evaluate(&condition.nodes, condition.root, &ctx) {
                Ok(EvalValue::Bool(value)) => value,
                Ok(EvalValue::Double(_)) => {
                    trace!(
                        "condition {} root is not a predicate, skipping",
                        condition.condition_id
                    );
                    continue;
                }
                Err(err) => {
                    trace!("condition {} not evaluated: {}", condition.condition_id, err);
                    continue;
                }
            };

            let state = &mut self.states[index];
            let edge_ok =
                !condition.trigger_only_on_rising_edge || state.last_result != Some(true);
            let interval_ok = state.last_trigger_time_ms.map_or(true, |last| {
                now_ms.saturating_sub(last) >= condition.min_publish_interval_ms
            });

            if root_result && edge_ok && interval_ok {
                let send = self.data_reduction_probability_disabled
                    || draw_allows(&mut self.rng, condition.probability_to_send);
                let state = &mut self.states[index];
                if send {
                    state.last_trigger_time_ms = Some(now_ms);
                    let window_end_ms = now_ms as i64 + condition.after_duration_ms as i64;
                    let window_start_ms = window_end_ms - condition.capture_window_ms as i64;
                    state.pending = Some(PendingCollection {
                        trigger_time_ms: now_ms,
                        seal_time_ms: now_ms + condition.after_duration_ms,
                        window_start_ms,
                        window_end_ms,
                    });
                    // a fresh trigger supersedes a payload the queue never took
                    state.ready = None;
                    trace!(
                        "condition {} triggered at {}, seal at {}",
                        condition.condition_id,
                        now_ms,
                        now_ms + condition.after_duration_ms
                    );
                } else {
                    trace!(
                        "condition {} trigger dropped by probability {}",
                        condition.condition_id,
                        condition.probability_to_send
                    );
                }
            }
            self.states[index].last_result = Some(root_result);
        }
    }

    /// Returns the next payload ready to publish, if any, together with a
    /// hint in milliseconds until the next known seal deadline.
    ///
    /// The returned payload stays owned by the engine until
    /// [`payload_accepted`](Self::payload_accepted) confirms the queue took
    /// it; calling this again before that returns the same payload.
    pub fn collect_next_data_to_send(
        &mut self,
        now_ms: Timestamp,
    ) -> (Option<Arc<TriggeredCollectionSchemeData>>, Option<u64>) {
        let Some(matrix) = self.matrix.clone() else {
            return (None, None);
        };

        // seal every pending collection whose after-duration elapsed
        for (index, condition) in matrix.conditions.iter().enumerate() {
            let due = matches!(
                self.states[index].pending,
                Some(ref pending) if pending.seal_time_ms <= now_ms
            );
            if due {
                let pending = self.states[index].pending.take().expect("checked above");
                let payload = build_payload(&self.store, condition, &pending);
                self.states[index].ready = Some(Arc::new(payload));
            }
        }

        let mut wait_hint_ms: Option<u64> = None;
        for state in &self.states {
            if let Some(pending) = &state.pending {
                let remaining = pending.seal_time_ms.saturating_sub(now_ms);
                wait_hint_ms = Some(wait_hint_ms.map_or(remaining, |hint| hint.min(remaining)));
            }
        }

        // highest priority first, condition id as the tie-break
        let mut best: Option<(u32, ConditionId, usize)> = None;
        for (index, condition) in matrix.conditions.iter().enumerate() {
            if self.states[index].ready.is_none() {
                continue;
            }
            let candidate = (condition.priority, condition.condition_id, index);
            best = match best {
                None => Some(candidate),
                Some(current) => {
                    if candidate.0 > current.0 || (candidate.0 == current.0 && candidate.1 < current.1)
                    {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        let payload = best.and_then(|(_, _, index)| self.states[index].ready.clone());
        (payload, wait_hint_ms)
    }

    /// Confirms the output queue accepted the payload of `condition_id`.
    pub fn payload_accepted(&mut self, condition_id: ConditionId) {
        let Some(matrix) = &self.matrix else {
            return;
        };
        for (index, condition) in matrix.conditions.iter().enumerate() {
            if condition.condition_id == condition_id {
                self.states[index].ready = None;
                return;
            }
        }
        warn!("payload_accepted for unknown condition {}", condition_id);
    }

    /// Read access to the history store, for tests and counters.
    pub fn store(&self) -> &SignalHistoryStore {
        &self.store
    }
}

fn draw_allows(rng: &mut StdRng, probability_to_send: f64) -> bool {
    if probability_to_send >= 1.0 {
        true
    } else if probability_to_send <= 0.0 {
        false
    } else {
        rng.gen::<f64>() <= probability_to_send
    }
}

fn build_payload(
    store: &SignalHistoryStore,
    condition: &Condition,
    pending: &PendingCollection,
) -> TriggeredCollectionSchemeData {
    let mut signals = Vec::new();
    for &signal_id in &condition.collect_signals {
        // the collection window is inclusive at both ends
        for (receive_time_ms, value) in
            store.samples_in_range(signal_id, pending.window_start_ms, pending.window_end_ms + 1)
        {
            signals.push(SignalSample::new(signal_id, receive_time_ms, value));
        }
    }

    let mut can_frames = Vec::new();
    for &(channel_id, frame_id) in &condition.collect_frames {
        can_frames.extend(
            store
                .frames_in_range(
                    channel_id,
                    frame_id,
                    pending.window_start_ms,
                    pending.window_end_ms + 1,
                )
                .copied(),
        );
    }

    let active_dtcs = if condition.include_active_dtcs {
        store.active_dtcs().cloned()
    } else {
        None
    };

    TriggeredCollectionSchemeData {
        scheme_id: condition.scheme_id.clone(),
        decoder_manifest_id: condition.decoder_manifest_id.clone(),
        condition_id: condition.condition_id,
        priority: condition.priority,
        trigger_time_ms: pending.trigger_time_ms,
        window_start_ms: pending.window_start_ms,
        window_end_ms: pending.window_end_ms,
        signals,
        can_frames,
        active_dtcs,
        image_capture: condition.image_capture.clone(),
        persist_needed: condition.persist_needed,
        compression_needed: condition.compression_needed,
    }
}

#[cfg(test)]
mod tests;
