use crate::engine::CollectionInspectionEngine;
use fleetd_app_config::InspectionConfig;
use fleetd_channel::{bounded, Receiver, Sender, TrySendError, SIGNAL_CHANNEL_SIZE};
use fleetd_error::{Error, Result};
use fleetd_logger::{debug, info, trace, warn};
use fleetd_systemtime::unix_time_as_millis;
use fleetd_types::{
    CanFrame, DtcInfo, InspectionMatrix, InspectionMatrixListener, SignalSample, Timestamp,
    TriggeredCollectionSchemeData,
};
use fleetd_util::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the worker reports its idle statistics.
const IDLE_TRACE_INTERVAL_MS: Timestamp = 10_000;

/// The three inbound queues the worker consumes.
pub struct InputQueues {
    pub signals: Receiver<SignalSample>,
    pub can_frames: Receiver<CanFrame>,
    pub active_dtcs: Receiver<DtcInfo>,
}

/// Hand-off slot for a freshly compiled matrix.
///
/// The mutex is held only to swap the pointer and flip the flag; the
/// worker picks the snapshot up at the top of its next iteration and
/// evaluates lock-free from then on.
#[derive(Default)]
struct MatrixSlot {
    inner: Mutex<MatrixSlotInner>,
}

#[derive(Default)]
struct MatrixSlotInner {
    updated_available: bool,
    matrix: Option<Arc<InspectionMatrix>>,
}

impl MatrixSlot {
    fn publish(&self, matrix: Arc<InspectionMatrix>) {
        let mut inner = self.inner.lock();
        inner.matrix = Some(matrix);
        inner.updated_available = true;
    }

    fn take_updated(&self) -> Option<Arc<InspectionMatrix>> {
        let mut inner = self.inner.lock();
        if inner.updated_available {
            inner.updated_available = false;
            inner.matrix.clone()
        } else {
            None
        }
    }
}

/// Cloneable handle on a running inspection worker.
///
/// Producers use [`notify_data_available`](Self::notify_data_available)
/// after pushing into an input queue; the scheme manager publishes each
/// new matrix through the [`InspectionMatrixListener`] impl.
#[derive(Clone)]
pub struct InspectionHandle {
    matrix_slot: Arc<MatrixSlot>,
    wake: Sender<()>,
    should_stop: Arc<AtomicBool>,
}

impl InspectionHandle {
    /// Wakes the worker; notifications are coalesced.
    pub fn notify_data_available(&self) {
        let _ = self.wake.try_send(());
    }
}

impl InspectionMatrixListener for InspectionHandle {
    fn on_matrix_changed(&self, matrix: Arc<InspectionMatrix>) {
        self.matrix_slot.publish(matrix);
        trace!("new inspection matrix handed over");
        let _ = self.wake.try_send(());
    }
}

/// Owner of the worker thread; stopping consumes the controller.
pub struct InspectionController {
    handle: InspectionHandle,
    thread: JoinHandle<()>,
}

impl InspectionController {
    pub fn handle(&self) -> InspectionHandle {
        self.handle.clone()
    }

    /// Requests stop, wakes the worker, and joins it.
    pub fn stop(self) {
        self.handle.should_stop.store(true, Ordering::Relaxed);
        let _ = self.handle.wake.try_send(());
        if self.thread.join().is_err() {
            warn!("InspectionWorker thread panicked before join");
        }
    }
}

/// Builder for the inspection worker thread.
pub struct InspectionService {
    config: InspectionConfig,
    inputs: Option<InputQueues>,
    output: Option<Sender<Arc<TriggeredCollectionSchemeData>>>,
}

impl InspectionService {
    pub fn new(config: InspectionConfig) -> Self {
        InspectionService {
            config,
            inputs: None,
            output: None,
        }
    }

    pub fn input_queues(mut self, inputs: InputQueues) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn output_queue(mut self, output: Sender<Arc<TriggeredCollectionSchemeData>>) -> Self {
        self.output = Some(output);
        self
    }

    /// Spawns the worker thread.
    ///
    /// All four queues are mandatory; starting without them is a
    /// configuration error.
    pub fn start(self) -> Result<InspectionController> {
        let inputs = self.inputs.ok_or(Error::NotConfigured("inspection input queues"))?;
        let output = self.output.ok_or(Error::NotConfigured("inspection output queue"))?;

        let (wake_tx, wake_rx) = bounded(SIGNAL_CHANNEL_SIZE);
        let matrix_slot = Arc::new(MatrixSlot::default());
        let should_stop = Arc::new(AtomicBool::new(false));

        let engine = CollectionInspectionEngine::new(
            self.config.ring_buffer_ceiling_samples,
            self.config.data_reduction_probability_disabled,
        );
        let worker = Worker {
            config: self.config,
            engine,
            inputs,
            output,
            wake_rx,
            matrix_slot: Arc::clone(&matrix_slot),
            should_stop: Arc::clone(&should_stop),
        };

        let thread = thread::Builder::new()
            .name("InspectionWorker".to_string())
            .spawn(move || worker.run())
            .expect("Start InspectionWorker thread failed");
        info!("inspection worker started");

        Ok(InspectionController {
            handle: InspectionHandle {
                matrix_slot,
                wake: wake_tx,
                should_stop,
            },
            thread,
        })
    }
}

struct Worker {
    config: InspectionConfig,
    engine: CollectionInspectionEngine,
    inputs: InputQueues,
    output: Sender<Arc<TriggeredCollectionSchemeData>>,
    wake_rx: Receiver<()>,
    matrix_slot: Arc<MatrixSlot>,
    should_stop: Arc<AtomicBool>,
}

impl Worker {
    fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::Relaxed)
    }

    fn park(&self, duration_ms: u64) {
        let _ = self.wake_rx.recv_timeout(Duration::from_millis(duration_ms));
    }

    fn run(mut self) {
        let mut last_input_time_evaluated: Timestamp = 0;
        let mut last_time_evaluated: Timestamp = 0;
        let mut input_counter: u32 = 0;
        let mut processed_since_trace: u64 = 0;
        let mut sent_since_trace: u64 = 0;
        let mut last_trace_output: Timestamp = 0;

        while !self.should_stop() {
            if let Some(matrix) = self.matrix_slot.take_updated() {
                self.engine.install_matrix(matrix);
            }
            // without a matrix there is nothing to inspect
            if !self.engine.has_matrix() {
                self.park(self.config.idle_time_ms);
                continue;
            }

            let mut ready_to_sleep = true;
            let mut latest_input_time: Timestamp = 0;

            // one item per queue per iteration bounds the work between
            // evaluation opportunities
            if let Ok(sample) = self.inputs.signals.try_recv() {
                latest_input_time = latest_input_time.max(sample.receive_time_ms);
                self.engine.add_signal(sample);
                input_counter += 1;
                processed_since_trace += 1;
                ready_to_sleep = false;
            }
            if let Ok(frame) = self.inputs.can_frames.try_recv() {
                latest_input_time = latest_input_time.max(frame.receive_time_ms);
                self.engine.add_frame(frame);
                input_counter += 1;
                processed_since_trace += 1;
                ready_to_sleep = false;
            }
            // one snapshot describes the whole network, the newest wins
            if let Ok(dtc_info) = self.inputs.active_dtcs.try_recv() {
                self.engine.set_active_dtcs(dtc_info);
                ready_to_sleep = false;
            }

            if latest_input_time.saturating_sub(last_input_time_evaluated)
                >= self.config.evaluate_interval_ms
                || input_counter >= self.config.input_batch_trigger_count
            {
                last_input_time_evaluated = latest_input_time;
                last_time_evaluated = unix_time_as_millis();
                self.engine.evaluate_conditions(last_time_evaluated);
                input_counter = 0;
            }

            // catch up on wall-clock time before parking, so time-driven
            // predicates fire even while the buses are quiet
            if ready_to_sleep
                && unix_time_as_millis().saturating_sub(last_time_evaluated)
                    >= self.config.evaluate_interval_ms
            {
                last_input_time_evaluated = latest_input_time;
                last_time_evaluated = unix_time_as_millis();
                self.engine.evaluate_conditions(last_time_evaluated);
                input_counter = 0;
            }

            let mut wait_hint_ms = self.config.idle_time_ms;
            while !self.should_stop() {
                let now = unix_time_as_millis();
                let (payload, hint) = self.engine.collect_next_data_to_send(now);
                if let Some(hint) = hint {
                    wait_hint_ms = wait_hint_ms.min(hint);
                }
                let Some(payload) = payload else {
                    break;
                };
                let condition_id = payload.condition_id;
                match self.output.try_send(payload) {
                    Ok(()) => {
                        self.engine.payload_accepted(condition_id);
                        sent_since_trace += 1;
                    }
                    Err(TrySendError::Full(_)) => {
                        // the engine keeps the payload; retried next tick
                        warn!("collected data output queue is full");
                        break;
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("collected data output queue is disconnected");
                        break;
                    }
                }
            }

            if ready_to_sleep {
                let now = unix_time_as_millis();
                if now.saturating_sub(last_trace_output) >= IDLE_TRACE_INTERVAL_MS {
                    trace!(
                        "idling for up to {} ms; since last report processed {} inputs, sent {} payloads",
                        wait_hint_ms.min(self.config.idle_time_ms),
                        processed_since_trace,
                        sent_since_trace
                    );
                    processed_since_trace = 0;
                    sent_since_trace = 0;
                    last_trace_output = now;
                }
                self.park(wait_hint_ms.min(self.config.idle_time_ms));
            }
        }
        info!("inspection worker stopped");
    }
}

#[cfg(test)]
mod tests;
