//! fleetd host binary: wires the queues, starts the inspection worker and
//! the scheme manager, and waits for ctrl-c.
//!
//! Bus decoders and the upstream transport are separate processes or
//! plugins; this binary owns the collection and inspection core and its
//! external seams.

use fleetd_app_config::AppConfig;
use fleetd_channel::bounded;
use fleetd_db::{CacheAndPersist, FileStore, MemoryStore};
use fleetd_inspection::{InputQueues, InspectionService};
use fleetd_logger::{error, info};
use fleetd_scheme_manager::{CurrentDecoderDictionary, JsonSchemeCodec, SchemeManagerService};
use std::process::exit;
use std::sync::Arc;

fn main() {
    fleetd_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "fleetd.toml".to_string());
    let config = match AppConfig::load_from_path(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load `{}`: {}", config_path, err);
            exit(1);
        }
    };

    // input queues: bus decoders hold the senders, the worker the receivers
    let (_signal_tx, signal_rx) = bounded(config.queues.signal_capacity);
    let (_can_tx, can_rx) = bounded(config.queues.can_capacity);
    let (_dtc_tx, dtc_rx) = bounded(config.queues.dtc_capacity);
    // output queue: the transport sender drains the receiver
    let (output_tx, _output_rx) = bounded(config.queues.output_capacity);

    let inspection = match InspectionService::new(config.inspection.clone())
        .input_queues(InputQueues {
            signals: signal_rx,
            can_frames: can_rx,
            active_dtcs: dtc_rx,
        })
        .output_queue(output_tx)
        .start()
    {
        Ok(controller) => controller,
        Err(err) => {
            error!("inspection worker failed to start: {}", err);
            exit(1);
        }
    };

    let persistency: Arc<dyn CacheAndPersist> = match &config.persistence.path {
        Some(path) => match FileStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                error!("persistence directory `{}` unusable: {}", path.display(), err);
                exit(1);
            }
        },
        None => Arc::new(MemoryStore::new()),
    };

    // bus decoders read the current dictionary snapshot from here
    let current_dictionary = Arc::new(CurrentDecoderDictionary::new());

    let manager = SchemeManagerService::new(config.scheme_manager.clone())
        .persistency(persistency)
        .codec(Arc::new(JsonSchemeCodec))
        .register_matrix_listener(Arc::new(inspection.handle()))
        .register_dictionary_listener(current_dictionary)
        .start();

    info!("fleetd is up; press ctrl-c to stop");

    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .expect("Install ctrl-c handler failed");
    let _ = stop_rx.recv();

    info!("shutting down");
    manager.stop();
    inspection.stop();
}
