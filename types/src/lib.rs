//! Data model shared by the fleetd collection and inspection crates.
//!
//! Everything here is plain data: samples and frames coming off the vehicle
//! buses, the expression language schemes are written in, the compiled
//! inspection matrix, and the payloads handed to the upstream transport.
//! Services own their state; these types only describe it.

mod condition;
mod decoder;
mod expression;
mod payload;
mod scheme;
mod signal;

use std::sync::Arc;

pub use condition::{Condition, ConditionId, ImageCapture, InspectionMatrix};
pub use decoder::{
    CanCollectType, CanMessageDecoderMethod, CanMessageFormat, DecoderDictionary, DecoderManifest,
    SignalDecoderMethod,
};
pub use expression::{
    BinaryOperator, ExpressionNode, ExpressionTree, GeofenceTest, UnaryOperator, WindowFunction,
};
pub use payload::TriggeredCollectionSchemeData;
pub use scheme::{CollectionScheme, CollectionSchemeList, SchemeCondition};
pub use signal::{
    CanFrame, ChannelId, DtcInfo, FrameId, SignalId, SignalSample, Timestamp, MAX_CAN_FRAME_BYTES,
};

/// Receives each freshly compiled inspection matrix.
///
/// Registered by the inspection worker; called by the scheme manager from
/// its own thread. Implementations must hand the snapshot over without
/// blocking for long, e.g. by storing it into a slot and waking the worker.
pub trait InspectionMatrixListener: Send + Sync {
    fn on_matrix_changed(&self, matrix: Arc<InspectionMatrix>);
}

/// Receives each freshly derived decoder dictionary.
///
/// Registered by bus decoders; called by the scheme manager whenever the
/// manifest or the set of enabled schemes changes.
pub trait DecoderDictionaryListener: Send + Sync {
    fn on_dictionary_changed(&self, dictionary: Arc<DecoderDictionary>);
}
