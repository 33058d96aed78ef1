//! Scheme lifecycle management.
//!
//! Owns the idle/enabled scheme maps, the decoder manifest, and the
//! deadline timeline; compiles the inspection matrix on every admissible
//! change and publishes it to the inspection worker, the filtered decoder
//! dictionary to the bus decoders, and a periodic checkin summary
//! upstream.

mod compiler;
mod dictionary;
mod manager;

pub use compiler::build_inspection_matrix;
pub use dictionary::CurrentDecoderDictionary;
pub use manager::{SchemeManagerController, SchemeManagerHandle, SchemeManagerService};

use fleetd_error::{Error, Result};
use fleetd_types::{CollectionSchemeList, DecoderManifest};

/// Transport seam for the periodic checkin summary.
pub trait CheckinSender: Send + Sync {
    fn send(&self, checkin: &[u8]) -> Result<()>;
}

/// Decodes persisted blobs back into the structures the transport would
/// have delivered. Parsing of the live wire format happens upstream of the
/// manager; this seam only exists for replay after a restart.
pub trait SchemeCodec: Send + Sync {
    fn decode_scheme_list(&self, bytes: &[u8]) -> Result<CollectionSchemeList>;
    fn decode_manifest(&self, bytes: &[u8]) -> Result<DecoderManifest>;
}

/// JSON-backed [`SchemeCodec`], used by the host binary and the test
/// harness.
#[derive(Default)]
pub struct JsonSchemeCodec;

impl SchemeCodec for JsonSchemeCodec {
    fn decode_scheme_list(&self, bytes: &[u8]) -> Result<CollectionSchemeList> {
        let mut list: CollectionSchemeList =
            serde_json::from_slice(bytes).map_err(Error::invalid_schema)?;
        list.source_bytes = bytes.to_vec();
        Ok(list)
    }

    fn decode_manifest(&self, bytes: &[u8]) -> Result<DecoderManifest> {
        let mut manifest: DecoderManifest =
            serde_json::from_slice(bytes).map_err(Error::invalid_schema)?;
        manifest.source_bytes = bytes.to_vec();
        Ok(manifest)
    }
}
