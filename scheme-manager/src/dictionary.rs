//! Decoder dictionary derivation and the shared current-dictionary slot.

use arc_swap::ArcSwapOption;
use fleetd_types::{
    CanCollectType, CanMessageDecoderMethod, CanMessageFormat, CollectionScheme,
    DecoderDictionary, DecoderDictionaryListener, DecoderManifest, SignalId,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Filters `manifest` down to what the enabled `schemes` actually need:
/// the signal ids to collect, and a decoder rule per (channel, frame)
/// carrying whether the frame is wanted decoded, raw, or both.
pub(crate) fn extract_decoder_dictionary<'a>(
    schemes: impl IntoIterator<Item = &'a CollectionScheme>,
    manifest: &DecoderManifest,
) -> DecoderDictionary {
    let mut dictionary = DecoderDictionary::default();

    for scheme in schemes {
        let mut referenced: BTreeSet<SignalId> =
            scheme.condition.collect_signals.iter().copied().collect();
        scheme.condition.expression.referenced_signals(&mut referenced);

        for signal_id in referenced {
            let Some(method) = manifest.signals.get(&signal_id) else {
                continue;
            };
            dictionary.signal_ids_to_collect.insert(signal_id);
            let format = manifest
                .frame_format(method.channel_id, method.frame_id)
                .cloned()
                .unwrap_or_else(|| CanMessageFormat {
                    frame_id: method.frame_id,
                    size_bytes: 8,
                    signals: vec![method.clone()],
                });
            upgrade(
                &mut dictionary,
                method.channel_id,
                method.frame_id,
                CanCollectType::Decode,
                format,
            );
        }

        for &(channel_id, frame_id) in &scheme.condition.collect_frames {
            let format = manifest
                .frame_format(channel_id, frame_id)
                .cloned()
                .unwrap_or_else(|| CanMessageFormat {
                    frame_id,
                    size_bytes: 8,
                    signals: Vec::new(),
                });
            upgrade(
                &mut dictionary,
                channel_id,
                frame_id,
                CanCollectType::Raw,
                format,
            );
        }
    }

    dictionary
}

fn upgrade(
    dictionary: &mut DecoderDictionary,
    channel_id: u32,
    frame_id: u32,
    wanted: CanCollectType,
    format: CanMessageFormat,
) {
    dictionary
        .can_decoder_method
        .entry(channel_id)
        .or_default()
        .entry(frame_id)
        .and_modify(|method| {
            if method.collect_type != wanted {
                method.collect_type = CanCollectType::RawAndDecode;
            }
        })
        .or_insert(CanMessageDecoderMethod {
            collect_type: wanted,
            format,
        });
}

/// Lock-free holder of the dictionary snapshot the bus decoders read on
/// every frame.
///
/// The scheme manager stores a new snapshot through the listener impl;
/// readers load the pointer without taking a lock.
#[derive(Default)]
pub struct CurrentDecoderDictionary {
    inner: ArcSwapOption<DecoderDictionary>,
}

impl CurrentDecoderDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently published snapshot, if any.
    pub fn load(&self) -> Option<Arc<DecoderDictionary>> {
        self.inner.load_full()
    }
}

impl DecoderDictionaryListener for CurrentDecoderDictionary {
    fn on_dictionary_changed(&self, dictionary: Arc<DecoderDictionary>) {
        self.inner.store(Some(dictionary));
    }
}
