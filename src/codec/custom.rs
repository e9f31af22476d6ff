//! Re-labelling codec: exposes an external value representation on top of
//! an underlying codec, with conversion functions both ways.

use super::{CodecResult, Fragment, KeyCodec, KeyValue};

/// Conversion pair mapping the external representation to the underlying
/// codec's internal one. Plain function pointers keep the codec `Clone`
/// and `Debug` without boxing closures.
#[derive(Clone)]
pub struct CustomCodec {
    pub underlying: KeyCodec,
    pub to_internal: fn(&KeyValue) -> CodecResult<KeyValue>,
    pub of_internal: fn(&KeyValue) -> CodecResult<KeyValue>,
    pub pretty: fn(&KeyValue) -> String,
}

impl std::fmt::Debug for CustomCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomCodec")
            .field("underlying", &self.underlying)
            .finish_non_exhaustive()
    }
}

impl CustomCodec {
    pub fn wrap(
        underlying: KeyCodec,
        to_internal: fn(&KeyValue) -> CodecResult<KeyValue>,
        of_internal: fn(&KeyValue) -> CodecResult<KeyValue>,
        pretty: fn(&KeyValue) -> String,
    ) -> KeyCodec {
        KeyCodec::Custom(Box::new(Self {
            underlying,
            to_internal,
            of_internal,
            pretty,
        }))
    }

    pub(super) fn encode(&self, out: &mut Vec<u8>, external: &KeyValue) -> CodecResult<()> {
        let internal = (self.to_internal)(external)?;
        self.underlying.encode(out, &internal)
    }

    pub(super) fn decode(&self, frag: &mut Fragment<'_>) -> CodecResult<KeyValue> {
        let internal = self.underlying.decode(frag)?;
        (self.of_internal)(&internal)
    }

    pub(super) fn min_value(&self) -> KeyValue {
        (self.of_internal)(&self.underlying.min_value())
            .unwrap_or_else(|_| self.underlying.min_value())
    }

    pub(super) fn max_value(&self) -> KeyValue {
        (self.of_internal)(&self.underlying.max_value())
            .unwrap_or_else(|_| self.underlying.max_value())
    }

    pub(super) fn succ(&self, external: &KeyValue) -> CodecResult<KeyValue> {
        let internal = (self.to_internal)(external)?;
        (self.of_internal)(&self.underlying.succ(&internal)?)
    }

    pub(super) fn pred(&self, external: &KeyValue) -> CodecResult<KeyValue> {
        let internal = (self.to_internal)(external)?;
        (self.of_internal)(&self.underlying.pred(&internal)?)
    }

    pub(super) fn pp(&self, external: &KeyValue) -> String {
        (self.pretty)(external)
    }
}
