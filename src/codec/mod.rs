//! Order-preserving key codecs.
//!
//! Every codec guarantees `x < y ⇒ encode(x) <_lex encode(y)` under byte
//! comparison, where `<` is the codec's own order (descending for
//! [`KeyCodec::PositiveInt64Complement`]). Composite codecs concatenate
//! component encodings; order preservation holds because every component
//! encoding is self-delimiting.

mod custom;
mod tuple;

pub use custom::CustomCodec;

use crate::error::{FragmentKind, StrataError};

pub type CodecResult<T> = Result<T, StrataError>;

/// Saturation cap for byte-string components: `max_value`, `succ` and
/// `pred` operate on the domain of strings up to this many bytes.
/// `encode`/`decode` accept any length.
pub const MAX_BYTES_COMPONENT_LEN: usize = 256;

/// Saturation cap for text components, in characters.
pub const MAX_TEXT_COMPONENT_LEN: usize = 64;

/// Cursor over an encoded key fragment.
#[derive(Debug)]
pub struct Fragment<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Fragment<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }

    pub fn take(&mut self, n: usize, kind: FragmentKind) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(StrataError::IncompleteFragment(kind));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn take_u8(&mut self, kind: FragmentKind) -> CodecResult<u8> {
        Ok(self.take(1, kind)?[0])
    }
}

/// Uniform value representation for the dynamic codecs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Byte(u8),
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
    Text(String),
    Tuple(Vec<KeyValue>),
    Choice(u8, Box<KeyValue>),
}

impl KeyValue {
    pub fn bytes(v: impl Into<Vec<u8>>) -> Self {
        KeyValue::Bytes(v.into())
    }

    pub fn text(v: impl Into<String>) -> Self {
        KeyValue::Text(v.into())
    }

    pub fn tuple(parts: impl Into<Vec<KeyValue>>) -> Self {
        KeyValue::Tuple(parts.into())
    }
}

/// A runtime-composed order-preserving codec.
///
/// Tuple and choice arities are restricted to 2..=5, matching the named
/// `tuple2`..`tuple5` and `choice2`..`choice5` constructors.
#[derive(Debug, Clone)]
pub enum KeyCodec {
    /// One raw byte, natural order.
    Byte,
    /// One byte, `false` = 0, `true` = 1.
    Bool,
    /// Big-endian `i64`; rejects negatives with `UnsatisfiedConstraint`.
    PositiveInt64,
    /// Big-endian of `i64::MAX − x`; reverses the numeric order.
    PositiveInt64Complement,
    /// 0x00 → 0x00 0xFF escaped, 0x00 0x00 terminated byte string.
    SelfDelimited,
    /// NUL-terminated text; rejects interior NUL bytes.
    Stringz,
    /// NUL-terminated text without the interior-NUL check. A value that
    /// does contain NUL will decode truncated.
    StringzUnsafe,
    Tuple(Vec<KeyCodec>),
    Choice(Vec<KeyCodec>),
    Custom(Box<CustomCodec>),
}

impl KeyCodec {
    pub fn tuple2(a: KeyCodec, b: KeyCodec) -> KeyCodec {
        KeyCodec::Tuple(vec![a, b])
    }

    pub fn tuple3(a: KeyCodec, b: KeyCodec, c: KeyCodec) -> KeyCodec {
        KeyCodec::Tuple(vec![a, b, c])
    }

    pub fn tuple4(a: KeyCodec, b: KeyCodec, c: KeyCodec, d: KeyCodec) -> KeyCodec {
        KeyCodec::Tuple(vec![a, b, c, d])
    }

    pub fn tuple5(a: KeyCodec, b: KeyCodec, c: KeyCodec, d: KeyCodec, e: KeyCodec) -> KeyCodec {
        KeyCodec::Tuple(vec![a, b, c, d, e])
    }

    pub fn choice2(a: KeyCodec, b: KeyCodec) -> KeyCodec {
        KeyCodec::Choice(vec![a, b])
    }

    pub fn choice3(a: KeyCodec, b: KeyCodec, c: KeyCodec) -> KeyCodec {
        KeyCodec::Choice(vec![a, b, c])
    }

    pub fn choice4(a: KeyCodec, b: KeyCodec, c: KeyCodec, d: KeyCodec) -> KeyCodec {
        KeyCodec::Choice(vec![a, b, c, d])
    }

    pub fn choice5(a: KeyCodec, b: KeyCodec, c: KeyCodec, d: KeyCodec, e: KeyCodec) -> KeyCodec {
        KeyCodec::Choice(vec![a, b, c, d, e])
    }

    /// Number of components: tuples report their arity, everything else 1.
    pub fn arity(&self) -> usize {
        match self {
            KeyCodec::Tuple(parts) => parts.len(),
            KeyCodec::Custom(custom) => custom.underlying.arity(),
            _ => 1,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>, value: &KeyValue) -> CodecResult<()> {
        match (self, value) {
            (KeyCodec::Byte, KeyValue::Byte(b)) => {
                out.push(*b);
                Ok(())
            }
            (KeyCodec::Bool, KeyValue::Bool(b)) => {
                out.push(u8::from(*b));
                Ok(())
            }
            (KeyCodec::PositiveInt64, KeyValue::Int(v)) => {
                if *v < 0 {
                    return Err(StrataError::UnsatisfiedConstraint(format!(
                        "positive_int64 cannot encode negative value {v}"
                    )));
                }
                out.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            (KeyCodec::PositiveInt64Complement, KeyValue::Int(v)) => {
                if *v < 0 {
                    return Err(StrataError::UnsatisfiedConstraint(format!(
                        "positive_int64_complement cannot encode negative value {v}"
                    )));
                }
                out.extend_from_slice(&(i64::MAX - v).to_be_bytes());
                Ok(())
            }
            (KeyCodec::SelfDelimited, KeyValue::Bytes(b)) => {
                encode_self_delimited(out, b);
                Ok(())
            }
            (KeyCodec::Stringz, KeyValue::Text(s)) => {
                if s.as_bytes().contains(&0) {
                    return Err(StrataError::UnsatisfiedConstraint(
                        "stringz cannot encode text containing NUL".into(),
                    ));
                }
                out.extend_from_slice(s.as_bytes());
                out.push(0);
                Ok(())
            }
            (KeyCodec::StringzUnsafe, KeyValue::Text(s)) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
                Ok(())
            }
            (KeyCodec::Tuple(parts), KeyValue::Tuple(values)) => {
                if parts.len() != values.len() {
                    return Err(StrataError::UnsatisfiedConstraint(format!(
                        "tuple arity mismatch: codec {} vs value {}",
                        parts.len(),
                        values.len()
                    )));
                }
                for (codec, value) in parts.iter().zip(values) {
                    codec.encode(out, value)?;
                }
                Ok(())
            }
            (KeyCodec::Choice(variants), KeyValue::Choice(tag, inner)) => {
                let codec = variants
                    .get(usize::from(*tag))
                    .ok_or(StrataError::UnknownTag(*tag))?;
                out.push(*tag);
                codec.encode(out, inner)
            }
            (KeyCodec::Custom(custom), external) => custom.encode(out, external),
            (codec, value) => Err(StrataError::UnsatisfiedConstraint(format!(
                "value {value:?} does not match codec {codec:?}"
            ))),
        }
    }

    pub fn encode_to_vec(&self, value: &KeyValue) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(&mut out, value)?;
        Ok(out)
    }

    pub fn decode(&self, frag: &mut Fragment<'_>) -> CodecResult<KeyValue> {
        match self {
            KeyCodec::Byte => Ok(KeyValue::Byte(frag.take_u8(FragmentKind::Byte)?)),
            KeyCodec::Bool => match frag.take_u8(FragmentKind::Bool)? {
                0 => Ok(KeyValue::Bool(false)),
                1 => Ok(KeyValue::Bool(true)),
                _ => Err(StrataError::BadEncoding(FragmentKind::Bool)),
            },
            KeyCodec::PositiveInt64 => {
                let raw = frag.take(8, FragmentKind::PositiveInt64)?;
                let v = i64::from_be_bytes(raw.try_into().expect("8 bytes"));
                if v < 0 {
                    return Err(StrataError::BadEncoding(FragmentKind::PositiveInt64));
                }
                Ok(KeyValue::Int(v))
            }
            KeyCodec::PositiveInt64Complement => {
                let raw = frag.take(8, FragmentKind::PositiveInt64Complement)?;
                let stored = i64::from_be_bytes(raw.try_into().expect("8 bytes"));
                if stored < 0 {
                    return Err(StrataError::BadEncoding(
                        FragmentKind::PositiveInt64Complement,
                    ));
                }
                Ok(KeyValue::Int(i64::MAX - stored))
            }
            KeyCodec::SelfDelimited => Ok(KeyValue::Bytes(decode_self_delimited(frag)?)),
            KeyCodec::Stringz | KeyCodec::StringzUnsafe => {
                let mut bytes = Vec::new();
                loop {
                    let b = frag.take_u8(FragmentKind::Stringz)?;
                    if b == 0 {
                        break;
                    }
                    bytes.push(b);
                }
                String::from_utf8(bytes)
                    .map(KeyValue::Text)
                    .map_err(|_| StrataError::BadEncoding(FragmentKind::Stringz))
            }
            KeyCodec::Tuple(parts) => {
                let mut values = Vec::with_capacity(parts.len());
                for codec in parts {
                    values.push(codec.decode(frag)?);
                }
                Ok(KeyValue::Tuple(values))
            }
            KeyCodec::Choice(variants) => {
                let tag = frag.take_u8(FragmentKind::Choice)?;
                let codec = variants
                    .get(usize::from(tag))
                    .ok_or(StrataError::UnknownTag(tag))?;
                Ok(KeyValue::Choice(tag, Box::new(codec.decode(frag)?)))
            }
            KeyCodec::Custom(custom) => custom.decode(frag),
        }
    }

    /// Decodes a complete encoding; trailing bytes are a `BadEncoding`.
    pub fn decode_value(&self, bytes: &[u8]) -> CodecResult<KeyValue> {
        let mut frag = Fragment::new(bytes);
        let value = self.decode(&mut frag)?;
        if !frag.is_empty() {
            return Err(StrataError::BadEncoding(FragmentKind::Tuple));
        }
        Ok(value)
    }

    /// Value with the lexicographically smallest encoding.
    pub fn min_value(&self) -> KeyValue {
        match self {
            KeyCodec::Byte => KeyValue::Byte(0),
            KeyCodec::Bool => KeyValue::Bool(false),
            KeyCodec::PositiveInt64 => KeyValue::Int(0),
            KeyCodec::PositiveInt64Complement => KeyValue::Int(i64::MAX),
            KeyCodec::SelfDelimited => KeyValue::Bytes(Vec::new()),
            KeyCodec::Stringz | KeyCodec::StringzUnsafe => KeyValue::Text(String::new()),
            KeyCodec::Tuple(parts) => {
                KeyValue::Tuple(parts.iter().map(KeyCodec::min_value).collect())
            }
            KeyCodec::Choice(variants) => {
                KeyValue::Choice(0, Box::new(variants[0].min_value()))
            }
            KeyCodec::Custom(custom) => custom.min_value(),
        }
    }

    /// Value with the lexicographically largest encoding within the
    /// saturation caps for unbounded components.
    pub fn max_value(&self) -> KeyValue {
        match self {
            KeyCodec::Byte => KeyValue::Byte(u8::MAX),
            KeyCodec::Bool => KeyValue::Bool(true),
            KeyCodec::PositiveInt64 => KeyValue::Int(i64::MAX),
            KeyCodec::PositiveInt64Complement => KeyValue::Int(0),
            KeyCodec::SelfDelimited => {
                KeyValue::Bytes(vec![0xFF; MAX_BYTES_COMPONENT_LEN])
            }
            KeyCodec::Stringz | KeyCodec::StringzUnsafe => {
                KeyValue::Text("\u{10FFFF}".repeat(MAX_TEXT_COMPONENT_LEN))
            }
            KeyCodec::Tuple(parts) => {
                KeyValue::Tuple(parts.iter().map(KeyCodec::max_value).collect())
            }
            KeyCodec::Choice(variants) => {
                let last = variants.len() - 1;
                KeyValue::Choice(last as u8, Box::new(variants[last].max_value()))
            }
            KeyCodec::Custom(custom) => custom.max_value(),
        }
    }

    pub fn pp(&self, value: &KeyValue) -> String {
        match (self, value) {
            (KeyCodec::Custom(custom), external) => custom.pp(external),
            (KeyCodec::Tuple(parts), KeyValue::Tuple(values)) => {
                let rendered: Vec<String> = parts
                    .iter()
                    .zip(values)
                    .map(|(codec, value)| codec.pp(value))
                    .collect();
                format!("({})", rendered.join(", "))
            }
            (KeyCodec::Choice(variants), KeyValue::Choice(tag, inner)) => {
                match variants.get(usize::from(*tag)) {
                    Some(codec) => format!("#{tag}:{}", codec.pp(inner)),
                    None => format!("#{tag}:?"),
                }
            }
            (_, KeyValue::Byte(b)) => format!("{b:#04x}"),
            (_, KeyValue::Bool(b)) => b.to_string(),
            (_, KeyValue::Int(v)) => v.to_string(),
            (_, KeyValue::Bytes(b)) => format!("{:?}", String::from_utf8_lossy(b)),
            (_, KeyValue::Text(s)) => format!("{s:?}"),
            (codec, value) => format!("<{value:?} under {codec:?}>"),
        }
    }
}

/// Appends the 0x00-escaped, 0x00 0x00-terminated form of `bytes`.
///
/// `""` < `"\0"` < any longer prefix continuation under byte comparison,
/// so concatenated components stay comparable without knowing the suffix.
pub(crate) fn encode_self_delimited(out: &mut Vec<u8>, bytes: &[u8]) {
    for b in bytes {
        if *b == 0 {
            out.extend_from_slice(&[0x00, 0xFF]);
        } else {
            out.push(*b);
        }
    }
    out.extend_from_slice(&[0x00, 0x00]);
}

pub(crate) fn decode_self_delimited(frag: &mut Fragment<'_>) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    decode_self_delimited_into(frag, &mut out)?;
    Ok(out)
}

/// Decodes into a caller-owned buffer so scan loops can reuse capacity.
pub(crate) fn decode_self_delimited_into(
    frag: &mut Fragment<'_>,
    out: &mut Vec<u8>,
) -> CodecResult<()> {
    out.clear();
    loop {
        let b = frag.take_u8(FragmentKind::SelfDelimited)?;
        if b != 0 {
            out.push(b);
            continue;
        }
        match frag.take_u8(FragmentKind::SelfDelimited)? {
            0x00 => return Ok(()),
            0xFF => out.push(0x00),
            _ => return Err(StrataError::BadEncoding(FragmentKind::SelfDelimited)),
        }
    }
}
