//! Ordering operations over composed codecs: saturating successor and
//! predecessor, and the prefix helpers used to form range bounds.

use super::{
    CodecResult, KeyCodec, KeyValue, MAX_BYTES_COMPONENT_LEN, MAX_TEXT_COMPONENT_LEN,
};
use crate::error::StrataError;

impl KeyCodec {
    /// Saturating successor in encoding order: `succ(max) = max`.
    /// Tuples carry right-to-left; a bumped component resets everything
    /// to its right to the component minimum.
    pub fn succ(&self, value: &KeyValue) -> CodecResult<KeyValue> {
        match (self, value) {
            (KeyCodec::Byte, KeyValue::Byte(b)) => Ok(KeyValue::Byte(b.saturating_add(1))),
            (KeyCodec::Bool, KeyValue::Bool(_)) => Ok(KeyValue::Bool(true)),
            (KeyCodec::PositiveInt64, KeyValue::Int(v)) => {
                Ok(KeyValue::Int(if *v == i64::MAX { *v } else { v + 1 }))
            }
            // Encoding order is descending in the numeric value.
            (KeyCodec::PositiveInt64Complement, KeyValue::Int(v)) => {
                Ok(KeyValue::Int(if *v == 0 { 0 } else { v - 1 }))
            }
            (KeyCodec::SelfDelimited, KeyValue::Bytes(b)) => {
                if b.len() >= MAX_BYTES_COMPONENT_LEN {
                    return Ok(KeyValue::Bytes(b.clone()));
                }
                let mut next = b.clone();
                next.push(0x00);
                Ok(KeyValue::Bytes(next))
            }
            (KeyCodec::Stringz | KeyCodec::StringzUnsafe, KeyValue::Text(s)) => {
                if s.chars().count() >= MAX_TEXT_COMPONENT_LEN {
                    return Ok(KeyValue::Text(s.clone()));
                }
                let mut next = s.clone();
                next.push('\u{1}');
                Ok(KeyValue::Text(next))
            }
            (KeyCodec::Tuple(parts), KeyValue::Tuple(values)) => {
                self.check_tuple_value(values)?;
                let mut out = values.clone();
                for i in (0..parts.len()).rev() {
                    if out[i] != parts[i].max_value() {
                        out[i] = parts[i].succ(&out[i])?;
                        for (j, part) in parts.iter().enumerate().skip(i + 1) {
                            out[j] = part.min_value();
                        }
                        return Ok(KeyValue::Tuple(out));
                    }
                }
                Ok(KeyValue::Tuple(out))
            }
            (KeyCodec::Choice(variants), KeyValue::Choice(tag, inner)) => {
                let idx = usize::from(*tag);
                let codec = variants.get(idx).ok_or(StrataError::UnknownTag(*tag))?;
                if **inner != codec.max_value() {
                    return Ok(KeyValue::Choice(*tag, Box::new(codec.succ(inner)?)));
                }
                match variants.get(idx + 1) {
                    Some(next) => Ok(KeyValue::Choice(*tag + 1, Box::new(next.min_value()))),
                    None => Ok(value.clone()),
                }
            }
            (KeyCodec::Custom(custom), external) => custom.succ(external),
            (codec, value) => Err(StrataError::UnsatisfiedConstraint(format!(
                "value {value:?} does not match codec {codec:?}"
            ))),
        }
    }

    /// Saturating predecessor in encoding order: `pred(min) = min`.
    pub fn pred(&self, value: &KeyValue) -> CodecResult<KeyValue> {
        match (self, value) {
            (KeyCodec::Byte, KeyValue::Byte(b)) => Ok(KeyValue::Byte(b.saturating_sub(1))),
            (KeyCodec::Bool, KeyValue::Bool(_)) => Ok(KeyValue::Bool(false)),
            (KeyCodec::PositiveInt64, KeyValue::Int(v)) => {
                Ok(KeyValue::Int(if *v == 0 { 0 } else { v - 1 }))
            }
            (KeyCodec::PositiveInt64Complement, KeyValue::Int(v)) => {
                Ok(KeyValue::Int(if *v == i64::MAX { *v } else { v + 1 }))
            }
            (KeyCodec::SelfDelimited, KeyValue::Bytes(b)) => {
                let Some((&last, head)) = b.split_last() else {
                    return Ok(KeyValue::Bytes(Vec::new()));
                };
                if last == 0x00 {
                    return Ok(KeyValue::Bytes(head.to_vec()));
                }
                let mut prev = head.to_vec();
                prev.push(last - 1);
                prev.resize(MAX_BYTES_COMPONENT_LEN, 0xFF);
                Ok(KeyValue::Bytes(prev))
            }
            (KeyCodec::Stringz | KeyCodec::StringzUnsafe, KeyValue::Text(s)) => {
                let Some(last) = s.chars().next_back() else {
                    return Ok(KeyValue::Text(String::new()));
                };
                let mut prev: String = s.chars().take(s.chars().count() - 1).collect();
                if last != '\u{1}' {
                    prev.push(pred_char(last));
                    while prev.chars().count() < MAX_TEXT_COMPONENT_LEN {
                        prev.push('\u{10FFFF}');
                    }
                }
                Ok(KeyValue::Text(prev))
            }
            (KeyCodec::Tuple(parts), KeyValue::Tuple(values)) => {
                self.check_tuple_value(values)?;
                let mut out = values.clone();
                for i in (0..parts.len()).rev() {
                    if out[i] != parts[i].min_value() {
                        out[i] = parts[i].pred(&out[i])?;
                        for (j, part) in parts.iter().enumerate().skip(i + 1) {
                            out[j] = part.max_value();
                        }
                        return Ok(KeyValue::Tuple(out));
                    }
                }
                Ok(KeyValue::Tuple(out))
            }
            (KeyCodec::Choice(variants), KeyValue::Choice(tag, inner)) => {
                let idx = usize::from(*tag);
                let codec = variants.get(idx).ok_or(StrataError::UnknownTag(*tag))?;
                if **inner != codec.min_value() {
                    return Ok(KeyValue::Choice(*tag, Box::new(codec.pred(inner)?)));
                }
                if idx == 0 {
                    return Ok(value.clone());
                }
                Ok(KeyValue::Choice(
                    *tag - 1,
                    Box::new(variants[idx - 1].max_value()),
                ))
            }
            (KeyCodec::Custom(custom), external) => custom.pred(external),
            (codec, value) => Err(StrataError::UnsatisfiedConstraint(format!(
                "value {value:?} does not match codec {codec:?}"
            ))),
        }
    }

    /// Keeps the first `k` components and saturates the rest to their
    /// component minimum. Forms the inclusive lower bound of the range
    /// sharing the `k`-component prefix of `value`.
    pub fn min_at(&self, k: usize, value: &KeyValue) -> CodecResult<KeyValue> {
        self.replace_suffix(k, value, KeyCodec::min_value)
    }

    /// Keeps the first `k` components and saturates the rest to their
    /// component maximum.
    pub fn max_at(&self, k: usize, value: &KeyValue) -> CodecResult<KeyValue> {
        self.replace_suffix(k, value, KeyCodec::max_value)
    }

    /// Decrements component `k` (1-based) with saturating `pred` and
    /// saturates everything after it to max: the largest tuple strictly
    /// below the `k`-component prefix, for exclusive lower bounds.
    pub fn lower_at(&self, k: usize, value: &KeyValue) -> CodecResult<KeyValue> {
        let (parts, values) = self.tuple_parts(value)?;
        if k == 0 || k > parts.len() {
            return Err(StrataError::UnsatisfiedConstraint(format!(
                "position {k} out of range for tuple arity {}",
                parts.len()
            )));
        }
        let mut out = values.to_vec();
        out[k - 1] = parts[k - 1].pred(&out[k - 1])?;
        for (j, part) in parts.iter().enumerate().skip(k) {
            out[j] = part.max_value();
        }
        Ok(KeyValue::Tuple(out))
    }

    /// Increments component `k` (1-based) with saturating `succ` and
    /// saturates everything after it to min: the smallest tuple strictly
    /// above the `k`-component prefix, for exclusive upper bounds.
    pub fn upper_at(&self, k: usize, value: &KeyValue) -> CodecResult<KeyValue> {
        let (parts, values) = self.tuple_parts(value)?;
        if k == 0 || k > parts.len() {
            return Err(StrataError::UnsatisfiedConstraint(format!(
                "position {k} out of range for tuple arity {}",
                parts.len()
            )));
        }
        let mut out = values.to_vec();
        out[k - 1] = parts[k - 1].succ(&out[k - 1])?;
        for (j, part) in parts.iter().enumerate().skip(k) {
            out[j] = part.min_value();
        }
        Ok(KeyValue::Tuple(out))
    }

    fn replace_suffix(
        &self,
        k: usize,
        value: &KeyValue,
        fill: impl Fn(&KeyCodec) -> KeyValue,
    ) -> CodecResult<KeyValue> {
        let (parts, values) = self.tuple_parts(value)?;
        if k > parts.len() {
            return Err(StrataError::UnsatisfiedConstraint(format!(
                "prefix length {k} out of range for tuple arity {}",
                parts.len()
            )));
        }
        let mut out = values.to_vec();
        for (j, part) in parts.iter().enumerate().skip(k) {
            out[j] = fill(part);
        }
        Ok(KeyValue::Tuple(out))
    }

    fn tuple_parts<'v>(
        &self,
        value: &'v KeyValue,
    ) -> CodecResult<(&[KeyCodec], &'v [KeyValue])> {
        let KeyCodec::Tuple(parts) = self else {
            return Err(StrataError::UnsatisfiedConstraint(
                "prefix operations require a tuple codec".into(),
            ));
        };
        let KeyValue::Tuple(values) = value else {
            return Err(StrataError::UnsatisfiedConstraint(
                "prefix operations require a tuple value".into(),
            ));
        };
        if parts.len() != values.len() {
            return Err(StrataError::UnsatisfiedConstraint(format!(
                "tuple arity mismatch: codec {} vs value {}",
                parts.len(),
                values.len()
            )));
        }
        Ok((parts, values))
    }

    fn check_tuple_value(&self, values: &[KeyValue]) -> CodecResult<()> {
        let KeyCodec::Tuple(parts) = self else {
            return Ok(());
        };
        if parts.len() != values.len() {
            return Err(StrataError::UnsatisfiedConstraint(format!(
                "tuple arity mismatch: codec {} vs value {}",
                parts.len(),
                values.len()
            )));
        }
        Ok(())
    }
}

/// Largest char strictly below `c`, skipping the surrogate gap. Never
/// called with `'\u{1}'` (handled by the caller) so NUL is unreachable.
fn pred_char(c: char) -> char {
    let mut code = (c as u32) - 1;
    if (0xD800..=0xDFFF).contains(&code) {
        code = 0xD7FF;
    }
    char::from_u32(code).unwrap_or('\u{1}')
}
