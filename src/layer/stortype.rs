//! Type-aware index key codecs ("StorTypes").
//!
//! Each normalized property value is encoded into index key bytes whose byte
//! order matches the value's natural order, so RocksDB range scans walk
//! values in sorted order without decoding. One codec per supported type,
//! dispatched through a closed enum for compile-time exhaustiveness.
//!
//! ## Ordering tricks
//!
//! - Signed integers: flip the sign bit, then big-endian. Negative values
//!   sort below positives.
//! - Floats: IEEE-754 sign fold. Positive floats get the sign bit set;
//!   negative floats are bitwise-inverted. The fold is order-preserving for
//!   the full float line including infinities. -0.0 and +0.0 get *distinct*
//!   keys (-0.0 immediately below +0.0), but they compare numerically equal,
//!   so equality lookups for either zero must probe both keys.
//! - Intervals: 16 bytes (start || end) in the main ordering, plus dedicated
//!   start-keyed and end-keyed secondary orderings for point containment.

use serde::{Deserialize, Serialize};

use super::errors::LayerError;
use crate::TimestampMilli;

const SIGN_BIT: u64 = 1 << 63;

// ============================================================================
// Normalized Values
// ============================================================================

/// A normalized property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Valu {
    Int(i64),
    Float(f64),
    Str(String),
    Time(TimestampMilli),
    /// Half-meaningful closed interval [start, end] in epoch millis.
    Ival(TimestampMilli, TimestampMilli),
    Array(Vec<Valu>),
}

impl Valu {
    /// Short kind name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Valu::Int(_) => "int",
            Valu::Float(_) => "float",
            Valu::Str(_) => "str",
            Valu::Time(_) => "time",
            Valu::Ival(_, _) => "ival",
            Valu::Array(_) => "array",
        }
    }
}

// ============================================================================
// Comparison Operators
// ============================================================================

/// Comparison operators supported by index range generation.
#[derive(Debug, Clone)]
pub enum Cmp {
    Eq(Valu),
    Lt(Valu),
    Le(Valu),
    Gt(Valu),
    Ge(Valu),
    /// Inclusive range [low, high].
    Range(Valu, Valu),
}

/// The key-space shape of a comparison against one index ordering.
#[derive(Debug, Clone)]
pub enum RangeSpec {
    /// One or more exact keys to probe (Eq; two keys for float zero).
    Exact(Vec<Vec<u8>>),
    /// A contiguous scan between bounds.
    Scan(KeyRange),
}

/// Scan bounds over an index ordering. `high = None` means unbounded above.
#[derive(Debug, Clone)]
pub struct KeyRange {
    pub low: Vec<u8>,
    pub high: Option<Vec<u8>>,
    pub low_excl: bool,
    pub high_excl: bool,
}

impl KeyRange {
    /// Whether an encoded key falls inside these bounds.
    pub fn contains(&self, key: &[u8]) -> bool {
        match key.cmp(self.low.as_slice()) {
            std::cmp::Ordering::Less => return false,
            std::cmp::Ordering::Equal if self.low_excl => return false,
            _ => {}
        }
        if let Some(high) = &self.high {
            match key.cmp(high.as_slice()) {
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal if self.high_excl => return false,
                _ => {}
            }
        }
        true
    }
}

// ============================================================================
// Merge Policies
// ============================================================================

/// How a SubEdit that would overwrite an existing value combines with it.
///
/// Properties flagged with a merge policy never blindly overwrite; the apply
/// pipeline calls `StorType::merge` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    /// New value replaces the old (the default).
    Replace,
    /// Earliest timestamp wins (e.g. `.created`).
    EarliestWins,
    /// Interval union: min start, max end.
    IvalUnion,
}

// ============================================================================
// Index Orderings
// ============================================================================

/// Which secondary ordering an index key belongs to.
///
/// Scalar types only use `Main`. Intervals additionally maintain start-keyed
/// and end-keyed orderings for the point-containment lookup pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndxOrd {
    Main,
    IvalStart,
    IvalEnd,
}

impl IndxOrd {
    /// Single-byte tag embedded in index keys after the abbreviation.
    pub fn tag(&self) -> u8 {
        match self {
            IndxOrd::Main => 0x00,
            IndxOrd::IvalStart => 0x01,
            IndxOrd::IvalEnd => 0x02,
        }
    }
}

/// One index key produced for a stored value.
#[derive(Debug, Clone)]
pub struct IndxKey {
    pub ord: IndxOrd,
    pub key: Vec<u8>,
}

// ============================================================================
// StorType
// ============================================================================

/// The codec for one normalized property type.
///
/// A closed enum rather than string-keyed dynamic dispatch: unsupported
/// types are unrepresentable and match arms are checked at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorType {
    Int,
    Float,
    Utf8,
    Time,
    Ival,
    Array(Box<StorType>),
}

impl StorType {
    /// Short name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            StorType::Int => "int",
            StorType::Float => "float",
            StorType::Utf8 => "utf8",
            StorType::Time => "time",
            StorType::Ival => "ival",
            StorType::Array(_) => "array",
        }
    }

    /// Normalize a raw value into this type, coercing where lossless.
    ///
    /// Ints coerce into Float and Time; everything else must match exactly.
    pub fn norm(&self, valu: Valu) -> Result<Valu, LayerError> {
        match (self, valu) {
            (StorType::Int, v @ Valu::Int(_)) => Ok(v),
            (StorType::Float, Valu::Float(f)) if f.is_nan() => Err(LayerError::bad_valu(
                "float",
                "NaN has no position in the key ordering and cannot be stored",
            )),
            (StorType::Float, v @ Valu::Float(_)) => Ok(v),
            (StorType::Float, Valu::Int(i)) => Ok(Valu::Float(i as f64)),
            (StorType::Utf8, v @ Valu::Str(_)) => Ok(v),
            (StorType::Time, v @ Valu::Time(_)) => Ok(v),
            (StorType::Time, Valu::Int(i)) if i >= 0 => Ok(Valu::Time(TimestampMilli(i as u64))),
            (StorType::Ival, Valu::Ival(start, end)) => {
                if end < start {
                    return Err(LayerError::bad_valu(
                        "ival",
                        format!("interval end {} precedes start {}", end, start),
                    ));
                }
                Ok(Valu::Ival(start, end))
            }
            (StorType::Array(elem), Valu::Array(items)) => {
                let normed = items
                    .into_iter()
                    .map(|v| elem.norm(v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Valu::Array(normed))
            }
            (stype, valu) => Err(LayerError::bad_valu(
                stype.name(),
                format!("cannot normalize {} value", valu.kind()),
            )),
        }
    }

    /// Encode a normalized value into its main-ordering key bytes.
    pub fn encode(&self, valu: &Valu) -> Result<Vec<u8>, LayerError> {
        match (self, valu) {
            (StorType::Int, Valu::Int(v)) => Ok(encode_i64(*v).to_vec()),
            (StorType::Float, Valu::Float(v)) => Ok(encode_f64(*v).to_vec()),
            (StorType::Utf8, Valu::Str(s)) => Ok(s.as_bytes().to_vec()),
            (StorType::Time, Valu::Time(t)) => Ok(t.0.to_be_bytes().to_vec()),
            (StorType::Ival, Valu::Ival(start, end)) => {
                let mut key = Vec::with_capacity(16);
                key.extend_from_slice(&start.0.to_be_bytes());
                key.extend_from_slice(&end.0.to_be_bytes());
                Ok(key)
            }
            (StorType::Array(_), Valu::Array(_)) => Err(LayerError::bad_valu(
                "array",
                "arrays have no single main key; use index_keys",
            )),
            (stype, valu) => Err(LayerError::bad_valu(
                stype.name(),
                format!("cannot encode {} value", valu.kind()),
            )),
        }
    }

    /// Decode main-ordering key bytes back into a normalized value.
    ///
    /// For `Array`, decodes one *element* key.
    pub fn decode(&self, bytes: &[u8]) -> Result<Valu, LayerError> {
        match self {
            StorType::Int => Ok(Valu::Int(decode_i64(fixed8(self, bytes)?))),
            StorType::Float => Ok(Valu::Float(decode_f64(fixed8(self, bytes)?))),
            StorType::Utf8 => {
                let s = std::str::from_utf8(bytes).map_err(|_| {
                    LayerError::bad_valu("utf8", "index key is not valid UTF-8")
                })?;
                Ok(Valu::Str(s.to_string()))
            }
            StorType::Time => Ok(Valu::Time(TimestampMilli(u64::from_be_bytes(fixed8(
                self, bytes,
            )?)))),
            StorType::Ival => {
                if bytes.len() != 16 {
                    return Err(LayerError::bad_valu(
                        "ival",
                        format!("expected 16 key bytes, got {}", bytes.len()),
                    ));
                }
                let mut start = [0u8; 8];
                let mut end = [0u8; 8];
                start.copy_from_slice(&bytes[0..8]);
                end.copy_from_slice(&bytes[8..16]);
                Ok(Valu::Ival(
                    TimestampMilli(u64::from_be_bytes(start)),
                    TimestampMilli(u64::from_be_bytes(end)),
                ))
            }
            StorType::Array(elem) => elem.decode(bytes),
        }
    }

    /// All index keys a stored value produces, across all orderings.
    ///
    /// - Scalars: one `Main` key.
    /// - Intervals: `Main` plus `IvalStart` and `IvalEnd` entries.
    /// - Arrays: one `Main` key per element (plus interval orderings for
    ///   interval elements) and a zero-length container "has" key under
    ///   `Main`, so "node has any value for this prop" is indexable.
    pub fn index_keys(&self, valu: &Valu) -> Result<Vec<IndxKey>, LayerError> {
        match (self, valu) {
            (StorType::Ival, Valu::Ival(start, end)) => Ok(vec![
                IndxKey {
                    ord: IndxOrd::Main,
                    key: self.encode(valu)?,
                },
                IndxKey {
                    ord: IndxOrd::IvalStart,
                    key: start.0.to_be_bytes().to_vec(),
                },
                IndxKey {
                    ord: IndxOrd::IvalEnd,
                    key: end.0.to_be_bytes().to_vec(),
                },
            ]),
            (StorType::Array(elem), Valu::Array(items)) => {
                let mut keys = Vec::with_capacity(items.len() + 1);
                for item in items {
                    keys.extend(elem.index_keys(item)?);
                }
                // Container-level "has" marker.
                keys.push(IndxKey {
                    ord: IndxOrd::Main,
                    key: Vec::new(),
                });
                Ok(keys)
            }
            _ => Ok(vec![IndxKey {
                ord: IndxOrd::Main,
                key: self.encode(valu)?,
            }]),
        }
    }

    /// Generate main-ordering scan bounds for a comparison.
    ///
    /// Any inequality or range comparison against NaN fails with
    /// `NotANumberCompared` - NaN has no place on the key line.
    pub fn range(&self, cmp: &Cmp) -> Result<RangeSpec, LayerError> {
        if let StorType::Array(elem) = self {
            // Array comparisons match per-element.
            return elem.range(cmp);
        }

        match cmp {
            Cmp::Eq(valu) => {
                self.reject_nan(valu)?;
                // Float zero has two key encodings that are numerically equal.
                if let (StorType::Float, Valu::Float(f)) = (self, valu) {
                    if *f == 0.0 {
                        return Ok(RangeSpec::Exact(vec![
                            encode_f64(-0.0).to_vec(),
                            encode_f64(0.0).to_vec(),
                        ]));
                    }
                }
                Ok(RangeSpec::Exact(vec![self.encode(valu)?]))
            }
            Cmp::Lt(valu) => {
                self.reject_nan(valu)?;
                Ok(RangeSpec::Scan(KeyRange {
                    low: self.min_key(),
                    high: Some(self.min_encoding(valu)?),
                    low_excl: false,
                    high_excl: true,
                }))
            }
            Cmp::Le(valu) => {
                self.reject_nan(valu)?;
                Ok(RangeSpec::Scan(KeyRange {
                    low: self.min_key(),
                    high: Some(self.max_encoding(valu)?),
                    low_excl: false,
                    high_excl: false,
                }))
            }
            Cmp::Gt(valu) => {
                self.reject_nan(valu)?;
                Ok(RangeSpec::Scan(KeyRange {
                    low: self.max_encoding(valu)?,
                    high: None,
                    low_excl: true,
                    high_excl: false,
                }))
            }
            Cmp::Ge(valu) => {
                self.reject_nan(valu)?;
                Ok(RangeSpec::Scan(KeyRange {
                    low: self.min_encoding(valu)?,
                    high: None,
                    low_excl: false,
                    high_excl: false,
                }))
            }
            Cmp::Range(low, high) => {
                self.reject_nan(low)?;
                self.reject_nan(high)?;
                Ok(RangeSpec::Scan(KeyRange {
                    low: self.min_encoding(low)?,
                    high: Some(self.max_encoding(high)?),
                    low_excl: false,
                    high_excl: false,
                }))
            }
        }
    }

    /// Combine an existing value with an incoming one under a merge policy.
    pub fn merge(
        &self,
        policy: MergePolicy,
        old: &Valu,
        new: Valu,
    ) -> Result<Valu, LayerError> {
        match policy {
            MergePolicy::Replace => Ok(new),
            MergePolicy::EarliestWins => match (old, &new) {
                (Valu::Time(a), Valu::Time(b)) => Ok(Valu::Time((*a).min(*b))),
                _ => Err(LayerError::bad_valu(
                    self.name(),
                    "earliest-wins merge requires time values",
                )),
            },
            MergePolicy::IvalUnion => match (old, &new) {
                (Valu::Ival(s1, e1), Valu::Ival(s2, e2)) => {
                    Ok(Valu::Ival((*s1).min(*s2), (*e1).max(*e2)))
                }
                _ => Err(LayerError::bad_valu(
                    self.name(),
                    "interval-union merge requires ival values",
                )),
            },
        }
    }

    /// Lowest possible key in the main ordering for this type.
    fn min_key(&self) -> Vec<u8> {
        match self {
            StorType::Utf8 => Vec::new(),
            StorType::Ival => vec![0u8; 16],
            _ => vec![0u8; 8],
        }
    }

    /// The lowest key encoding that compares numerically equal to `valu`.
    /// Differs from `encode` only for float zero (-0.0's key).
    fn min_encoding(&self, valu: &Valu) -> Result<Vec<u8>, LayerError> {
        if let (StorType::Float, Valu::Float(f)) = (self, valu) {
            if *f == 0.0 {
                return Ok(encode_f64(-0.0).to_vec());
            }
        }
        self.encode(valu)
    }

    /// The highest key encoding that compares numerically equal to `valu`.
    /// Differs from `encode` only for float zero (+0.0's key).
    fn max_encoding(&self, valu: &Valu) -> Result<Vec<u8>, LayerError> {
        if let (StorType::Float, Valu::Float(f)) = (self, valu) {
            if *f == 0.0 {
                return Ok(encode_f64(0.0).to_vec());
            }
        }
        self.encode(valu)
    }

    fn reject_nan(&self, valu: &Valu) -> Result<(), LayerError> {
        if let Valu::Float(f) = valu {
            if f.is_nan() {
                return Err(LayerError::NotANumberCompared);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Scalar encodings
// ============================================================================

/// Sign-flipped big-endian i64: byte order matches integer order.
#[inline]
fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ SIGN_BIT).to_be_bytes()
}

#[inline]
fn decode_i64(bytes: [u8; 8]) -> i64 {
    (u64::from_be_bytes(bytes) ^ SIGN_BIT) as i64
}

/// IEEE-754 sign fold: positives get the sign bit set, negatives are
/// bitwise-inverted. Order-preserving across the whole float line.
#[inline]
fn encode_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let folded = if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits | SIGN_BIT
    };
    folded.to_be_bytes()
}

#[inline]
fn decode_f64(bytes: [u8; 8]) -> f64 {
    let folded = u64::from_be_bytes(bytes);
    let bits = if folded & SIGN_BIT != 0 {
        folded & !SIGN_BIT
    } else {
        !folded
    };
    f64::from_bits(bits)
}

fn fixed8(stype: &StorType, bytes: &[u8]) -> Result<[u8; 8], LayerError> {
    if bytes.len() != 8 {
        return Err(LayerError::bad_valu(
            stype.name(),
            format!("expected 8 key bytes, got {}", bytes.len()),
        ));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(buf)
}

// ============================================================================
// Tests
// ============================================================================
