//! The tagged 64-bit object identifier: the single value representation
//! every index, binding, and operator in this crate exchanges.
//!
//! An [`ObjectId`] packs an 8-bit kind tag into the high byte and a 56-bit
//! payload into the rest. Short strings, integers, floats, booleans, and
//! anonymous/edge/path handles are all inlined; long strings and IRIs carry
//! an offset into the object file instead and must be unpacked through the
//! string manager to recover their bytes.

use std::cmp::Ordering;

use crate::error::{EngineError, EngineResult};

/// Exact order of an `i64` against an `f64` without ever widening the
/// integer into a (possibly lossy) float. Used only for genuinely mixed
/// `Int`/`Float` comparisons; same-kind pairs compare directly.
fn cmp_int_float(n: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Equal;
    }
    let t = f.trunc();
    if t != f {
        // Fractional part present: compare integer parts, then let the
        // sign of the fraction break the tie (trunc rounds toward zero).
        return match cmp_int_float(n, t) {
            Ordering::Equal if f > t => Ordering::Less,
            Ordering::Equal if f < t => Ordering::Greater,
            other => other,
        };
    }
    if t >= -(9_223_372_036_854_775_808.0) && t < 9_223_372_036_854_775_808.0 {
        n.cmp(&(t as i64))
    } else if t > 0.0 {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Number of payload bits below the tag byte.
const VALUE_BITS: u32 = 56;
/// Mask selecting the 56-bit payload.
pub const VALUE_MASK: u64 = (1u64 << VALUE_BITS) - 1;
const TAG_SHIFT: u32 = VALUE_BITS;

/// Canonical tag values. Names are contractual per spec §4.2; the numeric
/// assignment is an internal implementation detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Kind {
    Null = 0,
    NotFound = 1,
    StringInlined = 2,
    StringExtern = 3,
    IriInlined = 4,
    IriExtern = 5,
    PositiveInt = 6,
    NegativeInt = 7,
    Float = 8,
    Bool = 9,
    Anonymous = 10,
    Edge = 11,
    Path = 12,
    DateTime = 13,
    DecimalInlined = 14,
    DecimalExtern = 15,
}

impl Kind {
    fn from_byte(b: u8) -> EngineResult<Kind> {
        use Kind::*;
        Ok(match b {
            0 => Null,
            1 => NotFound,
            2 => StringInlined,
            3 => StringExtern,
            4 => IriInlined,
            5 => IriExtern,
            6 => PositiveInt,
            7 => NegativeInt,
            8 => Float,
            9 => Bool,
            10 => Anonymous,
            11 => Edge,
            12 => Path,
            13 => DateTime,
            14 => DecimalInlined,
            15 => DecimalExtern,
            other => return Err(EngineError::logic(format!("unknown object-id tag byte {other}"))),
        })
    }

    /// Numeric kinds share a single comparator (sign-magnitude ordering);
    /// everything else compares by bytes or by a fixed mixed-kind order.
    fn is_numeric(self) -> bool {
        matches!(self, Kind::PositiveInt | Kind::NegativeInt | Kind::Float)
    }

    fn is_string_like(self) -> bool {
        matches!(
            self,
            Kind::StringInlined | Kind::StringExtern | Kind::IriInlined | Kind::IriExtern
        )
    }
}

/// A typed value as seen by callers before packing / after unpacking.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    NotFound,
    String(String),
    Iri(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Anonymous(u64),
    Edge(u64),
    Path(u64),
    /// Offset into the object file for a value whose bytes were not
    /// inlined; `kind` distinguishes string/IRI/decimal externs.
    External { kind: Kind, offset: u64 },
}

/// The tagged 64-bit word. `Ord`/`PartialOrd` implement the engine's total
/// comparison: tag dominates, so values of distinct kinds never interleave,
/// which is what lets a B+ tree range scan on `(type=t, from=f, *, *)` walk
/// exactly the edges of one type from one node without post-filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

impl ObjectId {
    pub const NULL: ObjectId = ObjectId((Kind::Null as u64) << TAG_SHIFT);
    pub const NOT_FOUND: ObjectId = ObjectId((Kind::NotFound as u64) << TAG_SHIFT);

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> ObjectId {
        ObjectId(raw)
    }

    pub fn kind(self) -> EngineResult<Kind> {
        Kind::from_byte((self.0 >> TAG_SHIFT) as u8)
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    pub fn is_not_found(self) -> bool {
        self == Self::NOT_FOUND
    }

    fn payload(self) -> u64 {
        self.0 & VALUE_MASK
    }

    fn tagged(kind: Kind, payload: u64) -> ObjectId {
        debug_assert!(payload <= VALUE_MASK);
        ObjectId(((kind as u64) << TAG_SHIFT) | (payload & VALUE_MASK))
    }

    /// Pack a short string (≤7 bytes) left-aligned, high-to-low, so that
    /// unsigned comparison of the whole word matches lexicographic byte
    /// order.
    fn pack_inline_string(kind: Kind, bytes: &[u8]) -> EngineResult<ObjectId> {
        if bytes.len() > 7 {
            return Err(EngineError::arith_overflow("inline string longer than 7 bytes"));
        }
        let mut payload: u64 = 0;
        for (i, b) in bytes.iter().enumerate() {
            let shift = VALUE_BITS - 8 - (i as u32) * 8;
            payload |= (*b as u64) << shift;
        }
        Ok(Self::tagged(kind, payload))
    }

    fn unpack_inline_string(self, len_hint: Option<usize>) -> String {
        let payload = self.payload();
        let mut bytes = Vec::with_capacity(7);
        for i in 0..7 {
            let shift = VALUE_BITS - 8 - (i as u32) * 8;
            let b = ((payload >> shift) & 0xFF) as u8;
            if b == 0 && len_hint.is_none() {
                break;
            }
            bytes.push(b);
            if let Some(l) = len_hint {
                if bytes.len() == l {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Pack a value into its tagged word. Fails only when an integer's
    /// magnitude exceeds 56 bits (spec §4.2's one stated pack-time error).
    pub fn pack(value: &Value) -> EngineResult<ObjectId> {
        match value {
            Value::Null => Ok(Self::NULL),
            Value::NotFound => Ok(Self::NOT_FOUND),
            Value::Bool(b) => Ok(Self::tagged(Kind::Bool, *b as u64)),
            Value::Anonymous(n) => Ok(Self::tagged(Kind::Anonymous, *n)),
            Value::Edge(n) => Ok(Self::tagged(Kind::Edge, *n)),
            Value::Path(n) => Ok(Self::tagged(Kind::Path, *n)),
            Value::Int(n) => Self::pack_int(*n),
            Value::Float(f) => {
                let bits = (*f as f32).to_le_bytes();
                let mut payload = 0u32.to_le_bytes();
                payload.copy_from_slice(&bits);
                Ok(Self::tagged(Kind::Float, u32::from_le_bytes(payload) as u64))
            }
            Value::String(s) => {
                let bytes = s.as_bytes();
                if bytes.len() <= 7 {
                    Self::pack_inline_string(Kind::StringInlined, bytes)
                } else {
                    Err(EngineError::logic(
                        "long strings must be interned via the object store, not packed directly",
                    ))
                }
            }
            Value::Iri(s) => {
                let bytes = s.as_bytes();
                if bytes.len() <= 7 {
                    Self::pack_inline_string(Kind::IriInlined, bytes)
                } else {
                    Err(EngineError::logic(
                        "long IRIs must be interned via the object store, not packed directly",
                    ))
                }
            }
            Value::External { kind, offset } => Ok(Self::tagged(*kind, *offset)),
        }
    }

    /// Sign-magnitude encoding: positives store `|n|`; negatives store
    /// `~n & VALUE_MASK` so descending unsigned order of the negative tag
    /// corresponds to ascending signed order (more-negative numbers get a
    /// *smaller* payload after the bitwise-not, and the `NegativeInt` tag
    /// byte is numerically smaller than `PositiveInt` so all negatives sort
    /// before all positives).
    fn pack_int(n: i64) -> EngineResult<ObjectId> {
        if n >= 0 {
            let mag = n as u64;
            if mag > VALUE_MASK {
                return Err(EngineError::arith_overflow("positive integer exceeds 56 bits"));
            }
            Ok(Self::tagged(Kind::PositiveInt, mag))
        } else {
            let mag = n.unsigned_abs();
            if mag > VALUE_MASK {
                return Err(EngineError::arith_overflow("negative integer exceeds 56 bits"));
            }
            // ~n & VALUE_MASK: store the one's complement within the payload.
            let payload = (!(n as u64)) & VALUE_MASK;
            Ok(Self::tagged(Kind::NegativeInt, payload))
        }
    }

    /// Unpack to a typed value. External (non-inlined) kinds cannot be
    /// fully materialized here; callers needing their bytes go through the
    /// string manager with the returned offset.
    pub fn unpack(self) -> EngineResult<Value> {
        let kind = self.kind()?;
        let payload = self.payload();
        Ok(match kind {
            Kind::Null => Value::Null,
            Kind::NotFound => Value::NotFound,
            Kind::Bool => Value::Bool(payload != 0),
            Kind::Anonymous => Value::Anonymous(payload),
            Kind::Edge => Value::Edge(payload),
            Kind::Path => Value::Path(payload),
            Kind::PositiveInt => Value::Int(payload as i64),
            Kind::NegativeInt => {
                let n = !(payload) & VALUE_MASK;
                Value::Int(-(n as i64))
            }
            Kind::Float => {
                let bits = (payload as u32).to_le_bytes();
                Value::Float(f32::from_le_bytes(bits) as f64)
            }
            Kind::StringInlined => Value::String(self.unpack_inline_string(None)),
            Kind::IriInlined => Value::Iri(self.unpack_inline_string(None)),
            Kind::StringExtern | Kind::IriExtern | Kind::DecimalInlined | Kind::DecimalExtern => {
                Value::External { kind, offset: payload }
            }
            Kind::DateTime => Value::External { kind, offset: payload },
        })
    }

    /// Total comparison across all kinds. Numeric kinds compare by value
    /// regardless of which of the three numeric tags they carry; inlined
    /// strings reduce to unsigned word comparison by construction; any
    /// other same-kind pair falls back to raw payload comparison; different
    /// non-numeric kinds compare by tag byte, giving a fixed but arbitrary
    /// cross-kind order.
    pub fn total_cmp(self, other: ObjectId) -> EngineResult<Ordering> {
        let (ka, kb) = (self.kind()?, other.kind()?);
        if ka.is_numeric() && kb.is_numeric() {
            let (va, vb) = (self.unpack()?, other.unpack()?);
            return Ok(match (va, vb) {
                // Same-kind integers compare exactly; going through `f64`
                // loses precision past 2^53 and the 56-bit payload budget
                // explicitly allows magnitudes beyond that.
                (Value::Int(a), Value::Int(b)) => a.cmp(&b),
                (Value::Float(a), Value::Float(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                (Value::Int(a), Value::Float(b)) => cmp_int_float(a, b),
                (Value::Float(a), Value::Int(b)) => cmp_int_float(b, a).reverse(),
                _ => unreachable!(),
            });
        }
        if ka != kb {
            return Ok(ka.cmp(&kb));
        }
        if ka.is_string_like() && matches!(ka, Kind::StringInlined | Kind::IriInlined) {
            // Inlined strings: raw unsigned word order already equals
            // lexicographic byte order given left-aligned packing.
            return Ok(self.0.cmp(&other.0));
        }
        Ok(self.payload().cmp(&other.payload()))
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.total_cmp(*other).ok()
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(*other).unwrap_or(Ordering::Equal)
    }
}

impl EngineError {
    fn arith_overflow(msg: impl Into<String>) -> EngineError {
        EngineError::Arithmetic(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_string_round_trip() {
        let v = Value::String("abcd".into());
        let id = ObjectId::pack(&v).unwrap();
        assert_eq!(id.kind().unwrap(), Kind::StringInlined);
        assert_eq!(id.unpack().unwrap(), v);
    }

    #[test]
    fn int_round_trip_and_order() {
        for n in [-5_i64, -1, 0, 1, 5, 1_000_000] {
            let id = ObjectId::pack(&Value::Int(n)).unwrap();
            assert_eq!(id.unpack().unwrap(), Value::Int(n));
        }
        let neg = ObjectId::pack(&Value::Int(-10)).unwrap();
        let pos = ObjectId::pack(&Value::Int(10)).unwrap();
        assert_eq!(neg.total_cmp(pos).unwrap(), Ordering::Less);

        let a = ObjectId::pack(&Value::Int(-100)).unwrap();
        let b = ObjectId::pack(&Value::Int(-1)).unwrap();
        assert_eq!(a.total_cmp(b).unwrap(), Ordering::Less);
    }

    #[test]
    fn large_int_order_survives_f64_rounding_gap() {
        // Both values fit the 56-bit payload but sit past f64's 2^53
        // exact-integer limit, where a naive float cast collapses them.
        let a = ObjectId::pack(&Value::Int(36_028_797_018_963_958)).unwrap();
        let b = ObjectId::pack(&Value::Int(36_028_797_018_963_959)).unwrap();
        assert_eq!(a.total_cmp(b).unwrap(), Ordering::Less);
        assert_ne!(a, b);
    }

    #[test]
    fn overflow_rejected() {
        let too_big = (1i64 << 56) | 1;
        assert!(ObjectId::pack(&Value::Int(too_big)).is_err());
    }

    #[test]
    fn null_and_not_found_distinct() {
        assert!(ObjectId::NULL.is_null());
        assert!(ObjectId::NOT_FOUND.is_not_found());
        assert_ne!(ObjectId::NULL, ObjectId::NOT_FOUND);
    }

    #[test]
    fn mixed_kind_never_interleaves() {
        let s = ObjectId::pack(&Value::String("a".into())).unwrap();
        let i = ObjectId::pack(&Value::Int(0)).unwrap();
        assert_ne!(s.kind().unwrap(), i.kind().unwrap());
    }

    proptest::proptest! {
        #[test]
        fn prop_int_round_trip(n in -(1i64 << 55)..(1i64 << 55)) {
            let id = ObjectId::pack(&Value::Int(n)).unwrap();
            proptest::prop_assert_eq!(id.unpack().unwrap(), Value::Int(n));
        }

        #[test]
        fn prop_int_order_preserved(a in -(1i64 << 55)..(1i64 << 55), b in -(1i64 << 55)..(1i64 << 55)) {
            let ida = ObjectId::pack(&Value::Int(a)).unwrap();
            let idb = ObjectId::pack(&Value::Int(b)).unwrap();
            proptest::prop_assert_eq!(a.cmp(&b), ida.total_cmp(idb).unwrap());
        }

        #[test]
        fn prop_inline_string_round_trip(s in "[a-zA-Z0-9]{0,7}") {
            let id = ObjectId::pack(&Value::String(s.clone())).unwrap();
            proptest::prop_assert_eq!(id.unpack().unwrap(), Value::String(s));
        }
    }
}
