use kvf_common::{decode, decode_as, encode, CacheValue, CodecError, Shape, MAX_DEPTH};
use proptest::prelude::*;

fn leaf() -> impl Strategy<Value = CacheValue> {
    prop_oneof![
        Just(CacheValue::Nil),
        any::<bool>().prop_map(CacheValue::Bool),
        any::<i64>().prop_map(CacheValue::Int),
        any::<u64>().prop_map(CacheValue::UInt),
        any::<f64>().prop_map(CacheValue::Float),
        ".{0,24}".prop_map(CacheValue::Str),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(CacheValue::Bytes),
        prop::collection::vec(any::<char>(), 0..16).prop_map(CacheValue::Chars),
    ]
}

fn value() -> impl Strategy<Value = CacheValue> {
    leaf().prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(CacheValue::List),
            prop::collection::vec(("[a-z_]{1,8}", inner), 0..8).prop_map(CacheValue::Record),
        ]
    })
}

/// Wraps `leaf` in `depth` containers, alternating lists and records.
fn nest(leaf: CacheValue, depth: usize) -> CacheValue {
    (0..depth).fold(leaf, |inner, level| {
        if level % 2 == 0 {
            CacheValue::List(vec![inner])
        } else {
            CacheValue::record([("inner", inner)])
        }
    })
}

proptest! {
    /// Property: decode(encode(v)) == v for every value in the family
    #[test]
    fn decode_inverts_encode(v in value()) {
        let bytes = encode(&v).unwrap();
        prop_assert_eq!(decode(&bytes).unwrap(), v);
    }

    /// Property: decoding with the stored shape always succeeds
    #[test]
    fn decode_as_own_shape_succeeds(v in value()) {
        let bytes = encode(&v).unwrap();
        let shape = v.shape();
        prop_assert_eq!(decode_as(&bytes, shape).unwrap(), v);
    }

    /// Property: any strict prefix of an encoding fails instead of yielding a value
    #[test]
    fn strict_prefixes_never_decode(v in value(), cut in any::<prop::sample::Index>()) {
        let bytes = encode(&v).unwrap();
        let cut = cut.index(bytes.len());
        prop_assert!(decode(&bytes[..cut]).is_err());
    }

    /// Property: a value either round-trips or is refused at encode time
    #[test]
    fn deep_values_fail_on_write_not_read(inner in leaf(), depth in 0usize..MAX_DEPTH + 8) {
        let v = nest(inner, depth);
        match encode(&v) {
            Ok(bytes) => {
                prop_assert!(depth <= MAX_DEPTH);
                prop_assert_eq!(decode(&bytes).unwrap(), v);
            }
            Err(err) => {
                prop_assert!(depth > MAX_DEPTH);
                prop_assert_eq!(err, CodecError::TooDeep(MAX_DEPTH));
            }
        }
    }
}

#[test]
fn shape_of_request_must_match() {
    let bytes = encode(&CacheValue::Int(5)).unwrap();
    assert!(decode_as(&bytes, Shape::Record).is_err());
}
