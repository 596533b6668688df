//! BSON total ordering and the composite `IndexKey` built on top of it
//! (§3 "IndexKey", GLOSSARY).
//!
//! The `bson` crate's own `PartialOrd` for `Bson` does not implement
//! cross-type numeric collapsing or the fixed type-rank total order this
//! index needs, so this module layers one on top rather than depending on
//! upstream ordering (§3 Ambient stack note).

use std::cmp::Ordering;

use bson::Bson;

/// Rank order matches the GLOSSARY's BSON total order exactly. Declaration
/// order is derive-Ord order, so don't reorder these without re-reading
/// §3's "IndexKey" entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeRank {
    MinKey,
    Null,
    Numeric,
    String,
    ObjectId,
    DateTime,
    Boolean,
    Binary,
    Array,
    Document,
    Regex,
    JavaScript,
    JavaScriptWithScope,
    Timestamp,
    Symbol,
    Undefined,
    MaxKey,
}

fn type_rank(value: &Bson) -> TypeRank {
    match value {
        Bson::MinKey => TypeRank::MinKey,
        Bson::Null => TypeRank::Null,
        Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Decimal128(_) => {
            TypeRank::Numeric
        }
        Bson::String(_) => TypeRank::String,
        Bson::ObjectId(_) => TypeRank::ObjectId,
        Bson::DateTime(_) => TypeRank::DateTime,
        Bson::Boolean(_) => TypeRank::Boolean,
        Bson::Binary(_) => TypeRank::Binary,
        Bson::Array(_) => TypeRank::Array,
        Bson::Document(_) => TypeRank::Document,
        Bson::RegularExpression(_) => TypeRank::Regex,
        Bson::JavaScriptCode(_) => TypeRank::JavaScript,
        Bson::JavaScriptCodeWithScope(_) => TypeRank::JavaScriptWithScope,
        Bson::Timestamp(_) => TypeRank::Timestamp,
        Bson::Symbol(_) => TypeRank::Symbol,
        Bson::Undefined => TypeRank::Undefined,
        Bson::MaxKey => TypeRank::MaxKey,
        // Deprecated/rare BSON types with no assigned rank in the
        // GLOSSARY sort next to Symbol, which is itself deprecated.
        Bson::DbPointer(_) => TypeRank::Symbol,
    }
}

fn numeric_value(value: &Bson) -> f64 {
    match value {
        Bson::Double(d) => *d,
        Bson::Int32(i) => *i as f64,
        Bson::Int64(i) => *i as f64,
        Bson::Decimal128(d) => d.to_string().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Total order over `Bson` values: rank first, then a rank-specific
/// comparator, with numeric ranks collapsing for cross-type comparison
/// (an `Int32(1)` and a `Double(1.0)` compare equal).
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Bson::Null, Bson::Null)
        | (Bson::Undefined, Bson::Undefined)
        | (Bson::MinKey, Bson::MinKey)
        | (Bson::MaxKey, Bson::MaxKey) => Ordering::Equal,
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::Binary(x), Bson::Binary(y)) => x.bytes.cmp(&y.bytes),
        (Bson::Array(x), Bson::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = compare_bson(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Document(x), Bson::Document(y)) => {
            for (xk, yk) in x.iter().zip(y.iter()) {
                let ord = xk.0.cmp(yk.0).then_with(|| compare_bson(xk.1, yk.1));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::RegularExpression(x), Bson::RegularExpression(y)) => x
            .pattern
            .cmp(&y.pattern)
            .then_with(|| x.options.cmp(&y.options)),
        (Bson::JavaScriptCode(x), Bson::JavaScriptCode(y)) => x.cmp(y),
        (Bson::JavaScriptCodeWithScope(x), Bson::JavaScriptCodeWithScope(y)) => {
            x.code.cmp(&y.code)
        }
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        (Bson::Symbol(x), Bson::Symbol(y)) => x.cmp(y),
        _ if ra == TypeRank::Numeric => {
            numeric_value(a).partial_cmp(&numeric_value(b)).unwrap_or(Ordering::Equal)
        }
        _ => Ordering::Equal,
    }
}

/// A fixed-arity tuple of BSON values ordered lexicographically by
/// `compare_bson` on each component (§3 "IndexKey").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey(pub Vec<Bson>);

impl IndexKey {
    pub fn new(values: Vec<Bson>) -> Self {
        Self(values)
    }

    pub fn single(value: Bson) -> Self {
        Self(vec![value])
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = compare_bson(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// Extract an `IndexKey` from a document for the given field list,
/// substituting BSON null for a missing field (§4.6 "missing fields
/// become BSON-null").
pub fn extract_key(doc: &bson::Document, fields: &[String]) -> IndexKey {
    IndexKey::new(
        fields
            .iter()
            .map(|f| doc.get(f).cloned().unwrap_or(Bson::Null))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    #[test]
    fn numeric_ranks_collapse_across_types() {
        assert_eq!(compare_bson(&Bson::Int32(1), &Bson::Double(1.0)), Ordering::Equal);
        assert_eq!(compare_bson(&Bson::Int64(2), &Bson::Double(1.0)), Ordering::Greater);
    }

    #[test]
    fn type_rank_dominates_value() {
        assert_eq!(
            compare_bson(&Bson::Null, &Bson::Int32(-1_000_000)),
            Ordering::Less
        );
        assert_eq!(
            compare_bson(&Bson::String("a".into()), &Bson::ObjectId(ObjectId::new())),
            Ordering::Less
        );
    }

    #[test]
    fn index_key_orders_lexicographically() {
        let a = IndexKey::new(vec![Bson::Int32(1), Bson::String("b".into())]);
        let b = IndexKey::new(vec![Bson::Int32(1), Bson::String("c".into())]);
        assert!(a < b);
    }

    #[test]
    fn extract_key_substitutes_null_for_missing_fields() {
        let doc = bson::doc! { "sku": "widget" };
        let key = extract_key(&doc, &["sku".to_string(), "region".to_string()]);
        assert_eq!(key.0[1], Bson::Null);
    }
}
