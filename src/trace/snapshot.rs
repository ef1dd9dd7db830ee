//! Size- and depth-bounded serialization of runtime values.
//!
//! Serialization is written once against the [`Inspect`] trait; the sandbox
//! implements it for interpreter objects and tests use `serde_json::Value`.

use serde_json::{Map, Number, Value};

pub const MAX_SERIALIZE_DEPTH: usize = 2;
pub const MAX_COLLECTION_ITEMS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotLimits {
    /// Values at this depth or deeper are rendered as text.
    pub max_depth: usize,
    /// Children kept per container level.
    pub max_items: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_depth: MAX_SERIALIZE_DEPTH,
            max_items: MAX_COLLECTION_ITEMS,
        }
    }
}

/// What a value looks like to the serializer.
#[derive(Debug)]
pub enum Shape<T> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Mapping(Vec<(String, T)>),
    Sequence(Vec<T>),
    /// An object exposing its attributes as a field mapping.
    Fields(Vec<(String, T)>),
    Opaque,
}

pub trait Inspect: Sized {
    /// Classify the value, collecting at most `limit` children.
    fn shape(&self, limit: usize) -> Shape<Self>;

    /// Textual representation used for opaque values and depth cut-offs.
    fn repr_text(&self) -> String;
}

/// Serialize `value` found at `depth`. Anything at or past the depth limit,
/// primitives included, is rendered as text.
pub fn snapshot_value<T: Inspect>(value: &T, depth: usize, limits: SnapshotLimits) -> Value {
    if depth >= limits.max_depth {
        return Value::String(value.repr_text());
    }
    match value.shape(limits.max_items) {
        Shape::Null => Value::Null,
        Shape::Bool(b) => Value::Bool(b),
        Shape::Int(i) => Value::Number(i.into()),
        Shape::Float(f) => Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.repr_text())),
        Shape::Str(s) => Value::String(s),
        Shape::Mapping(items) => snapshot_mapping(items, depth + 1, limits),
        // The attribute mapping sits one level below the object itself.
        Shape::Fields(_) if depth + 1 >= limits.max_depth => Value::String(value.repr_text()),
        Shape::Fields(items) => snapshot_mapping(items, depth + 2, limits),
        Shape::Sequence(items) => Value::Array(
            items
                .iter()
                .map(|item| snapshot_value(item, depth + 1, limits))
                .collect(),
        ),
        Shape::Opaque => Value::String(value.repr_text()),
    }
}

fn snapshot_mapping<T: Inspect>(items: Vec<(String, T)>, depth: usize, limits: SnapshotLimits) -> Value {
    Value::Object(
        items
            .into_iter()
            .map(|(key, item)| (key, snapshot_value(&item, depth, limits)))
            .collect(),
    )
}

/// Snapshot a frame's local bindings, skipping dunder names.
pub fn snapshot_locals<T, I>(locals: I, limits: SnapshotLimits) -> Map<String, Value>
where
    T: Inspect,
    I: IntoIterator<Item = (String, T)>,
{
    locals
        .into_iter()
        .filter(|(name, _)| !name.starts_with("__"))
        .map(|(name, value)| {
            let snapshot = snapshot_value(&value, 0, limits);
            (name, snapshot)
        })
        .collect()
}

impl Inspect for Value {
    fn shape(&self, limit: usize) -> Shape<Self> {
        match self {
            Value::Null => Shape::Null,
            Value::Bool(b) => Shape::Bool(*b),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Shape::Int(i),
                (None, Some(f)) => Shape::Float(f),
                (None, None) => Shape::Opaque,
            },
            Value::String(s) => Shape::Str(s.clone()),
            Value::Array(items) => Shape::Sequence(items.iter().take(limit).cloned().collect()),
            Value::Object(map) => Shape::Mapping(
                map.iter()
                    .take(limit)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }

    fn repr_text(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn locals(value: Value) -> Vec<(String, Value)> {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[test]
    fn test_primitives_pass_through() {
        let snap = snapshot_locals(
            locals(json!({"n": 3, "f": 1.5, "s": "hi", "b": true, "z": null})),
            SnapshotLimits::default(),
        );
        assert_eq!(Value::Object(snap), json!({"n": 3, "f": 1.5, "s": "hi", "b": true, "z": null}));
    }

    #[test]
    fn test_dunder_names_are_skipped() {
        let snap = snapshot_locals(
            locals(json!({"__builtins__": {}, "__name__": "m", "x": 1})),
            SnapshotLimits::default(),
        );
        assert_eq!(snap.len(), 1);
        assert!(snap.contains_key("x"));
    }

    #[test]
    fn test_depth_limit_renders_text() {
        let snap = snapshot_locals(
            locals(json!({"grid": [[1, 2], [3]], "flat": [1, 2]})),
            SnapshotLimits::default(),
        );
        assert_eq!(snap["flat"], json!([1, 2]));
        assert_eq!(snap["grid"], json!([["1", "2"], ["3"]]));
    }

    #[test]
    fn test_collections_truncated_per_level() {
        let long: Vec<i64> = (0..50).collect();
        let snap = snapshot_locals(locals(json!({"xs": long})), SnapshotLimits::default());
        assert_eq!(snap["xs"].as_array().unwrap().len(), MAX_COLLECTION_ITEMS);

        let tight = SnapshotLimits {
            max_depth: 2,
            max_items: 3,
        };
        let snap = snapshot_locals(locals(json!({"xs": [1, 2, 3, 4, 5]})), tight);
        assert_eq!(snap["xs"], json!([1, 2, 3]));
    }

    #[test]
    fn test_zero_depth_renders_containers_as_text() {
        let limits = SnapshotLimits {
            max_depth: 0,
            max_items: 20,
        };
        let snap = snapshot_locals(locals(json!({"m": {"a": 1}, "n": 2})), limits);
        assert_eq!(snap["m"], json!("{\"a\":1}"));
        assert_eq!(snap["n"], json!("2"));
    }

    /// An object with attributes, or a bare integer.
    #[derive(Clone)]
    enum Obj {
        Attrs(Vec<(String, Obj)>),
        Int(i64),
    }

    impl Inspect for Obj {
        fn shape(&self, _limit: usize) -> Shape<Self> {
            match self {
                Obj::Attrs(fields) => Shape::Fields(fields.clone()),
                Obj::Int(i) => Shape::Int(*i),
            }
        }

        fn repr_text(&self) -> String {
            match self {
                Obj::Attrs(_) => "<Obj>".to_string(),
                Obj::Int(i) => i.to_string(),
            }
        }
    }

    #[test]
    fn test_object_fields_count_as_one_level() {
        let point = Obj::Attrs(vec![("x".into(), Obj::Int(3))]);
        assert_eq!(snapshot_value(&point, 0, SnapshotLimits::default()), json!({"x": "3"}));

        let roomy = SnapshotLimits {
            max_depth: 3,
            max_items: 20,
        };
        assert_eq!(snapshot_value(&point, 0, roomy), json!({"x": 3}));
        assert_eq!(snapshot_value(&point, 1, SnapshotLimits::default()), json!("<Obj>"));
    }
}
