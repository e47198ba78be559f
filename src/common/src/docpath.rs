// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dot-path addressing into JSON documents.
//!
//! A path is a sequence of `.`-separated segments. A segment is a plain key
//! (`name`), an indexed key (`name[2]`) or a wildcard (`name[*]`). Reads
//! through a wildcard collect into an ordered array; writes through a
//! wildcard apply to every element. Array elements that are not objects are
//! skipped during recursive descent.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("pattern mismatch: path {path} must contain exactly {expected} `[*]` segments")]
    PatternMismatch { path: String, expected: usize },

    #[error("index {index} out of bounds at segment `{segment}`")]
    IndexOutOfBounds { index: usize, segment: String },

    #[error("expected object at segment `{segment}`")]
    UnexpectedKind { segment: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index { field: String, index: usize },
    Wild { field: String },
}

impl Segment {
    fn field(&self) -> &str {
        match self {
            Segment::Key(k) => k,
            Segment::Index { field, .. } => field,
            Segment::Wild { field } => field,
        }
    }
}

fn parse_path(path: &str) -> Vec<Segment> {
    path.split('.').map(parse_segment).collect()
}

fn parse_segment(raw: &str) -> Segment {
    if let Some(field) = raw.strip_suffix("[*]") {
        return Segment::Wild {
            field: field.to_string(),
        };
    }
    if let Some(open) = raw.find('[') {
        if let Some(stripped) = raw.strip_suffix(']') {
            if let Ok(index) = stripped[open + 1..].parse::<usize>() {
                return Segment::Index {
                    field: raw[..open].to_string(),
                    index,
                };
            }
        }
    }
    Segment::Key(raw.to_string())
}

/// The stringified form of a value, used for joined fields and condition
/// operands. Strings render bare, scalars via their JSON form, and missing
/// values should be rendered by the caller.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read the value at `path`, or `None`. Wildcards collect the per-element
/// results into an array in document order.
pub fn get(data: &Value, path: &str) -> Option<Value> {
    get_segments(data, &parse_path(path))
}

fn get_segments(data: &Value, segs: &[Segment]) -> Option<Value> {
    let (seg, rest) = segs.split_first()?;
    match seg {
        Segment::Key(key) => {
            let next = data.as_object()?.get(key)?;
            if rest.is_empty() {
                Some(next.clone())
            } else {
                get_segments(next, rest)
            }
        }
        Segment::Index { field, index } => {
            let next = data.as_object()?.get(field)?.as_array()?.get(*index)?;
            if rest.is_empty() {
                Some(next.clone())
            } else {
                get_segments(next, rest)
            }
        }
        Segment::Wild { field } => {
            let arr = data.as_object()?.get(field)?.as_array()?;
            let collected: Vec<Value> = if rest.is_empty() {
                arr.to_vec()
            } else {
                arr.iter()
                    .filter_map(|item| get_segments(item, rest))
                    .collect()
            };
            Some(Value::Array(collected))
        }
    }
}

/// Write `value` at `path`, creating intermediate objects as needed. An
/// explicit index past the end of an array is a hard error; a wildcard
/// writes through every element.
pub fn set(data: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    set_segments(data, &parse_path(path), value)
}

fn set_segments(data: &mut Value, segs: &[Segment], value: Value) -> Result<(), PathError> {
    let Some((seg, rest)) = segs.split_first() else {
        return Ok(());
    };
    if rest.is_empty() {
        return match seg {
            Segment::Key(key) => {
                if let Value::Object(map) = data {
                    map.insert(key.clone(), value);
                }
                Ok(())
            }
            Segment::Index { field, index } => {
                let arr = array_mut(data, field)?;
                match arr.get_mut(*index) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(PathError::IndexOutOfBounds {
                        index: *index,
                        segment: field.clone(),
                    }),
                }
            }
            Segment::Wild { field } => {
                for slot in array_mut(data, field)? {
                    *slot = value.clone();
                }
                Ok(())
            }
        };
    }
    match seg {
        Segment::Key(key) => {
            let map = match data {
                Value::Object(map) => map,
                _ => {
                    return Err(PathError::UnexpectedKind {
                        segment: key.clone(),
                    })
                }
            };
            let entry = map
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            set_segments(entry, rest, value)
        }
        Segment::Index { field, index } => {
            let arr = array_mut(data, field)?;
            let item = arr.get_mut(*index).ok_or(PathError::IndexOutOfBounds {
                index: *index,
                segment: field.clone(),
            })?;
            set_segments(item, rest, value)
        }
        Segment::Wild { field } => {
            for item in array_mut(data, field)? {
                if item.is_object() {
                    set_segments(item, rest, value.clone())?;
                }
            }
            Ok(())
        }
    }
}

fn array_mut<'a>(data: &'a mut Value, field: &str) -> Result<&'a mut Vec<Value>, PathError> {
    data.as_object_mut()
        .and_then(|map| map.get_mut(field))
        .and_then(Value::as_array_mut)
        .ok_or_else(|| PathError::UnexpectedKind {
            segment: field.to_string(),
        })
}

/// Remove the final key of `path` from its containing object. Missing
/// intermediates are a silent no-op.
pub fn delete(data: &mut Value, path: &str) {
    delete_segments(data, &parse_path(path));
}

fn delete_segments(data: &mut Value, segs: &[Segment]) {
    let Some((seg, rest)) = segs.split_first() else {
        return;
    };
    if rest.is_empty() {
        if let (Segment::Key(key), Value::Object(map)) = (seg, data) {
            map.remove(key);
        }
        return;
    }
    match seg {
        Segment::Key(key) => {
            if let Some(next) = data.as_object_mut().and_then(|m| m.get_mut(key)) {
                delete_segments(next, rest);
            }
        }
        Segment::Index { field, index } => {
            if let Some(next) = data
                .as_object_mut()
                .and_then(|m| m.get_mut(field))
                .and_then(Value::as_array_mut)
                .and_then(|arr| arr.get_mut(*index))
            {
                delete_segments(next, rest);
            }
        }
        Segment::Wild { field } => {
            if let Some(arr) = data
                .as_object_mut()
                .and_then(|m| m.get_mut(field))
                .and_then(Value::as_array_mut)
            {
                for item in arr {
                    delete_segments(item, rest);
                }
            }
        }
    }
}

/// Move the value at `from` to `to`. A missing source is a no-op.
pub fn rename(data: &mut Value, from: &str, to: &str) -> Result<(), PathError> {
    if let Some(value) = get(data, from) {
        delete(data, from);
        set(data, to, value)?;
    }
    Ok(())
}

/// Join the values at `from_paths` with `join` and write the result at
/// `to_path`.
///
/// When `to_path` contains `k` wildcard segments every source path must
/// contain exactly `k`; the operation then distributes pointwise across the
/// parallel arrays, pairing the i-th element of each source array with the
/// i-th element of the destination array at every wildcard depth. A
/// mismatched arity fails with [`PathError::PatternMismatch`] and leaves
/// the document untouched.
pub fn insert_joined(
    data: &mut Value,
    from_paths: &[String],
    to_path: &str,
    join: &str,
) -> Result<(), PathError> {
    let to_segs = parse_path(to_path);
    let wild_count = to_segs
        .iter()
        .filter(|seg| matches!(seg, Segment::Wild { .. }))
        .count();

    let mut sources = Vec::with_capacity(from_paths.len());
    for path in from_paths {
        let segs = parse_path(path);
        let count = segs
            .iter()
            .filter(|seg| matches!(seg, Segment::Wild { .. }))
            .count();
        if count != wild_count {
            return Err(PathError::PatternMismatch {
                path: path.clone(),
                expected: wild_count,
            });
        }
        sources.push(segs);
    }

    if wild_count == 0 {
        let joined = sources
            .iter()
            .map(|segs| {
                get_segments(data, segs)
                    .map(|v| display_value(&v))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(join);
        return set_segments(data, &to_segs, Value::String(joined));
    }

    // Sources are read from a snapshot while the destination tree is
    // mutated, mirroring the fact that writes only add leaf fields.
    let snapshot = data.clone();
    let sources: Vec<(Value, Vec<Segment>)> = sources
        .into_iter()
        .map(|segs| (snapshot.clone(), segs))
        .collect();
    distribute(data, &to_segs, &sources, join);
    Ok(())
}

enum ArraySel {
    One(usize),
    All,
}

/// Walk leading plain keys of `segs` and stop at the first array segment,
/// returning the array value it names, the selection and the remaining
/// segments.
fn next_array<'a>(
    value: &'a Value,
    segs: &'a [Segment],
) -> Option<(&'a Value, ArraySel, &'a [Segment])> {
    let mut node = value;
    for (i, seg) in segs.iter().enumerate() {
        match seg {
            Segment::Key(key) => {
                node = node.as_object()?.get(key)?;
            }
            Segment::Index { field, index } => {
                let arr = node.as_object()?.get(field)?;
                return Some((arr, ArraySel::One(*index), &segs[i + 1..]));
            }
            Segment::Wild { field } => {
                let arr = node.as_object()?.get(field)?;
                return Some((arr, ArraySel::All, &segs[i + 1..]));
            }
        }
    }
    None
}

fn distribute(node: &mut Value, to: &[Segment], sources: &[(Value, Vec<Segment>)], join: &str) {
    if to.len() == 1 {
        if let (Segment::Key(key), Value::Object(map)) = (&to[0], node) {
            let joined = sources
                .iter()
                .map(|(value, segs)| read_scalar(value, segs))
                .collect::<Vec<_>>()
                .join(join);
            map.insert(key.clone(), Value::String(joined));
        }
        return;
    }
    let Some((seg, rest)) = to.split_first() else {
        return;
    };
    match seg {
        Segment::Key(key) => {
            if let Some(child) = node.as_object_mut().and_then(|m| m.get_mut(key)) {
                distribute(child, rest, sources, join);
            }
        }
        Segment::Index { field, index } => {
            let Some(arr) = node
                .as_object_mut()
                .and_then(|m| m.get_mut(field))
                .and_then(Value::as_array_mut)
            else {
                return;
            };
            if let Some(elem) = arr.get_mut(*index) {
                if elem.is_object() {
                    let advanced = advance_sources(sources, *index);
                    distribute(elem, rest, &advanced, join);
                }
            }
        }
        Segment::Wild { field } => {
            let Some(arr) = node
                .as_object_mut()
                .and_then(|m| m.get_mut(field))
                .and_then(Value::as_array_mut)
            else {
                return;
            };
            for (i, elem) in arr.iter_mut().enumerate() {
                if !elem.is_object() {
                    continue;
                }
                let advanced = advance_sources(sources, i);
                distribute(elem, rest, &advanced, join);
            }
        }
    }
}

/// Advance every source cursor into the element paired with destination
/// index `i`: its own next array is located independently, so destination
/// and source paths may diverge between wildcard depths.
fn advance_sources(sources: &[(Value, Vec<Segment>)], i: usize) -> Vec<(Value, Vec<Segment>)> {
    sources
        .iter()
        .map(|(value, segs)| match next_array(value, segs) {
            Some((arr, sel, rest)) => {
                let index = match sel {
                    ArraySel::One(n) => n,
                    ArraySel::All => i,
                };
                let elem = arr
                    .as_array()
                    .and_then(|a| a.get(index))
                    .cloned()
                    .unwrap_or(Value::Null);
                (elem, rest.to_vec())
            }
            None => (Value::Null, segs.to_vec()),
        })
        .collect()
}

fn read_scalar(value: &Value, segs: &[Segment]) -> String {
    let mut node = value;
    for seg in segs {
        match node.as_object().and_then(|m| m.get(seg.field())) {
            Some(next) => node = next,
            None => return String::new(),
        }
    }
    display_value(node)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_get_nested() {
        let data = json!({"a": {"b": {"c": 1}}});
        assert_eq!(get(&data, "a.b.c"), Some(json!(1)));
        assert_eq!(get(&data, "a.b.d"), None);
        assert_eq!(get(&data, "a.x.c"), None);
    }

    #[test]
    fn test_get_stable_on_immutable_input() {
        let data = json!({"a": [{"g": 1}, {"g": 2}]});
        assert_eq!(get(&data, "a[*].g"), get(&data, "a[*].g"));
    }

    #[test]
    fn test_get_index_and_wildcard() {
        let data = json!({"a": [{"g": 10}, {"g": 20}, 3]});
        assert_eq!(get(&data, "a[1].g"), Some(json!(20)));
        assert_eq!(get(&data, "a[9].g"), None);
        // Non-object elements are skipped by recursive descent.
        assert_eq!(get(&data, "a[*].g"), Some(json!([10, 20])));
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut data = json!({});
        set(&mut data, "a.b.c", json!(2)).unwrap();
        assert_eq!(data, json!({"a": {"b": {"c": 2}}}));
    }

    #[test]
    fn test_set_preserves_null_values() {
        let mut data = json!({"a": {"b": null}});
        set(&mut data, "a.c", json!(1)).unwrap();
        assert_eq!(data, json!({"a": {"b": null, "c": 1}}));
    }

    #[test]
    fn test_set_index_out_of_bounds() {
        let mut data = json!({"a": [{"b": 1}]});
        let err = set(&mut data, "a[3].b", json!(2)).unwrap_err();
        assert_eq!(
            err,
            PathError::IndexOutOfBounds {
                index: 3,
                segment: "a".into()
            }
        );
    }

    #[test]
    fn test_set_through_wildcard() {
        let mut data = json!({"a": [{"b": 1}, {"b": 2}, 7]});
        set(&mut data, "a[*].b", json!(0)).unwrap();
        assert_eq!(data, json!({"a": [{"b": 0}, {"b": 0}, 7]}));
    }

    #[test]
    fn test_delete_then_set_law() {
        let mut data = json!({"a": {"sibling": 1}});
        set(&mut data, "a.b", json!("x")).unwrap();
        delete(&mut data, "a.b");
        assert_eq!(data, json!({"a": {"sibling": 1}}));
    }

    #[test]
    fn test_delete_missing_intermediate_is_noop() {
        let mut data = json!({"a": 1});
        delete(&mut data, "x.y.z");
        assert_eq!(data, json!({"a": 1}));
    }

    #[test]
    fn test_rename_moves_value() {
        let mut data = json!({"user": {"name": "x"}});
        rename(&mut data, "user.name", "profile.name").unwrap();
        assert_eq!(data, json!({"user": {}, "profile": {"name": "x"}}));
    }

    #[test]
    fn test_rename_round_trip_is_identity() {
        let mut data = json!({"a": {"v": 1}, "keep": true});
        let original = data.clone();
        rename(&mut data, "a.v", "b.v").unwrap();
        rename(&mut data, "b.v", "a.v").unwrap();
        // The empty intermediate created by the first rename remains.
        assert_eq!(get(&data, "a.v"), get(&original, "a.v"));
        assert_eq!(get(&data, "keep"), Some(json!(true)));
        assert_eq!(get(&data, "b.v"), None);
    }

    #[test]
    fn test_insert_joined_flat() {
        let mut data = json!({"id": 7, "name": "a"});
        insert_joined(
            &mut data,
            &["id".to_string(), "name".to_string()],
            "uid",
            "-",
        )
        .unwrap();
        assert_eq!(get(&data, "uid"), Some(json!("7-a")));
    }

    #[test]
    fn test_insert_joined_wildcard_distribution() {
        let mut data = json!({"A": [{"B": [{"G": 10}, {"G": 20}]}]});
        insert_joined(&mut data, &["A[*].B[*].G".to_string()], "A[*].B[*].T", ",").unwrap();
        assert_eq!(
            data,
            json!({"A": [{"B": [{"G": 10, "T": "10"}, {"G": 20, "T": "20"}]}]})
        );
    }

    #[test]
    fn test_insert_joined_parallel_arrays() {
        let mut data = json!({
            "A": [{
                "B":  [{"F": [{"G": 10}, {"G": 20}]}],
                "B1": [{"F": [{"Z": "a"}, {"Z": "b"}]}],
            }]
        });
        insert_joined(
            &mut data,
            &["A[*].B[*].F[*].G".to_string(), "A[*].B1[*].F[*].Z".to_string()],
            "A[*].B[*].F[*].T",
            ",",
        )
        .unwrap();
        assert_eq!(get(&data, "A[0].B[0].F[0].T"), Some(json!("10,a")));
        assert_eq!(get(&data, "A[0].B[0].F[1].T"), Some(json!("20,b")));
    }

    #[test]
    fn test_insert_joined_arity_mismatch_leaves_data_unchanged() {
        let mut data = json!({"A": [{"G": 1}]});
        let original = data.clone();
        let err = insert_joined(&mut data, &["A.G".to_string()], "A[*].T", ",").unwrap_err();
        assert!(matches!(err, PathError::PatternMismatch { .. }));
        assert_eq!(data, original);
    }

    #[test]
    fn test_display_value_forms() {
        assert_eq!(display_value(&json!("s")), "s");
        assert_eq!(display_value(&json!(10)), "10");
        assert_eq!(display_value(&json!(10.5)), "10.5");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&json!(null)), "null");
    }
}
