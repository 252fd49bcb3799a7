//! Helpers for working with the JSON result tree assembled during plan execution.

use displaydoc::Display;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub use serde_json::{json, Map, Value};

/// A JSON object.
pub type Object = Map<String, Value>;

const FLATTEN_CHARACTER: &str = "@";
const PROTO_KEY: &str = "__proto__";

/// An error while processing JSON data.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum JsonExtError {
    /// Could not find path in JSON.
    PathNotFound,
}

/// A path element in a result tree.
///
/// Paths are made of object keys, list indexes and the `@` wildcard which stands for every
/// element of the list found at that position.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum PathElement {
    /// Every element of a list.
    Flatten,

    /// A list index.
    Index(usize),

    /// An object key.
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Flatten => f.write_str(FLATTEN_CHARACTER),
            PathElement::Index(index) => write!(f, "{}", index),
            PathElement::Key(key) => f.write_str(key),
        }
    }
}

impl Serialize for PathElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            PathElement::Flatten => serializer.serialize_str(FLATTEN_CHARACTER),
            PathElement::Index(index) => serializer.serialize_u64(*index as u64),
            PathElement::Key(key) => serializer.serialize_str(key),
        }
    }
}

impl<'de> Deserialize<'de> for PathElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(PathElementVisitor)
    }
}

struct PathElementVisitor;

impl<'de> Visitor<'de> for PathElementVisitor {
    type Value = PathElement;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string or a positive integer")
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(PathElement::Index(value as usize))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        usize::try_from(value)
            .map(PathElement::Index)
            .map_err(|_| E::custom(format!("invalid path index {}", value)))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(PathElement::from(value))
    }
}

impl From<&str> for PathElement {
    fn from(value: &str) -> Self {
        if value == FLATTEN_CHARACTER {
            PathElement::Flatten
        } else {
            PathElement::Key(value.to_string())
        }
    }
}

/// A path into the result tree.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    /// Concatenate two paths.
    pub fn join(&self, other: impl AsRef<Self>) -> Self {
        let other = other.as_ref();
        let mut new = Vec::with_capacity(self.len() + other.len());
        new.extend(self.iter().cloned());
        new.extend(other.iter().cloned());
        Path(new)
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(|segment| match segment.parse::<usize>() {
                    Ok(index) => PathElement::Index(index),
                    Err(_) => PathElement::from(segment),
                })
                .collect(),
        )
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<I: IntoIterator<Item = PathElement>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, element) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", element)?;
        }
        Ok(())
    }
}

/// Extension trait for [`serde_json::Value`].
pub trait ValueExt {
    /// Deep merge `other` into `self`.
    ///
    /// Objects are merged key by key. Lists of equal length are merged element-wise when both
    /// elements are objects. In every other case the value from `other` wins. A key named
    /// `__proto__` is never copied.
    fn deep_merge(&mut self, other: Self);

    /// Get a mutable reference to the value at a concrete path, one without `@`.
    fn get_path_mut<'a>(&'a mut self, path: &Path) -> Result<&'a mut Self, JsonExtError>;

    /// Visit every value reachable through `path`, expanding each `@` into every list index.
    ///
    /// The callback receives the concrete path (no `@` left) of every value reached. Missing keys
    /// and `@` on something that isn't a list end the walk for that branch.
    fn select_values_and_paths<'a, F>(&'a self, path: &Path, f: F)
    where
        F: FnMut(Path, &'a Self);
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    if key == PROTO_KEY {
                        continue;
                    }
                    match a.get_mut(&key) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
                for (a_value, b_value) in a.iter_mut().zip(b.into_iter()) {
                    if a_value.is_object() && b_value.is_object() {
                        a_value.deep_merge(b_value);
                    } else {
                        *a_value = b_value;
                    }
                }
            }
            (a, b) => {
                *a = b;
            }
        }
    }

    fn get_path_mut<'a>(&'a mut self, path: &Path) -> Result<&'a mut Self, JsonExtError> {
        let mut current = self;
        for element in path.iter() {
            current = match (element, current) {
                (PathElement::Key(key), Value::Object(object)) => {
                    object.get_mut(key).ok_or(JsonExtError::PathNotFound)?
                }
                (PathElement::Index(index), Value::Array(array)) => {
                    array.get_mut(*index).ok_or(JsonExtError::PathNotFound)?
                }
                _ => return Err(JsonExtError::PathNotFound),
            };
        }
        Ok(current)
    }

    fn select_values_and_paths<'a, F>(&'a self, path: &Path, mut f: F)
    where
        F: FnMut(Path, &'a Self),
    {
        iterate_path(&mut Path::empty(), &path.0, self, &mut f)
    }
}

fn iterate_path<'a, F>(parent: &mut Path, path: &[PathElement], data: &'a Value, f: &mut F)
where
    F: FnMut(Path, &'a Value),
{
    match path.first() {
        None => f(parent.clone(), data),
        Some(PathElement::Flatten) => {
            if let Value::Array(array) = data {
                for (index, value) in array.iter().enumerate() {
                    parent.push(PathElement::Index(index));
                    iterate_path(parent, &path[1..], value, f);
                    parent.0.pop();
                }
            } else {
                tracing::trace!("cannot flatten {} at {}", data, parent);
            }
        }
        Some(PathElement::Index(index)) => {
            if let Some(value) = data.as_array().and_then(|array| array.get(*index)) {
                parent.push(PathElement::Index(*index));
                iterate_path(parent, &path[1..], value, f);
                parent.0.pop();
            }
        }
        Some(PathElement::Key(key)) => {
            if let Some(value) = data.as_object().and_then(|object| object.get(key)) {
                parent.push(PathElement::Key(key.to_string()));
                iterate_path(parent, &path[1..], value, f);
                parent.0.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! assert_is_subset {
        ($a:expr, $b:expr $(,)?) => {
            assert!(is_subset(&$a, &$b), "{} is not a subset of {}", $a, $b);
        };
    }

    fn is_subset(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Object(a), Value::Object(b)) => a
                .iter()
                .all(|(key, value)| b.get(key).map(|b| is_subset(value, b)).unwrap_or(false)),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| is_subset(a, b))
            }
            (a, b) => a == b,
        }
    }

    #[test]
    fn test_deep_merge_objects() {
        let mut target = json!({"me": {"id": "1", "name": "Ada"}, "other": true});
        target.deep_merge(json!({"me": {"numberOfReviews": 3}}));
        assert_eq!(
            target,
            json!({"me": {"id": "1", "name": "Ada", "numberOfReviews": 3}, "other": true})
        );
    }

    #[test]
    fn test_deep_merge_never_drops_target_keys() {
        let original = json!({"a": {"b": 1, "c": [1, 2]}, "d": "e"});
        let mut target = original.clone();
        target.deep_merge(json!({"a": {"f": 2}}));
        assert_is_subset!(original, target);
    }

    #[test]
    fn test_deep_merge_idempotent() {
        let original = json!({"a": [{"b": 1}, {"b": 2}], "c": {"d": null}});
        let mut target = original.clone();
        target.deep_merge(original.clone());
        assert_eq!(target, original);
    }

    #[test]
    fn test_deep_merge_arrays() {
        let mut target = json!({"list": [{"a": 1}, 2, {"c": 3}]});
        target.deep_merge(json!({"list": [{"b": 1}, 5, "x"]}));
        assert_eq!(target, json!({"list": [{"a": 1, "b": 1}, 5, "x"]}));

        let mut target = json!({"list": [{"a": 1}, {"a": 2}]});
        target.deep_merge(json!({"list": [{"b": 1}]}));
        assert_eq!(target, json!({"list": [{"b": 1}]}));
    }

    #[test]
    fn test_deep_merge_skips_proto() {
        let mut target = json!({"a": 1});
        target.deep_merge(json!({"__proto__": {"polluted": true}, "b": 2}));
        assert_eq!(target, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_get_path_mut() {
        let mut value = json!({"a": [{"b": 1}, {"b": 2}]});
        *value.get_path_mut(&Path::from("a.1.b")).unwrap() = json!(3);
        assert_eq!(value, json!({"a": [{"b": 1}, {"b": 3}]}));
        assert_eq!(
            value.get_path_mut(&Path::from("a.2.b")),
            Err(JsonExtError::PathNotFound)
        );
        assert_eq!(
            value.get_path_mut(&Path::from("a.@.b")),
            Err(JsonExtError::PathNotFound)
        );
    }

    #[test]
    fn test_select_values_and_paths_flattens_lists() {
        let value = json!({"a": [{"b": 1}, {"b": 2}]});
        let mut selected = Vec::new();
        value.select_values_and_paths(&Path::from("a.@.b"), |path, value| {
            selected.push((path.to_string(), value.clone()))
        });
        assert_eq!(
            selected,
            vec![
                ("a.0.b".to_string(), json!(1)),
                ("a.1.b".to_string(), json!(2))
            ]
        );
    }

    #[test]
    fn test_select_values_and_paths_nested_lists() {
        let value = json!({"a": [{"b": [{"c": 1}]}, {"b": []}, {"b": [{"c": 2}, {"c": 3}]}]});
        let mut selected = Vec::new();
        value.select_values_and_paths(&Path::from("a.@.b.@"), |path, value| {
            selected.push((path.to_string(), value.clone()))
        });
        assert_eq!(
            selected,
            vec![
                ("a.0.b.0".to_string(), json!({"c": 1})),
                ("a.2.b.0".to_string(), json!({"c": 2})),
                ("a.2.b.1".to_string(), json!({"c": 3})),
            ]
        );
    }

    #[test]
    fn test_select_values_and_paths_missing() {
        let value = json!({"a": null});
        let mut count = 0;
        value.select_values_and_paths(&Path::from("a.@.b"), |_, _| count += 1);
        value.select_values_and_paths(&Path::from("x"), |_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_path_serde() {
        let path = Path::from("topProducts.@.reviews");
        let serialized = serde_json::to_value(&path).unwrap();
        assert_eq!(serialized, json!(["topProducts", "@", "reviews"]));
        assert_eq!(serde_json::from_value::<Path>(serialized).unwrap(), path);

        let path: Path = serde_json::from_value(json!(["hero", "heroFriends", 1, "name"])).unwrap();
        assert_eq!(
            path,
            Path(vec![
                PathElement::Key("hero".to_string()),
                PathElement::Key("heroFriends".to_string()),
                PathElement::Index(1),
                PathElement::Key("name".to_string()),
            ])
        );
        insta::assert_snapshot!(path.to_string(), @"hero.heroFriends.1.name");
    }

    #[test]
    fn test_path_join() {
        let path = Path::from("a.@").join(Path::from("b"));
        assert_eq!(path.to_string(), "a.@.b");
    }
}
