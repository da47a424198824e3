use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use serde_json::{Map, Value};

/// A value that can absorb a partial update.
///
/// Record-like states (maps, JSON objects) merge shallowly: every key of the
/// current value survives unless the patch provides it, and nested values are
/// replaced wholesale. Atomic states (numbers, strings, vectors) are replaced
/// by the patch.
///
/// # Examples
///
/// ```
/// use dharma::Merge;
/// use serde_json::json;
///
/// let state = json!({ "a": 1, "b": 2 });
/// assert_eq!(state.merge(json!({ "b": 3 })), json!({ "a": 1, "b": 3 }));
///
/// assert_eq!(0_i32.merge(5), 5);
/// ```
pub trait Merge: Sized {
    /// The shape of an update accepted by `merge`.
    type Patch;

    /// Produce the next value. `self` is never mutated.
    fn merge(&self, patch: Self::Patch) -> Self;
}

/// Anything a store can hold.
pub trait State: Merge + Clone + Send + Sync + 'static {}

impl<T> State for T where T: Merge + Clone + Send + Sync + 'static {}

/// An update instruction: either a patch, or a function computing one from
/// the current state.
pub enum Modifier<'a, S: Merge> {
    Patch(S::Patch),
    Update(Box<dyn FnOnce(&S) -> S::Patch + 'a>),
}

impl<'a, S: Merge> Modifier<'a, S> {
    /// Build a modifier from an updater function.
    pub fn update<F>(f: F) -> Self
    where
        F: FnOnce(&S) -> S::Patch + 'a,
    {
        Modifier::Update(Box::new(f))
    }

    fn into_patch(self, current: &S) -> S::Patch {
        match self {
            Modifier::Patch(patch) => patch,
            Modifier::Update(f) => f(current),
        }
    }
}

/// Compute the next state from `current` and an update instruction.
///
/// # Examples
///
/// ```
/// use dharma::{merge, Modifier};
///
/// assert_eq!(merge(&0, Modifier::update(|n: &i32| n + 1)), 1);
/// ```
pub fn merge<S: Merge>(current: &S, modifier: Modifier<'_, S>) -> S {
    let patch = modifier.into_patch(current);
    current.merge(patch)
}

macro_rules! atomic_state {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Merge for $ty {
                type Patch = $ty;

                fn merge(&self, patch: $ty) -> $ty {
                    patch
                }
            }
        )*
    };
}

atomic_state!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char, String,
    (),
);

impl<T> Merge for Vec<T> {
    type Patch = Vec<T>;

    fn merge(&self, patch: Vec<T>) -> Vec<T> {
        patch
    }
}

impl<T> Merge for Option<T> {
    type Patch = Option<T>;

    fn merge(&self, patch: Option<T>) -> Option<T> {
        patch
    }
}

impl<K, V, H> Merge for HashMap<K, V, H>
where
    K: Eq + Hash + Clone,
    V: Clone,
    H: BuildHasher + Clone,
{
    type Patch = HashMap<K, V, H>;

    fn merge(&self, patch: Self::Patch) -> Self {
        let mut next = self.clone();
        next.extend(patch);
        next
    }
}

impl<K: Ord + Clone, V: Clone> Merge for BTreeMap<K, V> {
    type Patch = BTreeMap<K, V>;

    fn merge(&self, patch: Self::Patch) -> Self {
        let mut next = self.clone();
        next.extend(patch);
        next
    }
}

impl Merge for Map<String, Value> {
    type Patch = Map<String, Value>;

    fn merge(&self, patch: Self::Patch) -> Self {
        let mut next = self.clone();
        next.extend(patch);
        next
    }
}

impl Merge for Value {
    type Patch = Value;

    fn merge(&self, patch: Value) -> Value {
        match (self, patch) {
            (Value::Object(current), Value::Object(patch)) => Value::Object(current.merge(patch)),
            (_, patch) => patch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_patch_keeps_every_key() {
        let state = json!({ "a": 1, "b": "two" });
        assert_eq!(state.merge(json!({})), state);
    }

    #[test]
    fn patch_wins_on_collision() {
        let state = json!({ "a": 1, "b": 2 });
        assert_eq!(state.merge(json!({ "b": 3 })), json!({ "a": 1, "b": 3 }));
    }

    #[test]
    fn nested_values_are_replaced_not_merged() {
        let state = json!({ "user": { "name": "ada", "age": 36 }, "n": 1 });
        let next = state.merge(json!({ "user": { "name": "grace" } }));
        assert_eq!(next, json!({ "user": { "name": "grace" }, "n": 1 }));
    }

    #[test]
    fn non_object_patch_replaces_value() {
        assert_eq!(json!({ "a": 1 }).merge(json!([1, 2])), json!([1, 2]));
        assert_eq!(json!(0).merge(json!(5)), json!(5));
    }

    #[test]
    fn atomic_state_is_replaced() {
        assert_eq!(merge(&0_i32, Modifier::Patch(5)), 5);
        assert_eq!(merge(&0, Modifier::update(|n: &i32| n + 1)), 1);
        assert_eq!(merge(&vec![1, 2], Modifier::Patch(vec![3])), vec![3]);
    }

    #[test]
    fn updater_receives_current_state() {
        let state = json!({ "count": 41, "label": "x" });
        let next = merge(
            &state,
            Modifier::update(|s: &Value| json!({ "count": s["count"].as_i64().unwrap_or(0) + 1 })),
        );
        assert_eq!(next, json!({ "count": 42, "label": "x" }));
        // The previous value is untouched.
        assert_eq!(state["count"], 41);
    }

    #[test]
    fn maps_merge_shallowly() {
        let mut current = BTreeMap::new();
        current.insert("a", 1);
        current.insert("b", 2);
        let mut patch = BTreeMap::new();
        patch.insert("b", 3);
        patch.insert("c", 4);

        let next = current.merge(patch);
        assert_eq!(next.get("a"), Some(&1));
        assert_eq!(next.get("b"), Some(&3));
        assert_eq!(next.get("c"), Some(&4));

        let mut hashed: HashMap<String, i32> = HashMap::new();
        hashed.insert("keep".to_string(), 1);
        let next = hashed.merge(HashMap::new());
        assert_eq!(next.get("keep"), Some(&1));
    }
}
