use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use serde_json::{Map, Number, Value};

/// Structural equality used for memoization and change suppression.
///
/// Comparison recurses through nested containers: two separately built
/// `{ "a": { "x": 1 } }` objects are equal. `Arc` pointers that share an
/// allocation short-circuit to `true` without walking the value.
pub trait DeepEq {
    fn deep_eq(&self, other: &Self) -> bool;
}

/// Compare two values with [`DeepEq`].
///
/// # Examples
///
/// ```
/// use dharma::deeply_equals;
/// use serde_json::json;
///
/// assert!(deeply_equals(&json!({ "b": 2, "a": 1 }), &json!({ "a": 1, "b": 2 })));
/// assert!(!deeply_equals(&json!([]), &json!({})));
/// ```
pub fn deeply_equals<T: DeepEq + ?Sized>(a: &T, b: &T) -> bool {
    a.deep_eq(b)
}

macro_rules! scalar_deep_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DeepEq for $ty {
                fn deep_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

scalar_deep_eq!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char, str,
    String, (),
);

impl<T: DeepEq + ?Sized> DeepEq for &T {
    fn deep_eq(&self, other: &Self) -> bool {
        std::ptr::eq(*self, *other) || (**self).deep_eq(*other)
    }
}

impl<T: DeepEq + ?Sized> DeepEq for Box<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        (**self).deep_eq(&**other)
    }
}

impl<T: DeepEq + ?Sized> DeepEq for Arc<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other) || (**self).deep_eq(&**other)
    }
}

impl<T: DeepEq> DeepEq for Option<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.deep_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: DeepEq> DeepEq for [T] {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.deep_eq(b))
    }
}

impl<T: DeepEq, const N: usize> DeepEq for [T; N] {
    fn deep_eq(&self, other: &Self) -> bool {
        self[..].deep_eq(&other[..])
    }
}

impl<T: DeepEq> DeepEq for Vec<T> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.as_slice().deep_eq(other.as_slice())
    }
}

macro_rules! tuple_deep_eq {
    ($(($($name:ident $idx:tt),+))+) => {
        $(
            impl<$($name: DeepEq),+> DeepEq for ($($name,)+) {
                fn deep_eq(&self, other: &Self) -> bool {
                    $(self.$idx.deep_eq(&other.$idx))&&+
                }
            }
        )+
    };
}

tuple_deep_eq! {
    (A 0)
    (A 0, B 1)
    (A 0, B 1, C 2)
    (A 0, B 1, C 2, D 3)
}

impl<K, V, H> DeepEq for HashMap<K, V, H>
where
    K: Eq + Hash,
    V: DeepEq,
    H: BuildHasher,
{
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|o| value.deep_eq(o)))
    }
}

impl<K: Ord, V: DeepEq> DeepEq for BTreeMap<K, V> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|o| value.deep_eq(o)))
    }
}

impl DeepEq for Map<String, Value> {
    fn deep_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|o| value.deep_eq(o)))
    }
}

/// Integers compare exactly; 1 and 1.0 are the same number.
fn numbers_equal(a: &Number, b: &Number) -> bool {
    if a.is_f64() || b.is_f64() {
        return a.as_f64() == b.as_f64();
    }
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a == b,
        _ => a.as_u64().is_some() && a.as_u64() == b.as_u64(),
    }
}

impl DeepEq for Value {
    fn deep_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.deep_eq(b),
            (Value::Object(a), Value::Object(b)) => a.deep_eq(b),
            _ => false,
        }
    }
}
