//! Change Comparison
//!
//! A watcher decides whether a notification is a real change by comparing
//! the old and new values. Three rules exist:
//!
//! - **Shallow** (default): every notification from the cell counts. The
//!   cell already applied its own equality rule before notifying.
//! - **Deep**: the values are compared with [`Structural`], field by field.
//! - **Custom**: a caller-supplied function decides, and nothing else is
//!   applied on top of it.
//!
//! [`Structural`] is implemented explicitly per type. A self-referential
//! type has no finite structural comparison and simply cannot implement it.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use indexmap::IndexMap;

/// Field-by-field structural equality.
///
/// For most types this agrees with `PartialEq`; the two differ for types
/// whose `PartialEq` is identity-based (handles, ids) or deliberately
/// partial, which is exactly when a deep watcher is useful.
pub trait Structural {
    fn structural_eq(&self, other: &Self) -> bool;
}

macro_rules! structural_via_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Structural for $ty {
                fn structural_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

structural_via_eq!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, String, str, (),
);

// Floats compare by bit pattern so that NaN equals itself and a deep watcher
// does not fire forever on a NaN field.
impl Structural for f32 {
    fn structural_eq(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl Structural for f64 {
    fn structural_eq(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl<T: Structural + ?Sized> Structural for &T {
    fn structural_eq(&self, other: &Self) -> bool {
        (**self).structural_eq(*other)
    }
}

impl<T: Structural + ?Sized> Structural for Box<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        (**self).structural_eq(&**other)
    }
}

impl<T: Structural + ?Sized> Structural for Arc<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other) || (**self).structural_eq(&**other)
    }
}

impl<T: Structural> Structural for Option<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.structural_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: Structural> Structural for [T] {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.structural_eq(b))
    }
}

impl<T: Structural, const N: usize> Structural for [T; N] {
    fn structural_eq(&self, other: &Self) -> bool {
        self.as_slice().structural_eq(other.as_slice())
    }
}

impl<T: Structural> Structural for Vec<T> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.as_slice().structural_eq(other.as_slice())
    }
}

impl<K, V, S> Structural for HashMap<K, V, S>
where
    K: Eq + Hash,
    V: Structural,
    S: BuildHasher,
{
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.structural_eq(o)))
    }
}

impl<K, V, S> Structural for IndexMap<K, V, S>
where
    K: Eq + Hash,
    V: Structural,
    S: BuildHasher,
{
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.structural_eq(o)))
    }
}

impl<K: Ord, V: Structural> Structural for BTreeMap<K, V> {
    fn structural_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other)
                .all(|((ka, va), (kb, vb))| ka == kb && va.structural_eq(vb))
    }
}

macro_rules! structural_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: Structural),+> Structural for ($($name,)+) {
            fn structural_eq(&self, other: &Self) -> bool {
                $(self.$idx.structural_eq(&other.$idx))&&+
            }
        }
    };
}

structural_tuple!(A.0);
structural_tuple!(A.0, B.1);
structural_tuple!(A.0, B.1, C.2);
structural_tuple!(A.0, B.1, C.2, D.3);

/// Equality function installed by a caller.
pub type EqualityFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// How a watcher decides that old and new differ.
pub enum Comparator<T> {
    Shallow,
    Deep(fn(&T, &T) -> bool),
    Custom(EqualityFn<T>),
}

impl<T> Comparator<T> {
    pub fn deep() -> Self
    where
        T: Structural,
    {
        Comparator::Deep(<T as Structural>::structural_eq)
    }

    pub fn custom(equal: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        Comparator::Custom(Arc::new(equal))
    }

    /// Whether `old` and `new` count as the same value under this rule.
    pub fn is_unchanged(&self, old: &T, new: &T) -> bool {
        match self {
            Comparator::Shallow => false,
            Comparator::Deep(equal) => equal(old, new),
            Comparator::Custom(equal) => equal(old, new),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Comparator::Shallow => "shallow",
            Comparator::Deep(_) => "deep",
            Comparator::Custom(_) => "custom",
        }
    }
}

impl<T> Default for Comparator<T> {
    fn default() -> Self {
        Comparator::Shallow
    }
}

impl<T> std::fmt::Debug for Comparator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Profile {
        id: u64,
        tags: Vec<String>,
        scores: BTreeMap<String, f64>,
    }

    impl Structural for Profile {
        fn structural_eq(&self, other: &Self) -> bool {
            self.id.structural_eq(&other.id)
                && self.tags.structural_eq(&other.tags)
                && self.scores.structural_eq(&other.scores)
        }
    }

    fn profile() -> Profile {
        Profile {
            id: 1,
            tags: vec!["admin".into()],
            scores: BTreeMap::from([("speed".to_owned(), 0.5)]),
        }
    }

    #[test]
    fn nested_change_is_detected() {
        let a = profile();
        let mut b = a.clone();
        assert!(a.structural_eq(&b));

        b.scores.insert("speed".into(), 0.75);
        assert!(!a.structural_eq(&b));

        let mut c = a.clone();
        c.tags.push("ops".into());
        assert!(!a.structural_eq(&c));
    }

    #[test]
    fn nan_equals_itself() {
        assert!(f64::NAN.structural_eq(&f64::NAN));
        assert!(!(0.1_f64).structural_eq(&0.2));
    }

    #[test]
    fn maps_ignore_insertion_order() {
        let mut a = HashMap::new();
        a.insert("x", 1);
        a.insert("y", 2);
        let mut b = HashMap::new();
        b.insert("y", 2);
        b.insert("x", 1);
        assert!(a.structural_eq(&b));

        b.insert("z", 3);
        assert!(!a.structural_eq(&b));
    }

    #[test]
    fn arc_compares_contents() {
        let a = Arc::new(vec![1, 2, 3]);
        let b = Arc::new(vec![1, 2, 3]);
        assert!(a.structural_eq(&b));
        assert!(!a.structural_eq(&Arc::new(vec![1, 2])));
    }

    #[test]
    fn comparator_rules() {
        let shallow = Comparator::<i32>::Shallow;
        assert!(!shallow.is_unchanged(&1, &1));

        let deep = Comparator::<Vec<i32>>::deep();
        assert!(deep.is_unchanged(&vec![1], &vec![1]));
        assert!(!deep.is_unchanged(&vec![1], &vec![2]));

        let by_id = Comparator::<Profile>::custom(|a, b| a.id == b.id);
        let mut other = profile();
        other.tags.clear();
        assert!(by_id.is_unchanged(&profile(), &other));
        assert_eq!(by_id.name(), "custom");
    }
}
