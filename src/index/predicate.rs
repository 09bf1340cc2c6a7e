//! Range and key predicates for narrowing index traversal.

use std::cmp::Ordering;
use std::fmt;

/// A composable filter over index keys.
///
/// Predicates answer two questions during traversal: whether a key range
/// `[first, second)` could contain matches (used to prune whole subtrees;
/// `None` bounds mean "before the first separator" / "after the last"),
/// and whether a single key matches. The range test is conservative: it
/// may over-approximate interest but never skips a subtree that could
/// hold a matching key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate<K> {
    /// Matches every key.
    All,
    /// Matches no key.
    None,
    /// Matches keys strictly greater than the value.
    Gt(K),
    /// Matches keys greater than or equal to the value.
    Gte(K),
    /// Matches keys strictly less than the value.
    Lt(K),
    /// Matches keys less than or equal to the value.
    Lte(K),
    /// Matches keys in `[first, last)` — inclusive below, exclusive above.
    Between(K, K),
    /// Matches keys every inner predicate matches.
    And(Vec<Predicate<K>>),
    /// Matches keys any inner predicate matches.
    Or(Vec<Predicate<K>>),
}

impl<K> Predicate<K> {
    /// Whether keys between `first` and `second` could interest this
    /// predicate.
    pub fn interested_in_range(
        &self,
        first: Option<&K>,
        second: Option<&K>,
        cmp: &dyn Fn(&K, &K) -> Ordering,
    ) -> bool {
        match self {
            Predicate::All => true,
            Predicate::None => false,
            Predicate::Gt(_) | Predicate::Gte(_) => match second {
                Some(second) => self.interested_in_key(second, cmp),
                None => true,
            },
            Predicate::Lt(_) | Predicate::Lte(_) => match first {
                Some(first) => self.interested_in_key(first, cmp),
                None => true,
            },
            Predicate::Between(low, high) => {
                second.is_none_or(|second| cmp(second, low) != Ordering::Less)
                    && first.is_none_or(|first| cmp(first, high) == Ordering::Less)
            }
            Predicate::And(conditions) => conditions
                .iter()
                .all(|condition| condition.interested_in_range(first, second, cmp)),
            Predicate::Or(conditions) => conditions
                .iter()
                .any(|condition| condition.interested_in_range(first, second, cmp)),
        }
    }

    /// Whether `key` matches this predicate.
    pub fn interested_in_key(&self, key: &K, cmp: &dyn Fn(&K, &K) -> Ordering) -> bool {
        match self {
            Predicate::All => true,
            Predicate::None => false,
            Predicate::Gt(value) => cmp(key, value) == Ordering::Greater,
            Predicate::Gte(value) => cmp(key, value) != Ordering::Less,
            Predicate::Lt(value) => cmp(key, value) == Ordering::Less,
            Predicate::Lte(value) => cmp(key, value) != Ordering::Greater,
            Predicate::Between(low, high) => {
                cmp(key, low) != Ordering::Less && cmp(key, high) == Ordering::Less
            }
            Predicate::And(conditions) => conditions
                .iter()
                .all(|condition| condition.interested_in_key(key, cmp)),
            Predicate::Or(conditions) => conditions
                .iter()
                .any(|condition| condition.interested_in_key(key, cmp)),
        }
    }
}

impl<K: fmt::Display> fmt::Display for Predicate<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<K: fmt::Display>(
            f: &mut fmt::Formatter<'_>,
            conditions: &[Predicate<K>],
            separator: &str,
        ) -> fmt::Result {
            for (index, condition) in conditions.iter().enumerate() {
                if index > 0 {
                    f.write_str(separator)?;
                }
                write!(f, "({condition})")?;
            }
            Ok(())
        }
        match self {
            Predicate::All => f.write_str("all"),
            Predicate::None => f.write_str("none"),
            Predicate::Gt(value) => write!(f, "key > {value}"),
            Predicate::Gte(value) => write!(f, "key >= {value}"),
            Predicate::Lt(value) => write!(f, "key < {value}"),
            Predicate::Lte(value) => write!(f, "key <= {value}"),
            Predicate::Between(low, high) => write!(f, "{low} <= key < {high}"),
            Predicate::And(conditions) => join(f, conditions, " AND "),
            Predicate::Or(conditions) => join(f, conditions, " OR "),
        }
    }
}
