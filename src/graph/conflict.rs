//! Precedence between routing objects that declare an identical match rule on
//! the same virtual host.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::domain::ObjectMeta;

/// Comparator deciding which of two conflicting objects is admitted.
/// `Ordering::Less` means the left object wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictPrecedence {
    /// Oldest object first; objects with a timestamp beat objects without;
    /// ties fall back to namespace then name.
    #[default]
    CreationTimestamp,
    /// Namespace then name, ignoring timestamps.
    Name,
}

impl ConflictPrecedence {
    pub fn compare(&self, left: &ObjectMeta, right: &ObjectMeta) -> Ordering {
        match self {
            ConflictPrecedence::CreationTimestamp => timestamp_then_name(left, right),
            ConflictPrecedence::Name => by_name(left, right),
        }
    }
}

fn timestamp_then_name(left: &ObjectMeta, right: &ObjectMeta) -> Ordering {
    let by_ts = match (&left.creation_timestamp, &right.creation_timestamp) {
        (Some(left_ts), Some(right_ts)) => left_ts.cmp(right_ts),
        (None, None) => Ordering::Equal,
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
    };

    by_ts.then_with(|| by_name(left, right))
}

fn by_name(left: &ObjectMeta, right: &ObjectMeta) -> Ordering {
    left.namespace.cmp(&right.namespace).then_with(|| left.name.cmp(&right.name))
}
