use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A point in the binlog: the file MySQL is currently writing and the byte
/// offset within it. Monotonic within a single source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub file: String,
    pub offset: u64,
}

impl Position {
    pub fn new(file: impl Into<String>, offset: u64) -> Self {
        Self {
            file: file.into(),
            offset,
        }
    }

    /// The position an engine starts from when no prior checkpoint exists.
    pub fn genesis() -> Self {
        Self {
            file: String::new(),
            offset: 0,
        }
    }
}

/// Positions only compare meaningfully within the same binlog file sequence;
/// file names sort lexicographically the way MySQL names them
/// (`mysql-bin.000001`, `mysql-bin.000002`, ...).
impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.file.cmp(&other.file).then(self.offset.cmp(&other.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn orders_by_file_then_offset() {
        let a = Position::new("mysql-bin.000003", 1024);
        let b = Position::new("mysql-bin.000003", 2048);
        let c = Position::new("mysql-bin.000004", 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn round_trips_through_json() {
        let p = Position::new("mysql-bin.000003", 1024);
        let json = serde_json::to_string(&p).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }

    proptest! {
        #[test]
        fn same_file_orders_by_offset(file in "mysql-bin\\.[0-9]{6}", a in 0u64..1_000_000, b in 0u64..1_000_000) {
            let pa = Position::new(file.clone(), a);
            let pb = Position::new(file, b);
            prop_assert_eq!(pa.cmp(&pb), a.cmp(&b));
        }

        #[test]
        fn ord_is_consistent_with_json_round_trip(file in "mysql-bin\\.[0-9]{6}", offset in 0u64..u64::MAX) {
            let p = Position::new(file, offset);
            let json = serde_json::to_string(&p).unwrap();
            let back: Position = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(p.cmp(&back), Ordering::Equal);
        }
    }
}
