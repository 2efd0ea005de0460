//! GTID Position Comparison
//!
//! Promotion must prefer the most advanced replica to minimise lost
//! transactions. GTID sets are treated as opaque except for the
//! trailing transaction-count span (`uuid:1-120` has applied 120
//! transactions, `uuid:7` has applied 7), which compares numerically.

/// Relative order of one GTID position against another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GtidOrder {
    Ahead,
    Behind,
    Equal,
}

/// Compare GTID position `a` against `b`.
///
/// An empty operand is strictly behind a non-empty operand; two empty
/// operands are equal.
pub fn compare_gtid(a: &str, b: &str) -> GtidOrder {
    let a = a.trim();
    let b = b.trim();

    match (a.is_empty(), b.is_empty()) {
        (true, true) => return GtidOrder::Equal,
        (true, false) => return GtidOrder::Behind,
        (false, true) => return GtidOrder::Ahead,
        (false, false) => {}
    }

    let left = trailing_txn_count(a);
    let right = trailing_txn_count(b);
    match left.cmp(&right) {
        std::cmp::Ordering::Greater => GtidOrder::Ahead,
        std::cmp::Ordering::Less => GtidOrder::Behind,
        std::cmp::Ordering::Equal => GtidOrder::Equal,
    }
}

/// Extract the trailing numeric span of a GTID set
fn trailing_txn_count(s: &str) -> u64 {
    let digits: String = s
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_span_comparison() {
        assert_eq!(compare_gtid("x:1-120", "x:1-100"), GtidOrder::Ahead);
        assert_eq!(compare_gtid("x:1-100", "x:1-120"), GtidOrder::Behind);
        assert_eq!(compare_gtid("x:1-50", "y:1-50"), GtidOrder::Equal);
    }

    #[test]
    fn test_single_txn_span() {
        assert_eq!(compare_gtid("x:7", "x:3"), GtidOrder::Ahead);
        assert_eq!(compare_gtid("x:3", "x:1-7"), GtidOrder::Behind);
    }

    #[test]
    fn test_empty_operands() {
        assert_eq!(compare_gtid("", ""), GtidOrder::Equal);
        assert_eq!(compare_gtid("", "x:1-10"), GtidOrder::Behind);
        assert_eq!(compare_gtid("x:1-10", ""), GtidOrder::Ahead);
        assert_eq!(compare_gtid("  ", "x:1"), GtidOrder::Behind);
    }

    #[test]
    fn test_unparseable_span_counts_as_zero() {
        assert_eq!(compare_gtid("garbage", "x:1-10"), GtidOrder::Behind);
        assert_eq!(compare_gtid("garbage", "junk"), GtidOrder::Equal);
    }

    #[test]
    fn test_multi_source_set_uses_trailing_span() {
        let a = "aaaa:1-5,\nbbbb:1-200";
        let b = "aaaa:1-5,\nbbbb:1-150";
        assert_eq!(compare_gtid(a, b), GtidOrder::Ahead);
    }
}
