use std::collections::BTreeSet;

/// Smallest port at or above `baseline` that nobody has claimed.
///
/// Returns `None` when every port from `baseline` up to 65535 is taken.
pub fn next_free_port(used: &BTreeSet<u16>, baseline: u16) -> Option<u16> {
    (baseline..=u16::MAX).find(|port| !used.contains(port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_the_first_gap() {
        let used = BTreeSet::from([9000, 9001, 9003]);
        assert_eq!(next_free_port(&used, 9000), Some(9002));
    }

    #[test]
    fn empty_set_returns_baseline() {
        assert_eq!(next_free_port(&BTreeSet::new(), 9000), Some(9000));
    }

    #[test]
    fn ports_below_baseline_are_ignored() {
        let used = BTreeSet::from([80, 443]);
        assert_eq!(next_free_port(&used, 9000), Some(9000));
    }

    #[test]
    fn exhausted_range_yields_none() {
        let used = BTreeSet::from([65534, 65535]);
        assert_eq!(next_free_port(&used, 65534), None);
    }
}
