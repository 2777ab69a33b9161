// ── Node availability ──
//
// Debounced availability derived from connection-state transitions.
// A node that drops from Connected straight to Reconnecting stays
// available; it only goes unavailable once it falls further.

use crate::model::ConnectionState;

/// Whether a node in `current` should be reported available, given the
/// state it was in immediately before (`None` on first observation).
pub fn is_available(current: ConnectionState, previous: Option<ConnectionState>) -> bool {
    match current {
        ConnectionState::Connected => true,
        ConnectionState::Reconnecting => previous == Some(ConnectionState::Connected),
        ConnectionState::AwaitingDiscovery | ConnectionState::Disconnected => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    use crate::model::ConnectionState::{AwaitingDiscovery, Connected, Disconnected, Reconnecting};

    #[rustfmt::skip]
    const RULE_TABLE: [(ConnectionState, Option<ConnectionState>, bool); 20] = [
        (Connected,         None,                    true),
        (Connected,         Some(Connected),         true),
        (Connected,         Some(Reconnecting),      true),
        (Connected,         Some(AwaitingDiscovery), true),
        (Connected,         Some(Disconnected),      true),
        (Reconnecting,      None,                    false),
        (Reconnecting,      Some(Connected),         true),
        (Reconnecting,      Some(Reconnecting),      false),
        (Reconnecting,      Some(AwaitingDiscovery), false),
        (Reconnecting,      Some(Disconnected),      false),
        (AwaitingDiscovery, None,                    false),
        (AwaitingDiscovery, Some(Connected),         false),
        (AwaitingDiscovery, Some(Reconnecting),      false),
        (AwaitingDiscovery, Some(AwaitingDiscovery), false),
        (AwaitingDiscovery, Some(Disconnected),      false),
        (Disconnected,      None,                    false),
        (Disconnected,      Some(Connected),         false),
        (Disconnected,      Some(Reconnecting),      false),
        (Disconnected,      Some(AwaitingDiscovery), false),
        (Disconnected,      Some(Disconnected),      false),
    ];

    #[test]
    fn exhaustive_rule_table() {
        for (current, previous, available) in RULE_TABLE {
            assert_eq!(
                is_available(current, previous),
                available,
                "current={current} previous={previous:?}"
            );
        }
    }

    #[test]
    fn rule_table_covers_every_pair_once() {
        for current in ConnectionState::iter() {
            for previous in ConnectionState::iter().map(Some).chain([None]) {
                let rows = RULE_TABLE
                    .iter()
                    .filter(|(c, p, _)| *c == current && *p == previous)
                    .count();
                assert_eq!(rows, 1, "current={current} previous={previous:?}");
            }
        }
    }

    #[test]
    fn reconnecting_is_debounced_only_from_connected() {
        assert!(is_available(Reconnecting, Some(Connected)));
        assert!(!is_available(Reconnecting, Some(Reconnecting)));
        assert!(!is_available(Reconnecting, None));
    }

    #[test]
    fn first_observation() {
        assert!(is_available(Connected, None));
        assert!(!is_available(AwaitingDiscovery, None));
        assert!(!is_available(Disconnected, None));
    }
}
