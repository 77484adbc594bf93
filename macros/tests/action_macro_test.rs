//! Tests for #[derive(Action)] macro

use slotsync_macros::Action;

#[derive(Action, Clone, Debug, PartialEq)]
enum SyncAction {
    #[command]
    Reserve {
        slot_id: String,
    },

    #[command]
    RefreshSnapshot,

    #[event]
    SlotAdded {
        slot_id: String,
        date: String,
    },

    #[event]
    SlotRemoved(String),

    #[event]
    BookingConfirmed {
        booking_id: String,
    },

    #[event]
    SlotCountHint {
        owner_id: String,
        count: usize,
    },
}

#[test]
fn commands_are_commands() {
    let action = SyncAction::Reserve {
        slot_id: "slot-1".to_string(),
    };
    assert!(action.is_command());
    assert!(!action.is_event());

    assert!(SyncAction::RefreshSnapshot.is_command());
}

#[test]
fn events_are_events() {
    let action = SyncAction::SlotAdded {
        slot_id: "slot-1".to_string(),
        date: "2024-06-01".to_string(),
    };
    assert!(action.is_event());
    assert!(!action.is_command());
}

#[test]
fn event_kinds_match_wire_names() {
    let added = SyncAction::SlotAdded {
        slot_id: "slot-1".to_string(),
        date: "2024-06-01".to_string(),
    };
    assert_eq!(added.kind(), "slotAdded");

    let removed = SyncAction::SlotRemoved("slot-1".to_string());
    assert_eq!(removed.kind(), "slotRemoved");

    let confirmed = SyncAction::BookingConfirmed {
        booking_id: "b-1".to_string(),
    };
    assert_eq!(confirmed.kind(), "bookingConfirmed");

    let hint = SyncAction::SlotCountHint {
        owner_id: "o-1".to_string(),
        count: 3,
    };
    assert_eq!(hint.kind(), "slotCountHint");
}

#[test]
fn commands_report_command_kind() {
    assert_eq!(SyncAction::RefreshSnapshot.kind(), "command");
}
