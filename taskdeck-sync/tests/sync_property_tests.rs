//! Property tests for the cache, tags, reducers and message precedence.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use taskdeck_core::{ApiFailure, Envelope, Payload, StatusClass, SystemClock, Tag, FALLBACK_ERROR_MESSAGE};
use taskdeck_sync::cache::{CacheKey, CacheStore, EntryStatus};
use taskdeck_sync::persistence::{Preferences, Theme};
use taskdeck_sync::state::{reduce_preferences, PreferencesAction};
use taskdeck_test_utils::generators::{arb_args, arb_tag, arb_tag_kind};

fn reversed(args: &Value) -> Value {
    let fields = args.as_object().cloned().unwrap_or_default();
    let mut out = Map::new();
    for (k, v) in fields.into_iter().rev() {
        out.insert(k, v);
    }
    Value::Object(out)
}

fn arb_action() -> impl Strategy<Value = PreferencesAction> {
    prop_oneof![
        Just(PreferencesAction::SetTheme(Theme::Light)),
        Just(PreferencesAction::SetTheme(Theme::Dark)),
        Just(PreferencesAction::ToggleTheme),
        any::<bool>().prop_map(PreferencesAction::SetSidebarCollapsed),
        Just(PreferencesAction::ToggleSidebar),
        Just(PreferencesAction::Reset),
    ]
}

fn arb_preferences() -> impl Strategy<Value = Preferences> {
    (any::<bool>(), any::<bool>()).prop_map(|(dark, collapsed)| Preferences {
        theme: if dark { Theme::Dark } else { Theme::Light },
        sidebar_collapsed: collapsed,
    })
}

fn arb_text() -> impl Strategy<Value = Option<String>> {
    proptest::option::of(prop_oneof![Just(String::new()), "[a-z ]{1,12}"])
}

proptest! {
    #[test]
    fn key_ignores_field_order_and_nulls(args in arb_args(), extra in "[A-Z]{1,4}") {
        let base = CacheKey::new("listTasks", &args);
        prop_assert_eq!(&base, &CacheKey::new("listTasks", &reversed(&args)));

        let mut with_null = args.as_object().cloned().unwrap_or_default();
        with_null.insert(extra, Value::Null);
        prop_assert_eq!(&base, &CacheKey::new("listTasks", &Value::Object(with_null)));
        prop_assert_ne!(&base, &CacheKey::new("listProjects", &args));
    }

    #[test]
    fn collection_tag_matches_whole_kind(tag in arb_tag()) {
        prop_assert!(Tag::collection(tag.kind).matches(&tag));
        prop_assert!(tag.matches(&tag));
    }

    #[test]
    fn entity_tag_matches_only_same_entity(kind in arb_tag_kind(), a in "[a-z][0-9]", b in "[a-z][0-9]") {
        let hit = Tag::entity(kind, a.clone()).matches(&Tag::entity(kind, b.clone()));
        prop_assert_eq!(hit, a == b);
        prop_assert!(!Tag::entity(kind, a).matches(&Tag::collection(kind)));
    }

    #[test]
    fn reducer_toggles_are_involutions(prefs in arb_preferences()) {
        let twice = reduce_preferences(
            &reduce_preferences(&prefs, PreferencesAction::ToggleTheme),
            PreferencesAction::ToggleTheme,
        );
        prop_assert_eq!(&twice, &prefs);
        let twice = reduce_preferences(
            &reduce_preferences(&prefs, PreferencesAction::ToggleSidebar),
            PreferencesAction::ToggleSidebar,
        );
        prop_assert_eq!(&twice, &prefs);
    }

    #[test]
    fn reducer_is_pure_and_reset_is_default(prefs in arb_preferences(), actions in prop::collection::vec(arb_action(), 0..8)) {
        let snapshot = prefs.clone();
        let mut current = prefs.clone();
        for action in &actions {
            let next = reduce_preferences(&current, *action);
            prop_assert_eq!(&next, &reduce_preferences(&current, *action));
            current = next;
        }
        prop_assert_eq!(&prefs, &snapshot);
        prop_assert_eq!(reduce_preferences(&current, PreferencesAction::Reset), Preferences::default());
    }

    #[test]
    fn message_precedence(server in arb_text(), code in arb_text(), transport in arb_text()) {
        let failure = ApiFailure {
            status_class: StatusClass::Validation,
            status: Some(422),
            server_message: server.clone(),
            server_code: code.clone(),
            transport_message: transport.clone(),
        };
        let expected = [server, code, transport]
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string());
        prop_assert_eq!(failure.message(), expected);
    }

    #[test]
    fn last_dispatched_wins(order in Just((0..6usize).collect::<Vec<_>>()).prop_shuffle()) {
        let store = CacheStore::new(Arc::new(SystemClock));
        let key = CacheKey::new("getProject", &json!({ "id": "p9" }));
        let tickets: Vec<_> = (0..6).map(|_| store.mark_pending(&key)).collect();

        for i in order {
            store.upsert(&tickets[i], Payload::new(json!({ "version": i })), BTreeSet::new());
        }

        let entry = store.read(&key).unwrap();
        prop_assert_eq!(entry.status, EntryStatus::Fulfilled);
        prop_assert_eq!(entry.value.unwrap().data, json!({ "version": 5 }));
    }
}

#[test]
fn error_envelope_prefers_message_over_code() {
    let envelope: Envelope =
        serde_json::from_value(json!({ "success": false, "message": "", "error": "E_CONFLICT" }))
            .unwrap();
    let failure = ApiFailure::from_response(409, Some(&envelope));
    assert_eq!(failure.message(), "E_CONFLICT");
}
