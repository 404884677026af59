use grnstore_model::AccessRule;
use grnstore_storage::EntityStore;
use pretty_assertions::assert_eq;

fn rule(policy: &str, scope: &str, role: &str, verb: &str, target: Option<&str>) -> AccessRule {
    AccessRule {
        policy: policy.into(),
        scope: scope.into(),
        role: role.into(),
        kind: "dashboard".into(),
        verb: verb.into(),
        target: target.map(str::to_string),
    }
}

#[test]
fn rules_are_stored_verbatim() {
    let store = EntityStore::open_in_memory().unwrap();
    let read = rule("viewers", "folder:team-a", "viewer", "read", None);
    let write = rule("viewers", "folder:team-a", "viewer", "write", Some("dash-1"));

    assert!(store.add_access_rule(&read).unwrap());
    assert!(store.add_access_rule(&write).unwrap());

    assert_eq!(store.rules_for_policy("viewers").unwrap(), vec![read, write]);
}

#[test]
fn duplicate_rule_is_ignored() {
    let store = EntityStore::open_in_memory().unwrap();
    let read = rule("viewers", "folder:team-a", "viewer", "read", None);

    assert!(store.add_access_rule(&read).unwrap());
    assert!(!store.add_access_rule(&read).unwrap());
    assert_eq!(store.rules_for_policy("viewers").unwrap().len(), 1);
}

#[test]
fn target_distinguishes_rules() {
    let store = EntityStore::open_in_memory().unwrap();
    assert!(store
        .add_access_rule(&rule("p", "s", "r", "read", Some("a")))
        .unwrap());
    assert!(store
        .add_access_rule(&rule("p", "s", "r", "read", Some("b")))
        .unwrap());
    assert!(store.add_access_rule(&rule("p", "s", "r", "read", None)).unwrap());
    assert_eq!(store.rules_for_policy("p").unwrap().len(), 3);
}

#[test]
fn find_by_scope_and_role_spans_policies() {
    let store = EntityStore::open_in_memory().unwrap();
    store
        .add_access_rule(&rule("editors", "org", "editor", "write", None))
        .unwrap();
    store
        .add_access_rule(&rule("admins", "org", "editor", "delete", None))
        .unwrap();
    store
        .add_access_rule(&rule("viewers", "org", "viewer", "read", None))
        .unwrap();

    let policies: Vec<String> = store
        .find_access_rules("org", "editor")
        .unwrap()
        .into_iter()
        .map(|r| r.policy)
        .collect();
    assert_eq!(policies, vec!["admins", "editors"]);
    assert!(store.find_access_rules("folder:x", "editor").unwrap().is_empty());
}

#[test]
fn removing_policy_drops_only_its_rules() {
    let store = EntityStore::open_in_memory().unwrap();
    store
        .add_access_rule(&rule("editors", "org", "editor", "write", None))
        .unwrap();
    store
        .add_access_rule(&rule("editors", "org", "editor", "read", None))
        .unwrap();
    store
        .add_access_rule(&rule("viewers", "org", "viewer", "read", None))
        .unwrap();

    assert_eq!(store.remove_policy_rules("editors").unwrap(), 2);
    assert!(store.rules_for_policy("editors").unwrap().is_empty());
    assert_eq!(store.rules_for_policy("viewers").unwrap().len(), 1);
    assert_eq!(store.remove_policy_rules("editors").unwrap(), 0);
}
