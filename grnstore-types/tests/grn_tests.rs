use grnstore_types::{Error, Grn, TenantId, MAX_GRN_LEN};
use std::collections::HashSet;
use std::str::FromStr;

fn tenant() -> TenantId {
    TenantId::new(7)
}

// ── Derivation ───────────────────────────────────────────────────

#[test]
fn grn_is_deterministic() {
    let a = Grn::new(tenant(), "dashboard", "dash-1").unwrap();
    let b = Grn::new(tenant(), "dashboard", "dash-1").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.as_str(), b.as_str());
}

#[test]
fn grn_encodes_tenant_and_kind() {
    let grn = Grn::new(tenant(), "dashboard", "dash-1").unwrap();
    assert!(grn.as_str().starts_with("grn:7/dashboard/"));
    assert_eq!(grn.tenant_id(), tenant());
    assert_eq!(grn.kind(), "dashboard");
}

#[test]
fn grn_digest_is_32_hex_chars() {
    let grn = Grn::new(tenant(), "folder", "team-a").unwrap();
    let digest = grn.as_str().rsplit('/').next().unwrap();
    assert_eq!(digest.len(), 32);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn distinct_components_give_distinct_grns() {
    let base = Grn::new(tenant(), "dashboard", "dash-1").unwrap();
    assert_ne!(base, Grn::new(TenantId::new(8), "dashboard", "dash-1").unwrap());
    assert_ne!(base, Grn::new(tenant(), "folder", "dash-1").unwrap());
    assert_ne!(base, Grn::new(tenant(), "dashboard", "dash-2").unwrap());
}

#[test]
fn length_prefixing_separates_shifted_boundaries() {
    // "ab" + "c" and "a" + "bc" must not hash the same.
    let a = Grn::new(tenant(), "ab", "c").unwrap();
    let b = Grn::new(tenant(), "a", "bc").unwrap();
    assert_ne!(a, b);
}

#[test]
fn uid_may_contain_slashes() {
    let grn = Grn::new(tenant(), "file", "dir/sub/file.json").unwrap();
    assert_eq!(grn.kind(), "file");
    assert_eq!(Grn::parse(grn.as_str()).unwrap(), grn);
}

#[test]
fn negative_tenant_is_supported() {
    let grn = Grn::new(TenantId::new(-1), "dashboard", "x").unwrap();
    assert_eq!(grn.tenant_id().get(), -1);
}

// ── Validation ───────────────────────────────────────────────────

#[test]
fn empty_kind_is_rejected() {
    let err = Grn::new(tenant(), "", "dash-1").unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));
}

#[test]
fn empty_uid_is_rejected() {
    let err = Grn::new(tenant(), "dashboard", "").unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));
}

#[test]
fn kind_with_slash_is_rejected() {
    assert!(Grn::new(tenant(), "dash/board", "x").is_err());
}

#[test]
fn oversized_kind_is_rejected() {
    let kind = "k".repeat(MAX_GRN_LEN);
    let err = Grn::new(tenant(), &kind, "x").unwrap_err();
    assert!(err.to_string().contains("limit is 256"));
}

#[test]
fn long_uid_still_fits_the_key_budget() {
    let uid = "u".repeat(4096);
    let grn = Grn::new(tenant(), "dashboard", &uid).unwrap();
    assert!(grn.as_str().len() <= MAX_GRN_LEN);
}

// ── Parsing ──────────────────────────────────────────────────────

#[test]
fn display_and_parse_roundtrip() {
    let grn = Grn::new(tenant(), "playlist", "p1").unwrap();
    let parsed = Grn::from_str(&grn.to_string()).unwrap();
    assert_eq!(parsed, grn);
    assert_eq!(parsed.tenant_id(), tenant());
}

#[test]
fn parse_rejects_garbage() {
    assert!(Grn::parse("not-a-grn").is_err());
    assert!(Grn::parse("grn:x/dashboard/00000000000000000000000000000000").is_err());
    assert!(Grn::parse("grn:7//00000000000000000000000000000000").is_err());
    assert!(Grn::parse("grn:7/dashboard/xyz").is_err());
    assert!(Grn::parse("grn:7/dashboard/0000000000000000000000000000000G").is_err());
}

#[test]
fn serde_uses_string_form() {
    let grn = Grn::new(tenant(), "dashboard", "dash-1").unwrap();
    let json = serde_json::to_string(&grn).unwrap();
    assert_eq!(json, format!("\"{grn}\""));
    let back: Grn = serde_json::from_str(&json).unwrap();
    assert_eq!(back, grn);
}

#[test]
fn serde_rejects_invalid_string() {
    assert!(serde_json::from_str::<Grn>("\"grn:bad\"").is_err());
}

#[test]
fn tenant_prefix_matches_grns_of_that_tenant() {
    let prefix = Grn::tenant_prefix(tenant());
    let grn = Grn::new(tenant(), "dashboard", "a").unwrap();
    let other = Grn::new(TenantId::new(70), "dashboard", "a").unwrap();
    assert!(grn.as_str().starts_with(&prefix));
    assert!(!other.as_str().starts_with(&prefix));
}

#[test]
fn grns_hash_and_dedupe() {
    let mut set = HashSet::new();
    set.insert(Grn::new(tenant(), "dashboard", "a").unwrap());
    set.insert(Grn::new(tenant(), "dashboard", "a").unwrap());
    set.insert(Grn::new(tenant(), "dashboard", "b").unwrap());
    assert_eq!(set.len(), 2);
}

// ── TenantId ─────────────────────────────────────────────────────

#[test]
fn tenant_id_parse_and_display() {
    let t: TenantId = "42".parse().unwrap();
    assert_eq!(t.get(), 42);
    assert_eq!(t.to_string(), "42");
    assert!("forty-two".parse::<TenantId>().is_err());
}
