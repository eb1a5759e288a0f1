//! # Name Generator Tests
//!
//! Length and determinism of generated names over a range of inputs.

use cloudsql_proxy_operator::workload::names::{container_name, safe_name};
use regex::Regex;

fn is_dns_label(name: &str) -> bool {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
        .expect("pattern should compile")
        .is_match(name)
}

#[test]
fn test_names_fit_in_a_dns_label() {
    for len in 1..=120 {
        let raw = format!("w{}", "x".repeat(len - 1));
        let name = safe_name("csql-", &raw);
        assert!(name.chars().count() <= 63, "{len}: {name}");
        assert!(is_dns_label(&name), "{len}: {name}");
    }
}

#[test]
fn test_short_names_are_only_lowercased() {
    let longest = "a".repeat(58);
    for raw in ["Hello", "db", "Reporting-DB-Client", longest.as_str()] {
        assert_eq!(safe_name("csql-", raw), format!("csql-{raw}").to_lowercase());
    }
}

#[test]
fn test_boundary_name_is_truncated_and_deterministic() {
    let raw = "a".repeat(30) + &"b".repeat(29);
    assert_eq!("csql-".len() + raw.len(), 64);

    let first = container_name(&raw);
    let second = container_name(&raw);
    assert_eq!(first, second);
    assert_eq!(first.len(), 63);
    assert!(first.starts_with(&format!("csql-{}-", "a".repeat(24))));
    assert_ne!(container_name(&(raw.clone() + "c")), first);
}

#[test]
fn test_distinct_long_names_stay_distinct() {
    let common_head = "x".repeat(40);
    let a = safe_name("csql-", &format!("{common_head}-one-{common_head}"));
    let b = safe_name("csql-", &format!("{common_head}-two-{common_head}"));
    assert_ne!(a, b);
}
