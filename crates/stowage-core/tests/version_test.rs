use proptest::prelude::*;
use stowage_core::version::check_satisfiable;
use stowage_core::{Constraint, Version};

fn v(s: &str) -> Version {
    s.parse().unwrap()
}

fn c(s: &str) -> Constraint {
    s.parse().unwrap()
}

#[test]
fn trailing_zeros_are_insignificant() {
    assert_eq!(v("1.4"), v("1.4.0"));
    assert_eq!(v("v2"), v("2.0.0"));
}

#[test]
fn release_phases_order() {
    let ordered = [
        "1.0.dev1",
        "1.0a1",
        "1.0b2",
        "1.0rc1",
        "1.0",
        "1.0.post1",
        "1.0.1",
        "1!0.1",
    ];
    for pair in ordered.windows(2) {
        assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
    }
}

#[test]
fn implicit_post_release() {
    assert_eq!(v("1.0-1"), v("1.0.post1"));
}

#[test]
fn local_label_is_ignored_for_ordering() {
    assert_eq!(v("1.2.3+cu121"), v("1.2.3"));
}

#[test]
fn invalid_versions_are_rejected() {
    for bad in ["", "abc", "1.0.", "1.0foo", "1..2"] {
        assert!(bad.parse::<Version>().is_err(), "{bad:?} should not parse");
    }
}

#[test]
fn wildcard_and_compatible_matching() {
    assert!(c("==1.4.*").matches(&v("1.4.9")));
    assert!(!c("==1.4.*").matches(&v("1.5")));
    assert!(c("!=1.4.*").matches(&v("1.5")));
    assert!(c("~=1.4.2").matches(&v("1.4.7")));
    assert!(!c("~=1.4.2").matches(&v("1.5.0")));
    assert!(c("~=2.2").matches(&v("2.9")));
    assert!(!c("~=2.2").matches(&v("3.0")));
}

#[test]
fn constraint_parse_errors() {
    assert!("1.0".parse::<Constraint>().is_err());
    assert!("==".parse::<Constraint>().is_err());
    assert!(">=1.*".parse::<Constraint>().is_err());
    assert!("~=1".parse::<Constraint>().is_err());
}

#[test]
fn arbitrary_equality_is_textual() {
    assert!(c("===1.0").matches(&v("1.0")));
    assert!(!c("===1.0").matches(&v("1.0.0")));
    assert!(check_satisfiable(&[c("===foobar"), c("===foobar")]).is_ok());
    assert!(check_satisfiable(&[c("===foobar"), c("===other")]).is_err());
}

#[test]
fn unbounded_constraints_are_satisfiable() {
    assert!(check_satisfiable(&[]).is_ok());
    assert!(check_satisfiable(&[c(">=1.0"), c("!=1.2")]).is_ok());
}

fn version_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(0u64..50, 1..4).prop_map(|segs| {
        segs.iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".")
    })
}

proptest! {
    #[test]
    fn exact_pin_is_always_satisfiable(ver in version_strategy()) {
        let pin = c(&format!("=={ver}"));
        prop_assert!(check_satisfiable(&[pin]).is_ok());
    }

    #[test]
    fn strict_bounds_on_same_version_are_unsatisfiable(ver in version_strategy()) {
        let lower = c(&format!(">{ver}"));
        let upper = c(&format!("<{ver}"));
        prop_assert!(check_satisfiable(&[lower, upper]).is_err());
    }

    #[test]
    fn constraint_display_round_trips(ver in version_strategy(), op in prop::sample::select(vec!["==", "!=", ">=", "<=", ">", "<"])) {
        let text = format!("{op}{ver}");
        prop_assert_eq!(c(&text).to_string(), text);
    }

    #[test]
    fn ordering_matches_numeric_segments(a in version_strategy(), b in version_strategy()) {
        let pad = |s: &str| {
            let mut segs: Vec<u64> = s.split('.').map(|p| p.parse().unwrap()).collect();
            segs.resize(4, 0);
            segs
        };
        prop_assert_eq!(v(&a).cmp(&v(&b)), pad(&a).cmp(&pad(&b)));
    }
}
