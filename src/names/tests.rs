use super::{check, validate, NameSet};
use crate::ErrorCategory;

#[test]
fn legal_names() {
    assert!(validate(b"com.example.Test"));
    assert!(validate(b"se.tedro.DBusExample"));
    assert!(validate(b"a.b"));
    assert!(validate(b"org.freedesktop.DBus"));
    assert!(validate(b"com.example_1.with-dash"));

    assert!(!validate(b""));
    assert!(!validate(b"single"));
    assert!(!validate(b".com.example"));
    assert!(!validate(b"com.example."));
    assert!(!validate(b"com..example"));
    assert!(!validate(b"1com.example"));
    assert!(!validate(b"com.1example"));
    assert!(!validate(b":1.42"));
    assert!(!validate(b"com.exa mple"));
    assert!(!validate(b"com/example"));
}

#[test]
fn name_length() {
    let mut long = String::from("a.");
    long.extend(std::iter::repeat('b').take(253));
    assert_eq!(long.len(), 255);
    assert!(validate(long.as_bytes()));

    long.push('b');
    assert!(!validate(long.as_bytes()));
}

#[test]
fn invalid_name_category() {
    let error = check("nope").unwrap_err();
    assert_eq!(error.category(), ErrorCategory::NameUnavailable);
    assert!(check("com.example.Test").is_ok());
}

#[test]
fn name_set() {
    let mut names = NameSet::new();
    assert!(names.is_empty());

    names.insert("com.example.B");
    names.insert("com.example.A");
    names.insert("com.example.A");

    assert_eq!(names.len(), 2);
    assert!(names.contains("com.example.A"));
    assert_eq!(
        names.iter().collect::<Vec<_>>(),
        ["com.example.A", "com.example.B"]
    );

    assert!(names.remove("com.example.A"));
    assert!(!names.remove("com.example.A"));
    assert_eq!(format!("{names:?}"), r#"{"com.example.B"}"#);

    names.clear();
    assert!(names.is_empty());
}
