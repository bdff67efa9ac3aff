//! Unit tests for command line parsing and formatting.

use pluggable_discovery::protocol::command::{Command, PROTOCOL_VERSION};

#[test]
fn hello_formats_version_and_quoted_agent() {
    let cmd = Command::Hello {
        version: PROTOCOL_VERSION,
        user_agent: "probe probe/0.1.0".into(),
    };
    assert_eq!(cmd.to_string(), r#"HELLO 1 "probe probe/0.1.0""#);
}

#[test]
fn simple_commands_format_as_bare_verbs() {
    assert_eq!(Command::Start.to_string(), "START");
    assert_eq!(Command::Stop.to_string(), "STOP");
    assert_eq!(Command::StartSync.to_string(), "START_SYNC");
    assert_eq!(Command::List.to_string(), "LIST");
    assert_eq!(Command::Quit.to_string(), "QUIT");
}

#[test]
fn hello_parses_agent_with_spaces() {
    let cmd: Command = r#"HELLO 1 "arduino-cli 1.0.0 linux""#.parse().expect("parse");
    assert_eq!(
        cmd,
        Command::Hello {
            version: 1,
            user_agent: "arduino-cli 1.0.0 linux".into(),
        }
    );
}

#[test]
fn verbs_are_case_insensitive() {
    assert_eq!("start_sync".parse::<Command>().expect("parse"), Command::StartSync);
    assert_eq!("List".parse::<Command>().expect("parse"), Command::List);
}

#[test]
fn surrounding_whitespace_is_ignored() {
    assert_eq!("  QUIT \r".parse::<Command>().expect("parse"), Command::Quit);
}

#[test]
fn unknown_verb_reports_lowercase_event_type() {
    let err = "FROB".parse::<Command>().unwrap_err();
    assert_eq!(err.event_type, "frob");
    assert_eq!(err.message, "Command FROB not supported");
}

#[test]
fn extra_arguments_are_rejected() {
    let err = "LIST now".parse::<Command>().unwrap_err();
    assert_eq!(err.event_type, "list");
    assert!(err.message.contains("unexpected arguments"), "{err}");
}

#[test]
fn hello_without_quotes_is_rejected() {
    let err = "HELLO 1 agent".parse::<Command>().unwrap_err();
    assert_eq!(err.event_type, "hello");
    assert!(err.message.starts_with("Invalid HELLO command"), "{err}");
}

#[test]
fn hello_with_non_numeric_version_is_rejected() {
    let err = r#"HELLO one "agent""#.parse::<Command>().unwrap_err();
    assert!(err.message.contains("invalid protocol version"), "{err}");
}

#[test]
fn hello_without_arguments_is_rejected() {
    let err = "HELLO".parse::<Command>().unwrap_err();
    assert_eq!(err.event_type, "hello");
}

#[test]
fn reply_types_match_lowercase_verbs() {
    for cmd in [
        Command::Start,
        Command::Stop,
        Command::StartSync,
        Command::List,
        Command::Quit,
    ] {
        assert_eq!(cmd.reply_type(), cmd.verb().to_ascii_lowercase());
    }
}
