//! Component J wire protocol (§4.J, §6.4): client<->server message shapes and
//! the record-field-set scanner used for the reload-vs-patch decision.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{BrowserUiPosition, CompilationMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag", content = "data")]
pub enum ClientMessage {
    ChangedCompilationMode { compilation_mode: CompilationMode },
    ChangedBrowserUiPosition { browser_ui_position: BrowserUiPosition },
    ChangedOpenErrorOverlay { open_error_overlay: bool },
    FocusedTab,
    PressedOpenEditor { file: String, line: u32, column: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag", content = "data")]
pub enum OpenEditorError {
    EnvNotSet,
    CommandFailed { message: String },
}

/// Why the client should reload the whole page rather than patch in place
/// (§4.J: returned by the injected hot-reload function itself, on top of the
/// server-computed `SuccessfullyCompiledButRecordFieldsChanged`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReloadReason {
    FlagsTypeChanged,
    MessageTypeChangedInDebugMode,
    InitReturnValueChanged,
    NewPortAdded,
    ProgramTypeChanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag", content = "data")]
pub enum ServerMessage {
    FocusedTabAcknowledged,
    OpenEditorFailed { error: OpenEditorError },
    StatusChanged { status: String },
    /// Encoded specially on the wire; see [`encode_successfully_compiled`].
    #[serde(skip)]
    SuccessfullyCompiled {
        code: String,
        compiled_timestamp: u64,
        compilation_mode: CompilationMode,
        browser_ui_position: BrowserUiPosition,
    },
    SuccessfullyCompiledButRecordFieldsChanged,
}

/// A `SuccessfullyCompiled` without its `code`, the part that gets
/// JSON-encoded by [`encode_successfully_compiled`] (§6.4: "to avoid
/// `JSON.stringify`-ing megabytes of JS").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuccessfullyCompiledEnvelope {
    tag: &'static str,
    compiled_timestamp: u64,
    compilation_mode: CompilationMode,
    browser_ui_position: BrowserUiPosition,
}

/// Encodes any [`ServerMessage`] to its wire form. Every variant is plain
/// JSON except `SuccessfullyCompiled`, whose `code` payload is appended after
/// a newline instead of being embedded as a JSON string (§6.4).
pub fn encode(message: &ServerMessage) -> String {
    match message {
        ServerMessage::SuccessfullyCompiled { code, compiled_timestamp, compilation_mode, browser_ui_position } => {
            let envelope = SuccessfullyCompiledEnvelope {
                tag: "SuccessfullyCompiled",
                compiled_timestamp: *compiled_timestamp,
                compilation_mode: *compilation_mode,
                browser_ui_position: *browser_ui_position,
            };
            let header = serde_json::to_string(&envelope).expect("envelope is always serializable");
            format!("//{header}\n{code}")
        }
        other => serde_json::to_string(other).expect("server message is always serializable"),
    }
}

/// Decodes a wire message, accepting both the special `SuccessfullyCompiled`
/// form (`// {...}\n<code>`) and plain JSON (§6.4: "decoder must accept both
/// forms").
pub fn decode_server_message(wire: &str) -> Option<ServerMessage> {
    if let Some(rest) = wire.strip_prefix("//") {
        let (header, code) = rest.split_once('\n')?;
        let envelope: SuccessfullyCompiledEnvelope = serde_json::from_str(header).ok()?;
        return Some(ServerMessage::SuccessfullyCompiled {
            code: code.to_string(),
            compiled_timestamp: envelope.compiled_timestamp,
            compilation_mode: envelope.compilation_mode,
            browser_ui_position: envelope.browser_ui_position,
        });
    }
    serde_json::from_str(wire).ok()
}

/// Tokenizes emitted JS well enough to list every `.identifier` access that
/// is not inside a string literal or comment (§4.J: "token-aware scan...
/// filtering tokens starting with `.`"). Good enough to diff record-field
/// usage across two optimize-mode compiles of the same program; not a real
/// JS parser.
static STRING_OR_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)"(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'|`(?:\\.|[^`\\])*`|//[^\n]*|/\*.*?\*/"#).unwrap()
});
static FIELD_ACCESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.([A-Za-z_$][\w$]*)").unwrap());

pub fn accessed_record_fields(code: &str) -> BTreeSet<String> {
    let scrubbed = STRING_OR_COMMENT.replace_all(code, " ");
    FIELD_ACCESS.captures_iter(&scrubbed).map(|c| c[1].to_string()).collect()
}

/// §4.J: compare the field sets of two optimize-mode compiles; a difference
/// means the server must send `SuccessfullyCompiledButRecordFieldsChanged`.
pub fn record_fields_changed(previous_code: &str, new_code: &str) -> bool {
    accessed_record_fields(previous_code) != accessed_record_fields(new_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successfully_compiled_round_trips_through_its_special_encoding() {
        let message = ServerMessage::SuccessfullyCompiled {
            code: "var x = 1;".to_string(),
            compiled_timestamp: 12345,
            compilation_mode: CompilationMode::Debug,
            browser_ui_position: BrowserUiPosition::TopRight,
        };
        let wire = encode(&message);
        assert!(wire.starts_with("//"));
        assert!(wire.ends_with("var x = 1;"));
        match decode_server_message(&wire).unwrap() {
            ServerMessage::SuccessfullyCompiled { code, compiled_timestamp, .. } => {
                assert_eq!(code, "var x = 1;");
                assert_eq!(compiled_timestamp, 12345);
            }
            other => panic!("expected SuccessfullyCompiled, got {other:?}"),
        }
    }

    #[test]
    fn plain_messages_round_trip_as_json() {
        let wire = encode(&ServerMessage::FocusedTabAcknowledged);
        assert!(!wire.starts_with("//"));
        assert!(matches!(decode_server_message(&wire), Some(ServerMessage::FocusedTabAcknowledged)));
    }

    #[test]
    fn field_access_ignores_strings_and_comments() {
        let code = r#"var x = ".foo"; // .bar
        /* .baz */ y.real;"#;
        let fields = accessed_record_fields(code);
        assert!(fields.contains("real"));
        assert!(!fields.contains("foo"));
        assert!(!fields.contains("bar"));
        assert!(!fields.contains("baz"));
    }

    #[test]
    fn record_fields_changed_detects_a_difference() {
        assert!(record_fields_changed("a.foo", "a.bar"));
        assert!(!record_fields_changed("a.foo; b.foo", "b.foo; a.foo"));
    }
}
