//! Control lines read from stdin while serving

use serde_json::{json, Value};

use crate::common::{Error, Result};
use crate::ipc::ConnectionId;

/// One parsed control line
#[derive(Debug, Clone, PartialEq)]
pub enum ControlLine {
    Restart(Vec<String>),
    Reload(Option<Vec<ConnectionId>>),
    Broadcast { kind: String, data: Value },
    Send {
        id: ConnectionId,
        kind: String,
        data: Value,
    },
    Status,
    Stop,
}

impl ControlLine {
    /// Parse a line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let (verb, rest) = split_word(line.trim());
        let parsed = match verb {
            "" => return Ok(None),
            "restart" => Self::Restart(words(rest)),
            "reload" => {
                let ids: Vec<ConnectionId> = words(rest).into_iter().map(ConnectionId::from).collect();
                Self::Reload(if ids.is_empty() { None } else { Some(ids) })
            }
            "broadcast" => {
                let (kind, payload) = split_word(rest);
                Self::Broadcast {
                    kind: required(kind, "broadcast <type> [json]")?,
                    data: payload_json(payload)?,
                }
            }
            "send" => {
                let (id, rest) = split_word(rest);
                let (kind, payload) = split_word(rest);
                Self::Send {
                    id: ConnectionId::new(required(id, "send <id> <type> [json]")?),
                    kind: required(kind, "send <id> <type> [json]")?,
                    data: payload_json(payload)?,
                }
            }
            "status" => Self::Status,
            "stop" | "quit" | "exit" => Self::Stop,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown control command '{}'",
                    other
                )))
            }
        };
        Ok(Some(parsed))
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

fn words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_owned).collect()
}

fn required(word: &str, usage: &str) -> Result<String> {
    if word.is_empty() {
        return Err(Error::InvalidArgument(format!("usage: {}", usage)));
    }
    Ok(word.to_owned())
}

fn payload_json(payload: &str) -> Result<Value> {
    if payload.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(payload)
        .map_err(|e| Error::InvalidArgument(format!("payload is not JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_line() {
        assert_eq!(ControlLine::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_restart_and_reload() {
        assert_eq!(
            ControlLine::parse("restart Hoge foo").unwrap(),
            Some(ControlLine::Restart(vec!["Hoge".into(), "foo".into()]))
        );
        assert_eq!(
            ControlLine::parse("restart").unwrap(),
            Some(ControlLine::Restart(vec![]))
        );
        assert_eq!(ControlLine::parse("reload").unwrap(), Some(ControlLine::Reload(None)));
        assert_eq!(
            ControlLine::parse("reload 7 42").unwrap(),
            Some(ControlLine::Reload(Some(vec!["7".into(), "42".into()])))
        );
    }

    #[test]
    fn test_broadcast_and_send() {
        assert_eq!(
            ControlLine::parse(r#"broadcast myNotification {"a": [1, 2]}"#).unwrap(),
            Some(ControlLine::Broadcast {
                kind: "myNotification".into(),
                data: json!({"a": [1, 2]}),
            })
        );
        assert_eq!(
            ControlLine::parse("send 42 ping").unwrap(),
            Some(ControlLine::Send {
                id: "42".into(),
                kind: "ping".into(),
                data: json!({}),
            })
        );
    }

    #[test]
    fn test_errors() {
        assert!(ControlLine::parse("broadcast").is_err());
        assert!(ControlLine::parse("send 42").is_err());
        assert!(ControlLine::parse("broadcast t {not json").is_err());
        assert!(ControlLine::parse("launch").is_err());
    }

    #[test]
    fn test_status_and_stop() {
        assert_eq!(ControlLine::parse("status").unwrap(), Some(ControlLine::Status));
        assert_eq!(ControlLine::parse(" stop ").unwrap(), Some(ControlLine::Stop));
    }
}
