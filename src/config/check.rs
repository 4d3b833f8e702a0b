//! Classification of configuration fields the loader did not recognise.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

#[allow(clippy::expect_used)]
static KEY_PATH_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+\]").expect("key path index pattern is a valid regex"));

const DOCS_DIRECTORY_SYNC: &str = "https://authgate.dev/docs/upgrading#idp-directory-sync";
const DOCS_GROUPS_POLICY: &str = "https://authgate.dev/docs/upgrading#idp-groups-policy";
const DOCS_AUTHORIZATION_HEADER: &str =
    "https://authgate.dev/docs/upgrading#set-authorization-header";

/// What the service does when it meets a flagged field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Warn,
    Error,
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warn => f.write_str("warn"),
            Self::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldCheckMsg {
    Removed,
    Unknown,
}

impl fmt::Display for FieldCheckMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Removed => f.write_str("config option was removed"),
            Self::Unknown => f.write_str("unknown config option"),
        }
    }
}

/// One report line about a configuration field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMsg {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<&'static str>,
    pub action: KeyAction,
    pub message: FieldCheckMsg,
}

fn removed_field_docs(path: &str) -> Option<&'static str> {
    match path {
        "idp_service_account"
        | "idp_refresh_directory_timeout"
        | "idp_refresh_directory_interval"
        | "idp_qps" => Some(DOCS_DIRECTORY_SYNC),
        "routes.allowed_groups" => Some(DOCS_GROUPS_POLICY),
        "routes.set_authorization_header" => Some(DOCS_AUTHORIZATION_HEADER),
        _ => None,
    }
}

// embedded upstream cluster settings that are passed through untouched
fn is_ignored_field(path: &str) -> bool {
    matches!(path, "routes.outlier_detection" | "routes.health_checks")
}

/// Strip array index segments: `routes[3].from` becomes `routes.from`.
#[must_use]
pub fn normalize_key_path(key: &str) -> String {
    KEY_PATH_INDEX.replace_all(key, "").into_owned()
}

/// Classify unrecognised configuration key paths, preserving input order.
///
/// Removed fields are errors, ignored fields produce nothing and everything
/// else is reported as an unknown option with a warning.
pub fn check_unknown_config_fields<I, S>(fields: I) -> Vec<FieldMsg>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .filter_map(|field| {
            let path = normalize_key_path(field.as_ref());

            if let Some(docs_url) = removed_field_docs(&path) {
                return Some(FieldMsg {
                    key: path,
                    docs_url: Some(docs_url),
                    action: KeyAction::Error,
                    message: FieldCheckMsg::Removed,
                });
            }

            if is_ignored_field(&path) {
                return None;
            }

            Some(FieldMsg {
                key: path,
                docs_url: None,
                action: KeyAction::Warn,
                message: FieldCheckMsg::Unknown,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_unknown_config_fields() {
        let out = check_unknown_config_fields([
            "idp_service_account",
            "routes[2].health_checks",
            "totally_unknown",
        ]);

        assert_eq!(
            out,
            vec![
                FieldMsg {
                    key: "idp_service_account".to_string(),
                    docs_url: Some(DOCS_DIRECTORY_SYNC),
                    action: KeyAction::Error,
                    message: FieldCheckMsg::Removed,
                },
                FieldMsg {
                    key: "totally_unknown".to_string(),
                    docs_url: None,
                    action: KeyAction::Warn,
                    message: FieldCheckMsg::Unknown,
                },
            ]
        );
    }

    #[test]
    fn test_removed_route_fields_are_normalized() {
        let out = check_unknown_config_fields(["routes[0].allowed_groups", "routes[11].set_authorization_header"]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].key, "routes.allowed_groups");
        assert_eq!(out[0].docs_url, Some(DOCS_GROUPS_POLICY));
        assert_eq!(out[1].key, "routes.set_authorization_header");
        assert!(out.iter().all(|m| m.action == KeyAction::Error));
    }

    #[test]
    fn test_ignored_fields_produce_nothing() {
        let out = check_unknown_config_fields(["routes[4].outlier_detection", "routes.health_checks"]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let fields: Vec<String> = Vec::new();
        assert!(check_unknown_config_fields(fields).is_empty());
    }

    #[test]
    fn test_normalize_key_path() {
        assert_eq!(normalize_key_path("routes[3].foo"), "routes.foo");
        assert_eq!(normalize_key_path("a[1].b[22].c"), "a.b.c");
        assert_eq!(normalize_key_path("plain"), "plain");
        assert_eq!(normalize_key_path("routes[x].foo"), "routes[x].foo");
        assert_eq!(KEY_PATH_INDEX.as_str(), r"\[\d+\]");
    }

    #[test]
    fn test_display() {
        assert_eq!(KeyAction::Error.to_string(), "error");
        assert_eq!(FieldCheckMsg::Removed.to_string(), "config option was removed");
        assert_eq!(FieldCheckMsg::Unknown.to_string(), "unknown config option");
    }
}
