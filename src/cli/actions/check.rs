use crate::config::{
    check::{check_unknown_config_fields, FieldMsg, KeyAction},
    Options,
};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Args {
    pub config_path: PathBuf,
    /// Print the report as JSON lines.
    pub json: bool,
}

fn render(msg: &FieldMsg, json: bool) -> Result<String> {
    if json {
        return serde_json::to_string(msg).context("failed to serialize field report");
    }

    let mut line = format!("{}: {} ({})", msg.action, msg.key, msg.message);
    if let Some(url) = msg.docs_url {
        line.push_str(", see ");
        line.push_str(url);
    }
    Ok(line)
}

/// Report removed and unknown fields of a config file.
///
/// # Errors
/// Returns an error if the file cannot be loaded or contains removed fields.
pub fn handle(args: &Args) -> Result<()> {
    let options = Options::from_file(&args.config_path)
        .with_context(|| format!("failed to load {}", args.config_path.display()))?;

    let report = check_unknown_config_fields(options.unknown_fields());

    for msg in &report {
        println!("{}", render(msg, args.json)?);
    }

    let removed = report
        .iter()
        .filter(|msg| msg.action == KeyAction::Error)
        .count();

    if removed > 0 {
        bail!("{removed} removed field(s) in {}", args.config_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[allow(clippy::unwrap_used)]
    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_render() {
        let msgs = check_unknown_config_fields(["routes[0].set_authorization_header", "colour"]);

        let removed = render(&msgs[0], false).unwrap();
        assert!(removed.starts_with("error: routes.set_authorization_header (config option was removed)"));
        assert!(removed.contains("https://authgate.dev/docs/upgrading#set-authorization-header"));

        assert_eq!(
            render(&msgs[1], false).unwrap(),
            "warn: colour (unknown config option)"
        );

        let json: serde_json::Value = serde_json::from_str(&render(&msgs[1], true).unwrap()).unwrap();
        assert_eq!(json["key"], "colour");
        assert_eq!(json["action"], "warn");
        assert_eq!(json["message"], "unknown");
        assert!(json.get("docs_url").is_none());
    }

    #[test]
    fn test_handle_clean_config() {
        let file = config_file(r#"{"authenticate_service_url": "https://a.example.com"}"#);
        let args = Args {
            config_path: file.path().to_path_buf(),
            json: false,
        };
        assert!(handle(&args).is_ok());
    }

    #[test]
    fn test_handle_unknown_only_passes() {
        let file = config_file(r#"{"colour": "blue"}"#);
        let args = Args {
            config_path: file.path().to_path_buf(),
            json: true,
        };
        assert!(handle(&args).is_ok());
    }

    #[test]
    fn test_handle_removed_fails() {
        let file = config_file(r#"{"idp_service_account": "x"}"#);
        let args = Args {
            config_path: file.path().to_path_buf(),
            json: false,
        };
        assert!(handle(&args).is_err());
    }
}
