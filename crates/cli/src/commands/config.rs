use std::env;
use std::fs;
use std::path::Path;

use serde::Serialize;
use toml::Value;

use changegate_core::config::{resolve_config_path, AppConfig, LoadOptions};

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

/// Effective configuration with the layer each value came from.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let entries = effective_entries(&config, config_file_doc.as_ref(), config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(entries.iter().map(render_line));

    let data = serde_json::to_value(&entries).ok();
    CommandResult::success_with_data("config", lines.join("\n"), data)
}

fn effective_entries(
    config: &AppConfig,
    doc: Option<&Value>,
    path: Option<&Path>,
) -> Vec<ConfigEntry> {
    let entry = |key: &'static str, value: String, env_keys: &[&str]| ConfigEntry {
        key,
        value,
        source: field_source(key, env_keys, doc, path),
    };

    vec![
        entry("database.url", config.database.url.clone(), &["CHANGEGATE_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CHANGEGATE_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CHANGEGATE_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "workflow.default_step_sla_days",
            config.workflow.default_step_sla_days.to_string(),
            &["CHANGEGATE_WORKFLOW_DEFAULT_STEP_SLA_DAYS"],
        ),
        entry(
            "workflow.max_comment_length",
            config.workflow.max_comment_length.to_string(),
            &["CHANGEGATE_WORKFLOW_MAX_COMMENT_LENGTH"],
        ),
        entry(
            "workflow.require_request_info_comments",
            config.workflow.require_request_info_comments.to_string(),
            &["CHANGEGATE_WORKFLOW_REQUIRE_REQUEST_INFO_COMMENTS"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["CHANGEGATE_LOGGING_LEVEL", "CHANGEGATE_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["CHANGEGATE_LOGGING_FORMAT", "CHANGEGATE_LOG_FORMAT"],
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys
        .iter()
        .find(|env_key| env::var(env_key).is_ok_and(|value| !value.trim().is_empty()))
    {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(entry: &ConfigEntry) -> String {
    format!("- {} = {} (source: {})", entry.key, entry.value, entry.source)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn nested_keys_are_found_in_file_document() {
        let doc: Value = "[workflow]\ndefault_step_sla_days = 5\n".parse().expect("toml");

        assert!(contains_path(&doc, "workflow.default_step_sla_days"));
        assert!(!contains_path(&doc, "workflow.max_comment_length"));
        assert!(!contains_path(&doc, "logging.level"));
    }

    #[test]
    fn file_source_names_the_file() {
        let doc: Value = "[logging]\nlevel = \"debug\"\n".parse().expect("toml");
        let source = field_source(
            "logging.level",
            &["CHANGEGATE_TEST_NEVER_SET_LEVEL"],
            Some(&doc),
            Some(Path::new("config/changegate.toml")),
        );

        assert_eq!(source, "file (config/changegate.toml)");
    }

    #[test]
    fn unset_keys_fall_back_to_default() {
        let source =
            field_source("database.url", &["CHANGEGATE_TEST_NEVER_SET_URL"], None, None);
        assert_eq!(source, "default");
    }
}
