use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use datapac_core::config::{AppConfig, LoadOptions, CONFIG_FILE_CANDIDATES};
use toml::Value;

pub fn run(config_path: Option<&Path>) -> String {
    let options = LoadOptions { config_path: config_path.map(Path::to_path_buf), ..LoadOptions::default() };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path(config_path);
    let file_doc = load_config_file_doc(file_path.as_deref());

    let llm_base_url = config.llm.effective_base_url().unwrap_or_else(|| "<unset>".to_string());
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let entries: [(&str, String, &[&str]); 10] = [
        ("backend.base_url", config.backend.base_url.clone(), &["DATAPAC_BACKEND_BASE_URL"]),
        (
            "backend.timeout_secs",
            config.backend.timeout_secs.to_string(),
            &["DATAPAC_BACKEND_TIMEOUT_SECS"],
        ),
        ("llm.provider", format!("{:?}", config.llm.provider), &["DATAPAC_LLM_PROVIDER"]),
        ("llm.model", config.llm.model.clone(), &["DATAPAC_LLM_MODEL"]),
        ("llm.base_url", llm_base_url, &["DATAPAC_LLM_BASE_URL"]),
        ("llm.api_key", llm_api_key.to_string(), &["DATAPAC_LLM_API_KEY"]),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["DATAPAC_LLM_TIMEOUT_SECS"]),
        ("llm.max_steps", config.llm.max_steps.to_string(), &["DATAPAC_LLM_MAX_STEPS"]),
        (
            "logging.level",
            config.logging.level.clone(),
            &["DATAPAC_LOGGING_LEVEL", "DATAPAC_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["DATAPAC_LOGGING_FORMAT", "DATAPAC_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in entries {
        let source = field_source(key, env_keys, file_doc.as_ref(), file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    CONFIG_FILE_CANDIDATES.iter().map(PathBuf::from).find(|path| path.exists())
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
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
