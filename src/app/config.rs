use crate::app::cli::Cli;
use crate::app::error::{PreloadError, Result};
use crate::app::models::{RuntimeConfig, TemplateSource};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_EXPORT: &str = "vendor/preload.php";

#[derive(Deserialize, Debug, Default)]
struct Manifest {
    #[serde(default)]
    extra: Extra,
}

#[derive(Deserialize, Debug, Default)]
struct Extra {
    #[serde(default)]
    preload: Value,
}

/// Raw `extra.preload` keys. `null` is accepted anywhere and means "unset".
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", default)]
struct PreloadSection {
    files: Option<Vec<String>>,
    paths: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    exclude_files: Option<Vec<String>>,
    exclude_regex: Option<String>,
    extensions: Option<Vec<String>>,
    no_status_check: Option<bool>,
    export: Option<String>,
    template: Option<String>,
}

fn parse<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let parsed: std::result::Result<T, String> = if is_toml {
        toml::from_str(content).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(content).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| {
        PreloadError::config(format!(
            "\"extra.preload\" configuration in {} is invalid: {}",
            path.display(),
            e
        ))
    })
}

fn load_section(path: &Path) -> Result<PreloadSection> {
    let content = fs::read_to_string(path).map_err(|e| {
        PreloadError::config(format!("Failed to read config at {}: {}", path.display(), e))
    })?;
    let manifest: Manifest = parse(path, &content)?;

    section_from(manifest.extra.preload).map_err(|e| {
        PreloadError::config(format!("{} ({})", e, path.display()))
    })
}

/// An absent, null, empty, or all-null section counts as "not set"; any
/// other non-map value is rejected.
fn section_from(value: Value) -> std::result::Result<PreloadSection, String> {
    let is_unset = match &value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(Value::is_null),
        Value::Number(_) => false,
    };
    if is_unset {
        return Err("\"preload\" setting is not set in \"extra\" section".to_string());
    }
    if !value.is_object() {
        return Err(
            "\"extra.preload\" configuration is invalid: expected a map of settings".to_string(),
        );
    }
    serde_json::from_value(value)
        .map_err(|e| format!("\"extra.preload\" configuration is invalid: {e}"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn resolve_all(root: &Path, items: Option<Vec<String>>) -> Vec<PathBuf> {
    items
        .unwrap_or_default()
        .into_iter()
        .map(|item| root.join(item))
        .collect()
}

/// Loads the manifest named on the command line and validates its
/// `extra.preload` section. `--no-status-check` wins over the manifest.
pub fn resolve_config(cli: &Cli) -> Result<RuntimeConfig> {
    let manifest = fs::canonicalize(&cli.config).map_err(|e| {
        PreloadError::config(format!(
            "Cannot find project manifest {}: {}",
            cli.config.display(),
            e
        ))
    })?;
    let root = manifest
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let section = load_section(&manifest)?;
    build_config(section, root, cli.no_status_check)
}

fn build_config(
    section: PreloadSection,
    root: PathBuf,
    force_no_status_check: bool,
) -> Result<RuntimeConfig> {
    let no_status_check = force_no_status_check || section.no_status_check.unwrap_or(false);

    let template = match non_empty(section.template) {
        Some(template) => {
            let path = root.join(template);
            if !path.is_file() {
                return Err(PreloadError::config(format!(
                    "\"extra.preload.template\" must exist: {}",
                    path.display()
                )));
            }
            TemplateSource::File(path)
        }
        None => TemplateSource::Builtin {
            status_check: !no_status_check,
        },
    };

    let export = root.join(non_empty(section.export).unwrap_or_else(|| DEFAULT_EXPORT.to_string()));

    Ok(RuntimeConfig {
        files: resolve_all(&root, section.files),
        paths: resolve_all(&root, section.paths),
        exclude: resolve_all(&root, section.exclude),
        exclude_files: resolve_all(&root, section.exclude_files),
        exclude_regex: non_empty(section.exclude_regex),
        extensions: section.extensions.unwrap_or_default(),
        no_status_check,
        export,
        template,
        root,
    })
}
