use crate::app::error::{PreloadError, Result};
use crate::app::models::PreloadList;
use std::fs;
use std::path::{Path, PathBuf};

/// Token in a template that is replaced with the compile statements.
pub const PLACEHOLDER: &str = "[:opcode:]";

const STATUS_CHECK_TEMPLATE: &str = include_str!("../../templates/default.php");
const BARE_TEMPLATE: &str = include_str!("../../templates/no-status-check.php");

/// Built-in layout, with or without the opcache availability guards.
pub fn builtin_template(status_check: bool) -> &'static str {
    if status_check {
        STATUS_CHECK_TEMPLATE
    } else {
        BARE_TEMPLATE
    }
}

/// Renders a [`PreloadList`] into a PHP script that primes the opcache.
pub struct PreloadWriter {
    list: PreloadList,
    count: Option<usize>,
}

impl PreloadWriter {
    pub fn new(list: PreloadList) -> Self {
        Self { list, count: None }
    }

    fn compile_statement(path: &Path) -> String {
        format!(
            "opcache_compile_file('{}');\n",
            escape(&path.to_string_lossy())
        )
    }

    /// One statement per record, in list order.
    pub fn script(&mut self) -> String {
        let mut script = String::new();
        for record in &self.list {
            script.push_str(&Self::compile_statement(record.path()));
        }
        self.count = Some(self.list.len());
        script
    }

    pub fn render(&mut self, template: &str) -> String {
        if !template.contains(PLACEHOLDER) {
            log::warn!(
                "Template has no {} placeholder; no files will be compiled",
                PLACEHOLDER
            );
        }
        let script = self.script();
        template.replace(PLACEHOLDER, &script)
    }

    /// Reads the template at `template` and writes the rendered script to `output`.
    pub fn write(&mut self, output: &Path, template: &Path) -> Result<()> {
        let layout =
            fs::read_to_string(template).map_err(|e| PreloadError::io(template, e))?;
        self.write_template(output, &layout)
    }

    pub fn write_template(&mut self, output: &Path, template: &str) -> Result<()> {
        let rendered = self.render(template);
        write_file(output, &rendered)
    }

    /// Number of statements rendered by the last render pass.
    pub fn count(&self) -> Result<usize> {
        self.count.ok_or(PreloadError::State(
            "File count is not available until the list has been rendered",
        ))
    }
}

/// Backslash-escapes quotes and backslashes so the path is a safe
/// single-quoted PHP literal.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' | '\'' | '"' => {
                out.push('\\');
                out.push(c);
            }
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out
}

/// Writes to a sibling temporary file, then renames it over `path`.
fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PreloadError::io(parent, e))?;
    }

    let staging = staging_path(path);
    fs::write(&staging, content).map_err(|e| PreloadError::io(&staging, e))?;
    fs::rename(&staging, path).map_err(|e| {
        let _ = fs::remove_file(&staging);
        PreloadError::io(path, e)
    })
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}
