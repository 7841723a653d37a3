//! Email template rendering with Handlebars.
//!
//! Templates live in one directory as `<name>.hbs`; shared fragments live in
//! its `partials/` subdirectory and are referenced as `{{> name}}`.

use std::path::Path;

use handlebars::Handlebars;
use serde_json::{Map, Value};

use crate::error::MailError;

const TEMPLATE_EXTENSION: &str = "hbs";

/// Registry of compiled email templates.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Empty engine in strict mode: a context missing a referenced field
    /// fails to render instead of producing a blank.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        Self { handlebars }
    }

    /// Load every `*.hbs` file in `dir` plus the partials under `dir/partials`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, MailError> {
        let dir = dir.as_ref();
        let mut engine = Self::new();

        let partials = dir.join("partials");
        if partials.is_dir() {
            for (name, source) in read_templates(&partials)? {
                engine
                    .handlebars
                    .register_partial(&name, source)
                    .map_err(|e| MailError::Load(format!("partial {}: {}", name, e)))?;
            }
        }

        for (name, source) in read_templates(dir)? {
            engine.register(&name, &source)?;
        }

        tracing::info!(
            dir = %dir.display(),
            templates = engine.handlebars.get_templates().len(),
            "Email templates loaded"
        );
        Ok(engine)
    }

    /// Compile `source` under `name`, replacing any previous template.
    pub fn register(&mut self, name: &str, source: &str) -> Result<(), MailError> {
        self.handlebars
            .register_template_string(name, source)
            .map_err(|e| MailError::Load(format!("template {}: {}", name, e)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlebars.has_template(name)
    }

    pub fn render(&self, name: &str, context: &Map<String, Value>) -> Result<String, MailError> {
        if !self.contains(name) {
            return Err(MailError::UnknownTemplate(name.to_string()));
        }
        self.handlebars
            .render(name, context)
            .map_err(|e| MailError::Render(format!("{}: {}", name, e)))
    }
}

/// `(stem, contents)` for every template file directly inside `dir`.
fn read_templates(dir: &Path) -> Result<Vec<(String, String)>, MailError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| MailError::Load(format!("{}: {}", dir.display(), e)))?;

    let mut templates = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| MailError::Load(format!("{}: {}", dir.display(), e)))?
            .path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != TEMPLATE_EXTENSION) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let source = std::fs::read_to_string(&path)
            .map_err(|e| MailError::Load(format!("{}: {}", path.display(), e)))?;
        templates.push((name.to_string(), source));
    }
    Ok(templates)
}
