use serde::Serialize;
use std::fs;
use std::path::Path;
use tera::{Context, Error as TeraError, Tera};

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

/// Read a template file; the path is used exactly as given
pub fn read_template(template_file: impl AsRef<Path>) -> Result<String, TeraError> {
    let path = template_file.as_ref();
    fs::read_to_string(path).map_err(|e| {
        TeraError::chain(format!("Failed to read template file {}", path.display()), e)
    })
}
