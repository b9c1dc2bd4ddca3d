use std::fs;
use std::path::PathBuf;

use log::info;
use regex_lite::Regex;
use serde::Serialize;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::error::JobError;
use crate::WorkingDirectory;

/// A `cluster-<name>.sh` to be written next to `script-<name>.py`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wrapper {
    pub name: String,
    pub path: PathBuf,
}

/// Rendering context for a python wrapper
#[derive(Serialize)]
struct WrapperContext<'a> {
    header: &'a str,
    name: &'a str,
}

/// Wrappers for every `script-<name>.py` in the job root, sorted by name
pub fn plan(wd: &WorkingDirectory) -> Result<Vec<Wrapper>, JobError> {
    let pattern = Regex::new(r"^script-([\w-]+)\.py$").map_err(|e| JobError::Template {
        name: "wrapper".to_string(),
        message: e.to_string(),
    })?;
    let mut wrappers = Vec::new();
    for entry in fs::read_dir(&wd.path).map_err(JobError::io(&wd.path))? {
        let entry = entry.map_err(JobError::io(&wd.path))?;
        let file_name = entry.file_name();
        let Some(captures) = file_name.to_str().and_then(|n| pattern.captures(n)) else {
            continue;
        };
        let name = captures[1].to_string();
        wrappers.push(Wrapper {
            path: wd.join(format!("cluster-{name}.sh")),
            name,
        });
    }
    wrappers.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wrappers)
}

/// Render a wrapper script using TinyTemplate
pub fn render(header: &str, name: &str) -> Result<String, JobError> {
    /// included wrapper template
    static WRAPPER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/python-wrapper.txt"));
    let template_error = |e: tinytemplate::error::Error| JobError::Template {
        name: "wrapper".to_string(),
        message: e.to_string(),
    };
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template("wrapper", WRAPPER).map_err(template_error)?;
    let context = WrapperContext { header, name };
    tt.render("wrapper", &context).map_err(template_error)
}

pub fn write(wrappers: &[Wrapper], header: &str) -> Result<Vec<PathBuf>, JobError> {
    let mut written = Vec::with_capacity(wrappers.len());
    for wrapper in wrappers {
        let content = render(header, &wrapper.name)?;
        fs::write(&wrapper.path, content).map_err(JobError::io(&wrapper.path))?;
        info!("Wrote {}", wrapper.path.display());
        written.push(wrapper.path.clone());
    }
    Ok(written)
}
