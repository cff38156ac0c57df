use std::path::{Path, PathBuf};

use log::warn;

use crate::lang::value::Value;

/// Global holding the path templates searched by `use`.
pub const PATHS: &str = "__paths";

/// Global holding the canonical path of every script already imported.
pub const IMPORTS: &str = "__imports";

pub fn default_paths() -> Value {
    Value::new_array(vec![
        Value::string("<parent>/<path>.hm"),
        Value::string("./<path>.hm"),
        Value::string("./modules/<path>.hm"),
    ])
}

/// Expands every template in `paths` and returns the first existing file.
///
/// On failure returns every candidate that was tried.
pub fn resolve(paths: &Value, parent: Option<&Path>, target: &str) -> Result<PathBuf, Vec<String>> {
    let parent = match parent.map(|p| p.to_string_lossy().into_owned()) {
        Some(p) if !p.is_empty() => p,
        _ => ".".to_string(),
    };
    let templates: Vec<String> = match paths {
        Value::Array(items) => items
            .borrow()
            .iter()
            .filter_map(|t| match t {
                Value::String(s) => Some(s.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut tried = Vec::new();
    for template in templates {
        let candidate = template.replace("<parent>", &parent).replace("<path>", target);
        let path = PathBuf::from(&candidate);
        if path.is_file() {
            return Ok(canonical(path));
        }
        tried.push(candidate);
    }
    Err(tried)
}

fn canonical(path: PathBuf) -> PathBuf {
    match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(e) => {
            warn!("could not canonicalize {}: {}", path.display(), e);
            path
        }
    }
}

/// True when `key` is already listed in the imports array.
pub fn already_imported(imports: &Value, key: &str) -> bool {
    match imports {
        Value::Array(items) => items
            .borrow()
            .iter()
            .any(|item| matches!(item, Value::String(s) if &**s == key)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolves_relative_to_parent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("util.hm"), "let x = 1").unwrap();

        let found = resolve(&default_paths(), Some(dir.path()), "util").unwrap();
        assert_eq!(found, dir.path().join("util.hm").canonicalize().unwrap());
    }

    #[test]
    fn test_reports_tried_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let tried = resolve(&default_paths(), Some(dir.path()), "missing").unwrap_err();
        assert_eq!(tried.len(), 3);
        assert!(tried[0].ends_with("missing.hm"));
        assert_eq!(tried[1], "./missing.hm");
        assert_eq!(tried[2], "./modules/missing.hm");
    }

    #[test]
    fn test_custom_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib").join("m.hm"), "").unwrap();

        let paths = Value::new_array(vec![Value::string("<parent>/lib/<path>.hm")]);
        assert!(resolve(&paths, Some(dir.path()), "m").is_ok());
        assert!(resolve(&paths, Some(dir.path()), "n").is_err());
    }

    #[test]
    fn test_already_imported() {
        let imports = Value::new_array(vec![Value::string("/a/b.hm")]);
        assert!(already_imported(&imports, "/a/b.hm"));
        assert!(!already_imported(&imports, "/a/c.hm"));
        assert!(!already_imported(&Value::None, "/a/b.hm"));
    }
}
