//! Module loader.
//!
//! Reads a root `.bloch` file, resolves its imports against sibling files,
//! and merges everything into a single [`Program`] with exactly one `main`.
//! Imported modules contribute classes and functions only; top-level
//! statements and `main` stay in the root file.

mod error;

pub use error::LoadError;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::lexer::Lexer;
use crate::parser::{ast::Program, Parser};

pub fn load_program(path: impl AsRef<Path>) -> Result<Program, LoadError> {
    let path = path.as_ref().to_path_buf();
    let mut loading = HashSet::new();
    let mut loaded = HashSet::new();

    let mut program = load_file(&path, true, &mut loading, &mut loaded)?;

    let main_count = program.functions.iter().filter(|f| f.name == "main").count();
    if main_count == 0 {
        return Err(LoadError::NoMain { path });
    }
    if main_count > 1 {
        return Err(LoadError::MultipleMains { path });
    }
    if let Some(main) = program.main() {
        if !main.parameters.is_empty() {
            return Err(LoadError::Language {
                path,
                error: crate::error::SemanticError {
                    message: "main takes no parameters".into(),
                    position: main.position,
                }
                .into(),
            });
        }
    }

    Ok(program)
}

fn load_file(
    path: &PathBuf,
    is_root: bool,
    loading: &mut HashSet<PathBuf>,
    loaded: &mut HashSet<PathBuf>,
) -> Result<Program, LoadError> {
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.clone());
    if !loading.insert(canonical.clone()) {
        return Err(LoadError::ImportCycle { path: path.clone() });
    }

    debug!("loading module {}", path.display());
    let source = fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let tokens = Lexer::new(&source)
        .lex()
        .map_err(|e| LoadError::Language {
            path: path.clone(),
            error: e.into(),
        })?;
    let mut program = Parser::new(tokens)
        .parse()
        .map_err(|e| LoadError::Language {
            path: path.clone(),
            error: e.into(),
        })?;

    if !is_root {
        let has_main = program.functions.iter().any(|f| f.name == "main");
        if !program.statements.is_empty() || has_main {
            return Err(LoadError::ImportedTopLevel { path: path.clone() });
        }
    }

    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let imports = std::mem::take(&mut program.imports);
    for import in imports {
        let import_path = resolve_import(&base_dir, &import.path);
        let import_canonical = fs::canonicalize(&import_path).unwrap_or_else(|_| import_path.clone());
        if loaded.contains(&import_canonical) {
            continue;
        }

        let imported = load_file(&import_path, false, loading, loaded)?;
        program.classes.extend(imported.classes);
        program.functions.extend(imported.functions);
        loaded.insert(import_canonical);
    }

    loading.remove(&canonical);
    loaded.insert(canonical);
    Ok(program)
}

/// `import a.b;` resolves to `a/b.bloch` relative to the importing file.
fn resolve_import(base_dir: &Path, dotted: &str) -> PathBuf {
    let mut path = base_dir.to_path_buf();
    let segments: Vec<&str> = dotted.split('.').collect();
    for segment in &segments[..segments.len() - 1] {
        path.push(segment);
    }
    path.push(format!("{}.bloch", segments[segments.len() - 1]));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "main.bloch", "function main() -> void { }");

        let program = load_program(&path).unwrap();
        assert_eq!(program.functions.len(), 1);
    }

    #[test]
    fn test_load_merges_imports() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "util.bloch",
            "function twice(int x) -> int { return x * 2; }",
        );
        let path = write_file(
            dir.path(),
            "main.bloch",
            "import util; function main() -> void { echo twice(4); }",
        );

        let program = load_program(&path).unwrap();
        assert_eq!(program.functions.len(), 2);
        assert!(program.imports.is_empty());
    }

    #[test]
    fn test_missing_main_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "lib.bloch", "function f() -> void { }");

        assert!(matches!(
            load_program(&path),
            Err(LoadError::NoMain { .. })
        ));
    }

    #[test]
    fn test_imported_main_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "other.bloch", "function main() -> void { }");
        let path = write_file(
            dir.path(),
            "main.bloch",
            "import other; function main() -> void { }",
        );

        assert!(matches!(
            load_program(&path),
            Err(LoadError::ImportedTopLevel { .. })
        ));
    }

    #[test]
    fn test_import_cycle_detected() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.bloch", "import b; class A { constructor() -> A { } }");
        write_file(dir.path(), "b.bloch", "import a; class B { constructor() -> B { } }");
        let path = write_file(
            dir.path(),
            "main.bloch",
            "import a; function main() -> void { }",
        );

        assert!(matches!(
            load_program(&path),
            Err(LoadError::ImportCycle { .. })
        ));
    }

    #[test]
    fn test_shots_spec_survives_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "main.bloch",
            "@shots(512) function main() -> void { }",
        );

        let program = load_program(&path).unwrap();
        assert!(program.shots.annotated);
        assert_eq!(program.shots.count, 512);
    }
}
