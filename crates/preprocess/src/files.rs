use anyhow::Context;
use std::path::{Path, PathBuf};

/// All files directly under `dir` whose extension is one of `extensions`
/// (case-insensitive, without the dot), sorted by path.
pub fn sorted_files(dir: &Path, extensions: &[&str]) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let dir_str = dir
        .to_str()
        .with_context(|| format!("Non UTF-8 directory path: {}", dir.display()))?;
    // Only the file name is a wildcard; brackets or stars in the directory are literal.
    let pattern = format!("{}/*", glob::Pattern::escape(dir_str));

    let mut files = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if matches {
            files.push(path);
        }
    }
    files.sort();

    tracing::debug!(dir = %dir.display(), count = files.len(), "Listed files");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_matching_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.JPEG", "c.png", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.jpg")).unwrap();

        let files = sorted_files(dir.path(), &["jpg", "jpeg"]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.JPEG", "b.jpg"]);
    }

    #[test]
    fn wildcard_characters_in_the_directory_are_literal() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("val[1]*?");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("a.png"), b"x").unwrap();
        // Would match `val[1]*?` as a pattern.
        let decoy = root.path().join("val1xy");
        std::fs::create_dir(&decoy).unwrap();
        std::fs::write(decoy.join("b.png"), b"x").unwrap();

        let files = sorted_files(&dir, &["png"]).unwrap();
        assert_eq!(files, vec![dir.join("a.png")]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sorted_files(&dir.path().join("nope"), &["jpg"]).is_err());
    }
}
