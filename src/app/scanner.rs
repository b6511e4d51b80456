use crate::app::error::{PreloadError, Result};
use crate::app::models::{FileRecord, PreloadList};
use ignore::{DirEntry, WalkBuilder};
use indexmap::IndexSet;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Collects the files to preload from explicit entries and scanned roots.
///
/// Every path handed to the generator is resolved against `base` and
/// canonicalized, so exclusion and deduplication compare like with like.
#[derive(Debug)]
pub struct Generator {
    base: PathBuf,
    files: Vec<PathBuf>,
    paths: Vec<PathBuf>,
    exclude_paths: Vec<PathBuf>,
    exclude_regex: Option<Regex>,
    extensions: BTreeSet<String>,
    exclude_files: Vec<PathBuf>,
}

impl Generator {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            files: Vec::new(),
            paths: Vec::new(),
            exclude_paths: Vec::new(),
            exclude_regex: None,
            extensions: BTreeSet::new(),
            exclude_files: Vec::new(),
        }
    }

    /// Registers a file that is included regardless of its extension.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.base.join(path.as_ref());
        let canonical = fs::canonicalize(&path).map_err(|_| PreloadError::InvalidPath {
            path: path.clone(),
            reason: "file does not exist",
        })?;
        if !canonical.is_file() {
            return Err(PreloadError::InvalidPath {
                path,
                reason: "not a regular file",
            });
        }
        self.files.push(canonical);
        Ok(())
    }

    /// Registers a directory to scan recursively.
    pub fn add_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.base.join(path.as_ref());
        let canonical = fs::canonicalize(&path).map_err(|_| PreloadError::InvalidPath {
            path: path.clone(),
            reason: "directory does not exist",
        })?;
        if !canonical.is_dir() {
            return Err(PreloadError::InvalidPath {
                path,
                reason: "not a directory",
            });
        }
        self.paths.push(canonical);
        Ok(())
    }

    pub fn add_exclude_path(&mut self, path: impl AsRef<Path>) {
        let resolved = self.absolutize(path.as_ref());
        self.exclude_paths.push(resolved);
    }

    /// Replaces the exclusion pattern. `None` or an empty pattern disables it.
    pub fn set_exclude_regex(&mut self, pattern: Option<&str>) -> Result<()> {
        self.exclude_regex = match pattern.filter(|p| !p.is_empty()) {
            Some(p) => Some(Regex::new(p).map_err(|e| {
                PreloadError::config(format!(
                    "\"extra.preload.exclude-regex\" is not a valid pattern: {e}"
                ))
            })?),
            None => None,
        };
        Ok(())
    }

    pub fn add_include_extension(&mut self, extension: &str) {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        if !extension.is_empty() {
            self.extensions.insert(extension);
        }
    }

    /// Paths dropped from the final list no matter how they were found.
    pub fn add_exclude_files<I, P>(&mut self, files: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for file in files {
            let resolved = self.absolutize(file.as_ref());
            self.exclude_files.push(resolved);
        }
    }

    /// Runs discovery: explicit files first, then each root in order.
    /// The first insertion of a canonical path wins.
    pub fn list(&self) -> Result<PreloadList> {
        let mut found: IndexSet<FileRecord> = IndexSet::new();

        for file in &self.files {
            if self.is_excluded(file) {
                log::debug!("Skipping excluded file {}", file.display());
                continue;
            }
            found.insert(FileRecord::new(file.clone()));
        }

        for root in &self.paths {
            self.scan_root(root, &mut found)?;
        }

        found.retain(|record| {
            let dropped = self.exclude_files.iter().any(|file| file == record.path());
            if dropped {
                log::debug!("Removed {} from the preload list", record.path().display());
            }
            !dropped
        });

        Ok(found.into_iter().collect())
    }

    /// Walks one root. Symlink loops are skipped; any other traversal
    /// failure aborts the scan.
    fn scan_root(&self, root: &Path, found: &mut IndexSet<FileRecord>) -> Result<()> {
        if self.extensions.is_empty() {
            log::debug!(
                "No extensions configured, nothing to scan in {}",
                root.display()
            );
            return Ok(());
        }

        let prune = self.exclude_paths.clone();
        let failure: Arc<Mutex<Option<PreloadError>>> = Arc::default();
        let filter_failure = Arc::clone(&failure);
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(true)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| match is_pruned(entry, &prune) {
                Ok(pruned) => !pruned,
                Err(err) => {
                    if let Ok(mut slot) = filter_failure.lock() {
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                    }
                    false
                }
            })
            .build();

        for result in walker {
            if let Some(err) = take_failure(&failure) {
                return Err(err);
            }
            match result {
                Ok(entry) => {
                    if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                        continue;
                    }
                    if let Some(record) = self.process_entry(entry.path())? {
                        log::trace!("Found {}", record.path().display());
                        found.insert(record);
                    }
                }
                Err(err) if is_loop(&err) => log::warn!("Skipping symlink loop: {}", err),
                Err(err) => return Err(walk_error(root, err)),
            }
        }

        match take_failure(&failure) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves a scanned file, then applies the extension whitelist and the
    /// exclusion rules to its canonical path.
    fn process_entry(&self, path: &Path) -> Result<Option<FileRecord>> {
        let canonical = fs::canonicalize(path).map_err(|e| PreloadError::io(path, e))?;
        let record = FileRecord::new(canonical);

        let allowed = record
            .extension()
            .is_some_and(|ext| self.extensions.contains(&ext));
        if !allowed || self.is_excluded(record.path()) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.exclude_paths.iter().any(|prefix| path.starts_with(prefix)) {
            return true;
        }
        self.exclude_regex
            .as_ref()
            .is_some_and(|re| re.is_match(&path.to_string_lossy()))
    }

    /// Canonical form when the path exists, lexical absolute form otherwise.
    fn absolutize(&self, path: &Path) -> PathBuf {
        let joined = self.base.join(path);
        fs::canonicalize(&joined).unwrap_or_else(|_| normalize(&joined))
    }
}

fn is_pruned(entry: &DirEntry, prefixes: &[PathBuf]) -> Result<bool> {
    if prefixes.is_empty() || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
        return Ok(false);
    }
    let dir = fs::canonicalize(entry.path()).map_err(|e| PreloadError::io(entry.path(), e))?;
    Ok(prefixes.iter().any(|prefix| dir.starts_with(prefix)))
}

fn take_failure(slot: &Mutex<Option<PreloadError>>) -> Option<PreloadError> {
    slot.lock().ok().and_then(|mut failure| failure.take())
}

fn is_loop(err: &ignore::Error) -> bool {
    match err {
        ignore::Error::Loop { .. } => true,
        ignore::Error::WithPath { err, .. }
        | ignore::Error::WithDepth { err, .. }
        | ignore::Error::WithLineNumber { err, .. } => is_loop(err),
        ignore::Error::Partial(errs) => errs.iter().any(is_loop),
        _ => false,
    }
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        _ => None,
    }
}

fn walk_error(root: &Path, err: ignore::Error) -> PreloadError {
    let path = error_path(&err).unwrap_or(root).to_path_buf();
    let message = err.to_string();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, message));
    PreloadError::io(path, source)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "<?php\n").unwrap();
        fs::canonicalize(&path).unwrap()
    }

    fn fixture() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        (temp, root)
    }

    fn paths(list: &PreloadList) -> Vec<PathBuf> {
        list.iter().map(|r| r.path().to_path_buf()).collect()
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let (_temp, root) = fixture();
        let a = touch(&root, "src/a.php");
        touch(&root, "src/b.txt");
        let c = touch(&root, "src/c.PHP");

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension("php");

        assert_eq!(paths(&generator.list().unwrap()), vec![a, c]);
    }

    #[test]
    fn test_extension_with_leading_dot() {
        let (_temp, root) = fixture();
        let a = touch(&root, "src/a.inc");

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension(".INC");

        assert_eq!(paths(&generator.list().unwrap()), vec![a]);
    }

    #[test]
    fn test_no_extensions_scans_nothing_but_keeps_explicit_files() {
        let (_temp, root) = fixture();
        touch(&root, "src/a.php");
        let boot = touch(&root, "bootstrap.txt");

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_file("bootstrap.txt").unwrap();

        assert_eq!(paths(&generator.list().unwrap()), vec![boot]);
    }

    #[test]
    fn test_traversal_is_sorted_depth_first() {
        let (_temp, root) = fixture();
        let c = touch(&root, "src/c.php");
        let b = touch(&root, "src/b.php");
        let z = touch(&root, "src/a/z.php");

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension("php");

        let first = paths(&generator.list().unwrap());
        assert_eq!(first, vec![z, b, c]);
        assert_eq!(first, paths(&generator.list().unwrap()));
    }

    #[test]
    fn test_exclude_prefix_is_component_wise() {
        let (_temp, root) = fixture();
        touch(&root, "src/Test/a.php");
        let kept = touch(&root, "src/Tests/b.php");

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension("php");
        generator.add_exclude_path("src/Test");

        assert_eq!(paths(&generator.list().unwrap()), vec![kept]);
    }

    #[test]
    fn test_exclude_prefix_applies_to_explicit_files() {
        let (_temp, root) = fixture();
        touch(&root, "vendor/autoload.php");

        let mut generator = Generator::new(&root);
        generator.add_file("vendor/autoload.php").unwrap();
        generator.add_exclude_path("vendor");

        assert!(generator.list().unwrap().is_empty());
    }

    #[test]
    fn test_exclude_regex_applies_to_explicit_files() {
        let (_temp, root) = fixture();
        touch(&root, "config/bootstrap_test.php");
        let kept = touch(&root, "config/bootstrap.php");

        let mut generator = Generator::new(&root);
        generator.add_file("config/bootstrap_test.php").unwrap();
        generator.add_file("config/bootstrap.php").unwrap();
        generator.set_exclude_regex(Some(r"_test\.php$")).unwrap();

        assert_eq!(paths(&generator.list().unwrap()), vec![kept]);
    }

    #[test]
    fn test_missing_exclude_path_is_harmless() {
        let (_temp, root) = fixture();
        let a = touch(&root, "src/a.php");

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension("php");
        generator.add_exclude_path("does/not/../exist");

        assert_eq!(paths(&generator.list().unwrap()), vec![a]);
    }

    #[test]
    fn test_exclude_regex_matches_canonical_path() {
        let (_temp, root) = fixture();
        let kept = touch(&root, "src/Service.php");
        touch(&root, "src/ServiceTest.php");

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension("php");
        generator.set_exclude_regex(Some(r"Test\.php$")).unwrap();

        assert_eq!(paths(&generator.list().unwrap()), vec![kept]);
    }

    #[test]
    fn test_empty_regex_disables_exclusion() {
        let (_temp, root) = fixture();
        let a = touch(&root, "src/a.php");

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension("php");
        generator.set_exclude_regex(Some("a")).unwrap();
        generator.set_exclude_regex(Some("")).unwrap();

        assert_eq!(paths(&generator.list().unwrap()), vec![a]);
    }

    #[test]
    fn test_invalid_regex_is_configuration_error() {
        let mut generator = Generator::new("/");
        let err = generator.set_exclude_regex(Some("(unclosed")).unwrap_err();
        assert!(matches!(err, PreloadError::Configuration(_)));
    }

    #[test]
    fn test_exclude_files_removes_scanned_entry() {
        let (_temp, root) = fixture();
        let a = touch(&root, "src/a.php");
        touch(&root, "src/b.php");

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension("php");
        generator.add_exclude_files(["src/./b.php"]);

        assert_eq!(paths(&generator.list().unwrap()), vec![a]);
    }

    #[test]
    fn test_explicit_file_found_by_scan_appears_once_in_first_position() {
        let (_temp, root) = fixture();
        let a = touch(&root, "src/a.php");
        let b = touch(&root, "src/b.php");

        let mut generator = Generator::new(&root);
        generator.add_file("src/b.php").unwrap();
        generator.add_path("src").unwrap();
        generator.add_path("src/../src").unwrap();
        generator.add_include_extension("php");

        assert_eq!(paths(&generator.list().unwrap()), vec![b, a]);
    }

    #[test]
    fn test_missing_root_is_invalid_path() {
        let (_temp, root) = fixture();
        let mut generator = Generator::new(&root);

        let err = generator.add_path("missing").unwrap_err();
        assert!(matches!(err, PreloadError::InvalidPath { .. }));
    }

    #[test]
    fn test_wrong_kinds_are_invalid_paths() {
        let (_temp, root) = fixture();
        touch(&root, "src/a.php");
        let mut generator = Generator::new(&root);

        assert!(matches!(
            generator.add_path("src/a.php"),
            Err(PreloadError::InvalidPath { .. })
        ));
        assert!(matches!(
            generator.add_file("src"),
            Err(PreloadError::InvalidPath { .. })
        ));
        assert!(matches!(
            generator.add_file("src/missing.php"),
            Err(PreloadError::InvalidPath { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_terminates() {
        let (_temp, root) = fixture();
        let a = touch(&root, "src/a.php");
        std::os::unix::fs::symlink(root.join("src"), root.join("src/loop")).unwrap();

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension("php");

        assert_eq!(paths(&generator.list().unwrap()), vec![a]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_is_recorded_and_filtered_by_target() {
        let (_temp, root) = fixture();
        let real = touch(&root, "lib/real.php");
        let secret = touch(&root, "secret.txt");
        fs::create_dir_all(root.join("src")).unwrap();
        std::os::unix::fs::symlink(&real, root.join("src/alias.php")).unwrap();
        std::os::unix::fs::symlink(&secret, root.join("src/b.php")).unwrap();

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_path("lib").unwrap();
        generator.add_include_extension("php");

        assert_eq!(paths(&generator.list().unwrap()), vec![real]);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_aborts_scan() {
        let (_temp, root) = fixture();
        touch(&root, "src/a.php");
        std::os::unix::fs::symlink(root.join("nowhere"), root.join("src/b.php")).unwrap();

        let mut generator = Generator::new(&root);
        generator.add_path("src").unwrap();
        generator.add_include_extension("php");

        assert!(matches!(generator.list(), Err(PreloadError::Io { .. })));
    }

    #[test]
    fn test_normalize_resolves_dots() {
        assert_eq!(
            normalize(Path::new("/app/./src/../vendor")),
            PathBuf::from("/app/vendor")
        );
    }
}
