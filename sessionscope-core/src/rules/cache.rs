//! Instruction-file discovery and the per-repository rules cache
//!
//! [`RulesCache`] is an explicit object owned by the caller; there is no
//! process-wide instance. Entries are keyed by the repository root and stay
//! until [`RulesCache::clear`] drops them, which callers do whenever the
//! session they are looking at binds to a different repository.
//!
//! Within one root, instruction files with identical bytes are the same rule
//! source. The first path seen (discovery order is sorted) is canonical, later
//! copies are reported as duplicates and not parsed again. Roots never mark
//! each other's files as duplicates, so a root's rules do not depend on what
//! was loaded before it.

use super::parser::{parse_agent_rules, unique_id};
use crate::config::RulesConfig;
use crate::error::{Error, Result};
use crate::types::AgentRule;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Outcome of a content-hash duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCheck {
    /// Hex SHA-256 of the file content
    pub hash: String,
    pub is_duplicate: bool,
    /// Canonical path holding the same content, when `is_duplicate`
    pub existing_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    canonical: PathBuf,
    paths: Vec<PathBuf>,
}

/// Content-hash index of instruction files.
#[derive(Debug, Default, Clone)]
pub struct InstructionIndex {
    by_hash: HashMap<String, IndexEntry>,
}

impl InstructionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` with `bytes` and report whether another path already
    /// holds the same content.
    ///
    /// Re-checking the canonical path is never a duplicate.
    pub fn check(&mut self, path: &Path, bytes: &[u8]) -> DuplicateCheck {
        let hash = content_hash(bytes);
        let entry = self
            .by_hash
            .entry(hash.clone())
            .or_insert_with(|| IndexEntry {
                canonical: path.to_path_buf(),
                paths: Vec::new(),
            });
        if !entry.paths.iter().any(|p| p == path) {
            entry.paths.push(path.to_path_buf());
        }

        let is_duplicate = entry.canonical != path;
        DuplicateCheck {
            hash,
            is_duplicate,
            existing_path: is_duplicate.then(|| entry.canonical.clone()),
        }
    }

    /// Every path registered with the given content hash.
    pub fn paths_for(&self, hash: &str) -> &[PathBuf] {
        self.by_hash
            .get(hash)
            .map(|e| e.paths.as_slice())
            .unwrap_or(&[])
    }

    /// Drop every path under `prefix`. A hash whose canonical path goes
    /// away is re-anchored on its next remaining path.
    pub fn forget_under(&mut self, prefix: &Path) {
        self.by_hash.retain(|_, entry| {
            entry.paths.retain(|p| !p.starts_with(prefix));
            match entry.paths.first() {
                Some(first) => {
                    if entry.canonical.starts_with(prefix) {
                        entry.canonical = first.clone();
                    }
                    true
                }
                None => false,
            }
        });
    }

    pub fn clear(&mut self) {
        self.by_hash.clear();
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

/// Hex SHA-256 of instruction file content.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// One discovered instruction file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionFile {
    pub path: PathBuf,
    pub hash: String,
    /// Set when the content matched an earlier file
    pub duplicate_of: Option<PathBuf>,
    pub rule_count: usize,
}

/// Rules loaded for one repository root.
#[derive(Debug, Clone)]
pub struct LoadedRules {
    pub root: PathBuf,
    pub rules: Vec<AgentRule>,
    pub files: Vec<InstructionFile>,
}

/// Rules per repository root, loaded on first use.
#[derive(Debug, Default)]
pub struct RulesCache {
    config: RulesConfig,
    entries: HashMap<String, LoadedRules>,
    index: InstructionIndex,
}

impl RulesCache {
    pub fn new(config: RulesConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            index: InstructionIndex::new(),
        }
    }

    /// Rules for `root`, discovering and parsing instruction files on a miss.
    pub fn load(&mut self, root: &Path) -> Result<&LoadedRules> {
        let key = cache_key(root);
        if !self.entries.contains_key(&key) {
            let loaded = self.discover(root)?;
            tracing::info!(
                root = %root.display(),
                files = loaded.files.len(),
                rules = loaded.rules.len(),
                "Loaded agent rules"
            );
            self.entries.insert(key.clone(), loaded);
        }
        self.entries
            .get(&key)
            .ok_or_else(|| Error::Config(format!("rules for {} were not cached", root.display())))
    }

    /// Cached rules for `root`, without loading.
    pub fn get(&self, root: &Path) -> Option<&LoadedRules> {
        self.entries.get(&cache_key(root))
    }

    /// Drop the entry for one root, or everything when `root` is `None`.
    pub fn clear(&mut self, root: Option<&Path>) {
        match root {
            Some(root) => {
                if self.entries.remove(&cache_key(root)).is_some() {
                    tracing::debug!(root = %root.display(), "Cleared cached rules");
                }
                self.index.forget_under(root);
            }
            None => {
                self.entries.clear();
                self.index.clear();
            }
        }
    }

    /// Check an instruction file against every file seen so far, across roots.
    ///
    /// Unreadable files are reported as unique rather than failing.
    pub fn check_duplicate_file(&mut self, path: &Path) -> DuplicateCheck {
        match std::fs::read(path) {
            Ok(bytes) => self.index.check(path, &bytes),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Instruction file unreadable");
                DuplicateCheck {
                    hash: String::new(),
                    is_duplicate: false,
                    existing_path: None,
                }
            }
        }
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    fn discover(&mut self, root: &Path) -> Result<LoadedRules> {
        let paths = discover_instruction_files(root, &self.config)?;

        let mut rules: Vec<AgentRule> = Vec::new();
        let mut files = Vec::with_capacity(paths.len());
        let mut taken_ids: HashSet<String> = HashSet::new();
        let mut root_index = InstructionIndex::new();

        for path in paths {
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable instruction file");
                    continue;
                }
            };
            self.index.check(&path, &bytes);
            let check = root_index.check(&path, &bytes);
            if check.is_duplicate {
                tracing::debug!(
                    path = %path.display(),
                    existing = ?check.existing_path,
                    "Skipping duplicate instruction file"
                );
                files.push(InstructionFile {
                    path,
                    hash: check.hash,
                    duplicate_of: check.existing_path,
                    rule_count: 0,
                });
                continue;
            }

            let text = String::from_utf8_lossy(&bytes);
            let source = path.to_string_lossy();
            let mut parsed = parse_agent_rules(&text, Some(&source));
            for rule in &mut parsed {
                rule.id = unique_id(&rule.id, &mut taken_ids);
            }
            files.push(InstructionFile {
                path,
                hash: check.hash,
                duplicate_of: None,
                rule_count: parsed.len(),
            });
            rules.extend(parsed);
        }

        Ok(LoadedRules {
            root: root.to_path_buf(),
            rules,
            files,
        })
    }
}

/// Sorted, de-duplicated instruction file paths under `root`.
pub fn discover_instruction_files(root: &Path, config: &RulesConfig) -> Result<Vec<PathBuf>> {
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let mut found: Vec<PathBuf> = Vec::new();

    for pattern in &config.patterns {
        let full_pattern = format!("{}/{}", escaped_root.trim_end_matches('/'), pattern);
        let entries = glob::glob(&full_pattern)
            .map_err(|e| Error::Config(format!("Invalid rules pattern {:?}: {}", pattern, e)))?;

        for entry in entries.flatten() {
            if entry.is_file() && !is_ignored(root, &entry, &config.ignore) {
                found.push(entry);
            }
        }
    }

    found.sort();
    found.dedup();
    Ok(found)
}

fn is_ignored(root: &Path, path: &Path, ignore: &[String]) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let rel = format!("/{}/", rel.to_string_lossy().replace('\\', "/"));
    ignore
        .iter()
        .map(|dir| dir.trim_matches('/'))
        .filter(|dir| !dir.is_empty())
        .any(|dir| rel.contains(&format!("/{}/", dir)))
}

fn cache_key(root: &Path) -> String {
    let key = root.to_string_lossy().replace('\\', "/");
    match key.trim_end_matches('/') {
        "" => key,
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_identical_content_is_duplicate() {
        let mut index = InstructionIndex::new();
        let first = index.check(Path::new("/a/AGENTS.md"), b"# Rules\n- be nice\n");
        let second = index.check(Path::new("/b/AGENTS.md"), b"# Rules\n- be nice\n");
        let unique = index.check(Path::new("/c/AGENTS.md"), b"# Other\n");

        assert!(!first.is_duplicate);
        assert!(second.is_duplicate);
        assert_eq!(second.existing_path.as_deref(), Some(Path::new("/a/AGENTS.md")));
        assert_eq!(first.hash, second.hash);
        assert!(!unique.is_duplicate);
        assert_eq!(index.paths_for(&first.hash).len(), 2);
    }

    #[test]
    fn test_recheck_canonical_is_not_duplicate() {
        let mut index = InstructionIndex::new();
        index.check(Path::new("/a/AGENTS.md"), b"x");
        assert!(!index.check(Path::new("/a/AGENTS.md"), b"x").is_duplicate);
    }

    #[test]
    fn test_forget_under_reanchors() {
        let mut index = InstructionIndex::new();
        index.check(Path::new("/a/AGENTS.md"), b"x");
        index.check(Path::new("/b/AGENTS.md"), b"x");
        index.forget_under(Path::new("/a"));
        assert!(!index.check(Path::new("/b/AGENTS.md"), b"x").is_duplicate);

        index.forget_under(Path::new("/b"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_discovery_honours_ignore_list() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "AGENTS.md", "# Root\nbody\n");
        write(dir.path(), "pkg/web/AGENTS.md", "# Web\nweb body\n");
        write(dir.path(), "node_modules/dep/AGENTS.md", "# Dep\ndep body\n");
        write(dir.path(), ".cursor/rules/style.md", "# Style\nstyle body\n");

        let found = discover_instruction_files(dir.path(), &RulesConfig::default()).unwrap();
        let rel: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(rel, vec![".cursor/rules/style.md", "AGENTS.md", "pkg/web/AGENTS.md"]);
    }

    #[test]
    fn test_load_skips_duplicate_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "AGENTS.md", "# Git\n- never `git push --force`\n");
        write(dir.path(), "CLAUDE.md", "# Git\n- never `git push --force`\n");
        write(dir.path(), "pkg/AGENTS.md", "# Git\n- avoid `rm -rf`\n");

        let mut cache = RulesCache::new(RulesConfig::default());
        let loaded = cache.load(dir.path()).unwrap();

        assert_eq!(loaded.files.len(), 3);
        let duplicates: Vec<_> = loaded.files.iter().filter(|f| f.duplicate_of.is_some()).collect();
        assert_eq!(duplicates.len(), 1);
        assert!(duplicates[0].path.ends_with("CLAUDE.md"));

        let ids: Vec<&str> = loaded.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["git", "git-2"]);
    }

    #[test]
    fn test_identical_files_in_other_root_still_load() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        write(&first, "AGENTS.md", "# Git\n- never `git push --force`\n");
        write(&second, "AGENTS.md", "# Git\n- never `git push --force`\n");

        let mut cache = RulesCache::new(RulesConfig::default());
        assert_eq!(cache.load(&first).unwrap().rules.len(), 1);
        let loaded = cache.load(&second).unwrap();
        assert_eq!(loaded.rules.len(), 1);
        assert!(loaded.files[0].duplicate_of.is_none());

        // The cross-root check still sees the shared content
        let check = cache.check_duplicate_file(&second.join("AGENTS.md"));
        assert!(check.is_duplicate);
        assert_eq!(check.existing_path, Some(first.join("AGENTS.md")));
    }

    #[test]
    fn test_cache_hit_and_clear() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "AGENTS.md", "# One\n- first rule\n");

        let mut cache = RulesCache::new(RulesConfig::default());
        assert!(cache.get(dir.path()).is_none());
        assert_eq!(cache.load(dir.path()).unwrap().rules.len(), 1);

        write(dir.path(), "AGENTS.md", "# One\n- first rule\n# Two\n- second rule\n");
        assert_eq!(cache.load(dir.path()).unwrap().rules.len(), 1);

        cache.clear(Some(dir.path()));
        assert!(cache.get(dir.path()).is_none());
        assert_eq!(cache.load(dir.path()).unwrap().rules.len(), 2);

        cache.clear(None);
        assert!(cache.get(dir.path()).is_none());
    }

    #[test]
    fn test_check_duplicate_file() {
        let dir = TempDir::new().unwrap();
        let a = write(dir.path(), "AGENTS.md", "same");
        let b = write(dir.path(), "copy/AGENTS.md", "same");

        let mut cache = RulesCache::new(RulesConfig::default());
        assert!(!cache.check_duplicate_file(&a).is_duplicate);
        let check = cache.check_duplicate_file(&b);
        assert!(check.is_duplicate);
        assert_eq!(check.existing_path.as_deref(), Some(a.as_path()));

        let missing = cache.check_duplicate_file(&dir.path().join("nope.md"));
        assert!(!missing.is_duplicate);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let dir = TempDir::new().unwrap();
        let config = RulesConfig {
            patterns: vec!["[".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            discover_instruction_files(dir.path(), &config),
            Err(Error::Config(_))
        ));
    }
}
