//! Repository label derivation from session metadata
//!
//! Sessions are grouped by repository. The label comes from, in order:
//!
//! 1. git metadata or a repository URL in the metadata line
//!    (`git.repo`, `git.repository_url`, `repository_url`, `source.repository_url`, ...)
//! 2. the session's working directory
//!
//! URLs collapse to `owner/repo`. Labels that are purely numeric are treated
//! as unknown.

use crate::ingest::parse_json_line;
use crate::ingest::JsonLine;
use serde::Serialize;
use serde_json::{Map, Value};

/// Git details attached to a repository label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Result of deriving repository information for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_meta: Option<RepoMetadata>,
    /// Trimmed working directory, used to locate instruction files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,
}

/// Folder names that describe layout rather than the project.
const GENERIC_DIRS: [&str; 3] = ["src", "source", "lib"];

/// Derive repository details from the raw text of a metadata line.
pub fn derive_repo_details_from_line(line: &str) -> RepoDetails {
    match parse_json_line(line) {
        JsonLine::Value(value) => derive_repo_details(&value),
        _ => RepoDetails::default(),
    }
}

/// Derive repository details from a decoded metadata line.
pub fn derive_repo_details(value: &Value) -> RepoDetails {
    let Some(payload) = meta_payload(value) else {
        return RepoDetails::default();
    };

    let git = payload.get("git").and_then(Value::as_object);
    let git_str = |key: &str| -> Option<String> {
        git.and_then(|g| g.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let cwd = payload
        .get("cwd")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let source = payload.get("source").and_then(Value::as_object);
    let url_candidates = [
        git_str("repo"),
        git_str("repository_url"),
        git_str("remote"),
        string_at(payload, "repository_url"),
        string_at(payload, "repositoryUrl"),
        source.and_then(|s| string_at(s, "repository_url")),
        source.and_then(|s| string_at(s, "repositoryUrl")),
        string_at(payload, "repo"),
        string_at(payload, "repoLabel"),
    ];
    let repo_label = url_candidates
        .iter()
        .flatten()
        .filter_map(|candidate| normalize_repository_label(candidate))
        .find(|label| !is_numeric_label(label))
        .or_else(|| {
            cwd.as_deref()
                .and_then(label_from_workspace_path)
                .filter(|label| !is_numeric_label(label))
        });

    let repo_meta = RepoMetadata {
        repo: repo_label.clone(),
        branch: git_str("branch"),
        commit: git_str("commit").or_else(|| git_str("commit_hash")),
        remote: git_str("remote").or_else(|| git_str("repository_url")),
        dirty: git.and_then(|g| g.get("dirty")).and_then(Value::as_bool),
        cwd: cwd.clone(),
    };
    let has_meta = repo_meta != RepoMetadata::default();

    RepoDetails {
        repo_label,
        repo_meta: has_meta.then_some(repo_meta),
        workspace_root: cwd,
    }
}

fn string_at(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// The metadata object inside `record_type: meta` or `type: session_meta` envelopes.
fn meta_payload(value: &Value) -> Option<&Map<String, Value>> {
    let mut obj = value.as_object()?;
    let record_type = obj
        .get("record_type")
        .or_else(|| obj.get("recordType"))
        .and_then(Value::as_str);
    if record_type.is_some_and(|rt| rt.eq_ignore_ascii_case("meta")) {
        if let Some(inner) = ["record", "data", "payload"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_object))
        {
            obj = inner;
        }
    }
    let is_session_meta = obj
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case("session_meta"));
    if is_session_meta {
        if let Some(inner) = ["payload", "data", "record"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_object))
        {
            obj = inner;
        }
    }
    Some(obj)
}

fn is_numeric_label(label: &str) -> bool {
    let name = label.rsplit('/').next().unwrap_or(label);
    !name.is_empty() && name.chars().all(|c| c.is_ascii_digit())
}

/// Normalize a remote URL, ssh remote or path into `owner/repo` (or `repo`).
pub fn normalize_repository_label(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let suffix_at = trimmed.len().saturating_sub(4);
    let without_suffix = match trimmed.get(suffix_at..) {
        Some(suffix) if suffix.eq_ignore_ascii_case(".git") => &trimmed[..suffix_at],
        _ => trimmed,
    };

    let converted;
    let cleaned = match ssh_parts(without_suffix) {
        Some((host, path)) => {
            converted = format!("https://{host}/{path}");
            converted.as_str()
        }
        None => without_suffix,
    };

    let path = match cleaned.split_once("://") {
        Some((_, rest)) => rest.split('?').next().unwrap_or(""),
        None => cleaned,
    };

    let mut segments: Vec<&str> = path
        .trim_start_matches('/')
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();

    let repo = segments.pop()?.trim();
    if repo.is_empty() {
        return None;
    }
    let owner = segments
        .pop()
        .map(|o| o.trim_end_matches([':', '@']).trim())
        .filter(|o| !o.is_empty());

    Some(match owner {
        Some(owner) => format!("{owner}/{repo}"),
        None => repo.to_string(),
    })
}

/// `git@host:path` → `(host, path)`.
fn ssh_parts(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix("git@")?;
    let (host, path) = rest.split_once(':')?;
    (!host.is_empty() && !path.is_empty()).then_some((host, path))
}

/// Label from a working directory: the deepest folder that is not a generic
/// source directory, or the last folder when every one is generic.
pub fn label_from_workspace_path(path: &str) -> Option<String> {
    let normalized = path.trim().replace('\\', "/");
    let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    let last = *segments.last()?;
    let meaningful = segments
        .iter()
        .rev()
        .find(|segment| !GENERIC_DIRS.contains(&segment.to_ascii_lowercase().as_str()))
        .unwrap_or(&last);
    Some(meaningful.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta_line(payload: Value) -> String {
        json!({
            "type": "session_meta",
            "timestamp": "2025-01-01T00:00:00Z",
            "payload": payload,
        })
        .to_string()
    }

    #[test]
    fn test_label_from_cwd() {
        let details = derive_repo_details_from_line(&meta_line(json!({
            "cwd": "/home/user/projects/temp/codex-session-view"
        })));
        assert_eq!(details.repo_label.as_deref(), Some("codex-session-view"));
        let meta = details.repo_meta.unwrap();
        assert_eq!(meta.repo.as_deref(), Some("codex-session-view"));
        assert_eq!(meta.cwd.as_deref(), Some("/home/user/projects/temp/codex-session-view"));
    }

    #[test]
    fn test_cwd_is_trimmed() {
        let details = derive_repo_details_from_line(&meta_line(json!({"cwd": "  /opt/repos/sample-app  "})));
        assert_eq!(details.workspace_root.as_deref(), Some("/opt/repos/sample-app"));
        assert_eq!(details.repo_meta.unwrap().cwd.as_deref(), Some("/opt/repos/sample-app"));
    }

    #[test]
    fn test_repository_url_wins_over_cwd() {
        let details = derive_repo_details_from_line(&meta_line(json!({
            "repository_url": "https://github.com/owner/sample-repo.git",
            "cwd": "/tmp/random/path"
        })));
        assert_eq!(details.repo_label.as_deref(), Some("owner/sample-repo"));
    }

    #[test]
    fn test_src_folder_uses_parent() {
        let details = derive_repo_details_from_line(&meta_line(json!({
            "cwd": "/home/user/projects/temp/codex-session-viewer/src"
        })));
        assert_eq!(details.repo_label.as_deref(), Some("codex-session-viewer"));
    }

    #[test]
    fn test_nested_source_repository() {
        let details = derive_repo_details_from_line(&meta_line(json!({
            "source": {"repository_url": "https://gitlab.com/example/team/app.git"}
        })));
        assert_eq!(details.repo_label.as_deref(), Some("team/app"));
    }

    #[test]
    fn test_numeric_label_is_unknown() {
        let details = derive_repo_details_from_line(&meta_line(json!({"repoLabel": "0123456789"})));
        assert_eq!(details.repo_label, None);
    }

    #[test]
    fn test_numeric_candidate_falls_through() {
        let details = derive_repo_details_from_line(&meta_line(json!({
            "git": {"repo": "12345"},
            "source": {"repository_url": "https://github.com/acme/widgets.git"}
        })));
        assert_eq!(details.repo_label.as_deref(), Some("acme/widgets"));

        let details = derive_repo_details_from_line(&meta_line(json!({
            "repoLabel": "998877",
            "cwd": "/home/u/widgets"
        })));
        assert_eq!(details.repo_label.as_deref(), Some("widgets"));
    }

    #[test]
    fn test_nested_generic_dirs_walk_up() {
        assert_eq!(
            label_from_workspace_path("/home/u/widgets/src/lib").as_deref(),
            Some("widgets")
        );
        assert_eq!(label_from_workspace_path("/src/lib").as_deref(), Some("lib"));
        assert_eq!(label_from_workspace_path("/"), None);
    }

    #[test]
    fn test_normalize_repository_label() {
        assert_eq!(
            normalize_repository_label("git@github.com:owner/repo.git").as_deref(),
            Some("owner/repo")
        );
        assert_eq!(
            normalize_repository_label("https://github.com/owner/repo?tab=readme").as_deref(),
            Some("owner/repo")
        );
        assert_eq!(normalize_repository_label("solo").as_deref(), Some("solo"));
        assert_eq!(normalize_repository_label("   "), None);
    }

    #[test]
    fn test_not_json_yields_nothing() {
        assert_eq!(derive_repo_details_from_line("{oops"), RepoDetails::default());
    }
}
