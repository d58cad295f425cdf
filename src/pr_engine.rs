//! Multi-file patch assembly against a content-addressed tree service
//! (a git-over-HTTP API shaped like GitHub's contents/git-data surface):
//! input normalization, pre-write diff-size sanity checks, and an
//! idempotent branch/commit/PR sequence.

use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::AgentError;

/// Content-addressed identity check used to skip committing a file whose
/// proposed content is byte-identical to what is already on the base
/// branch, independent of how that content was encoded in transit.
fn content_digest(content: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}

#[derive(Debug, Clone)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct PrRequest {
    pub repo: String,
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
    pub files: Vec<FileEdit>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFileEdit {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    content: String,
}

/// Accepts the tool-call args shape the LLM actually produces: `files`
/// may already be an array, or may arrive as a JSON-encoded string (a
/// common LLM malformation); each entry may key its path as `path` or
/// `filename`.
pub fn normalize_files(args: &HashMap<String, Value>) -> Result<Vec<FileEdit>, String> {
    let files_value = args.get("files").ok_or("missing required argument 'files'")?;

    let raw_array = match files_value {
        Value::Array(items) => items.clone(),
        Value::String(encoded) => {
            let parsed: Value = serde_json::from_str(encoded).map_err(|e| format!("'files' string is not valid JSON: {e}"))?;
            parsed.as_array().cloned().ok_or("'files' string did not decode to a JSON array")?
        }
        _ => return Err("'files' must be an array or a JSON-encoded array string".to_string()),
    };

    if raw_array.is_empty() {
        return Err("'files' must be a non-empty array".to_string());
    }

    let mut edits = Vec::with_capacity(raw_array.len());
    for item in raw_array {
        let raw: RawFileEdit = serde_json::from_value(item).map_err(|e| format!("invalid file entry: {e}"))?;
        let path = raw.path.or(raw.filename).ok_or("file entry missing both 'path' and 'filename'")?;
        let content = maybe_unescape(&raw.content);
        edits.push(FileEdit { path, content });
    }
    Ok(edits)
}

/// If `content` looks like it carries literal `\n`/`\t` escape sequences
/// instead of real control characters — either no real newline is
/// present at all, or literal escapes outnumber real ones — unescape
/// `\n`→LF and `\t`→TAB globally. Otherwise the content is preserved
/// bit-exact, since a real diff may legitimately contain the two-byte
/// sequence `\` followed by `n`.
fn maybe_unescape(content: &str) -> String {
    let literal_newlines = content.matches("\\n").count();
    let real_newlines = content.matches('\n').count();
    let looks_escaped = real_newlines == 0 && literal_newlines > 0 || literal_newlines > real_newlines;
    if !looks_escaped {
        return content.to_string();
    }
    content.replace("\\n", "\n").replace("\\t", "\t")
}

#[derive(Debug)]
pub struct ValidationFailure {
    pub message: String,
}

/// Pre-write sanity check against an existing blob: rejects content that
/// looks like a "snippet only" replacement that would silently delete
/// the surrounding file. New files (no `existing_content`) always pass.
pub fn validate_replacement(path: &str, existing_content: Option<&str>, new_content: &str) -> Result<(), ValidationFailure> {
    let Some(existing) = existing_content else {
        return Ok(());
    };

    let old_size = existing.len();
    let new_size = new_content.len();

    if old_size > 50 && (new_size as f64) < 0.3 * (old_size as f64) {
        let preview: String = existing.chars().take(300).collect();
        return Err(ValidationFailure {
            message: format!(
                "VALIDATION FAILED for {path}: new content ({new_size} bytes) is less than 30% of the existing \
                 file ({old_size} bytes). This looks like a snippet that would delete the surrounding code. \
                 Original preview:\n{preview}"
            ),
        });
    }

    if looks_like_function_snippet_missing_imports(existing, new_content) {
        let preview: String = existing.chars().take(300).collect();
        return Err(ValidationFailure {
            message: format!(
                "VALIDATION FAILED for {path}: new content starts with a function definition but omits imports \
                 present in the original file. Original preview:\n{preview}"
            ),
        });
    }

    Ok(())
}

const FUNCTION_DEFINITION_TOKENS: [&str; 5] = ["def ", "fn ", "function ", "class ", "public "];
const IMPORT_TOKENS: [&str; 4] = ["import ", "from ", "use ", "require("];

fn looks_like_function_snippet_missing_imports(existing: &str, new_content: &str) -> bool {
    let trimmed_new = new_content.trim_start();
    let starts_with_definition = FUNCTION_DEFINITION_TOKENS.iter().any(|t| trimmed_new.starts_with(t));
    if !starts_with_definition {
        return false;
    }
    let original_has_imports = IMPORT_TOKENS.iter().any(|t| existing.contains(t));
    let new_has_imports = IMPORT_TOKENS.iter().any(|t| new_content.contains(t));
    original_has_imports && !new_has_imports
}

/// Minimal client for the content-addressed tree/commit/PR surface the
/// engine drives. Implemented against a GitHub-shaped REST API; any
/// service exposing the same contents/git-data/pulls endpoints works.
pub struct TreeServiceClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl TreeServiceClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, "https://api.github.com".to_string())
    }

    /// Points the client at a different tree service base URL — a
    /// GitHub Enterprise instance, or (in tests) a local stand-in server.
    pub fn with_base_url(token: String, base_url: String) -> Self {
        Self { client: reqwest::Client::new(), base_url, token }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.token)).header("User-Agent", "incident-agent")
    }

    async fn get_json(&self, path: &str) -> Result<(u16, Value), AgentError> {
        let response = self
            .authed(self.client.get(format!("{}{}", self.base_url, path)))
            .send()
            .await
            .map_err(|e| AgentError::PrEngine(format!("GET {path} failed: {e}")))?;
        let status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<(u16, Value), AgentError> {
        let response = self
            .authed(self.client.post(format!("{}{}", self.base_url, path)))
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::PrEngine(format!("POST {path} failed: {e}")))?;
        let status = response.status().as_u16();
        let parsed: Value = response.json().await.unwrap_or(Value::Null);
        Ok((status, parsed))
    }

    async fn patch_json(&self, path: &str, body: &Value) -> Result<(u16, Value), AgentError> {
        let response = self
            .authed(self.client.patch(format!("{}{}", self.base_url, path)))
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::PrEngine(format!("PATCH {path} failed: {e}")))?;
        let status = response.status().as_u16();
        let parsed: Value = response.json().await.unwrap_or(Value::Null);
        Ok((status, parsed))
    }

    async fn fetch_blob_size(&self, repo: &str, path: &str, ref_name: &str) -> Result<Option<usize>, AgentError> {
        let (status, body) = self.get_json(&format!("/repos/{repo}/contents/{path}?ref={ref_name}")).await?;
        if status == 404 {
            return Ok(None);
        }
        Ok(body.get("size").and_then(Value::as_u64).map(|n| n as usize))
    }

    async fn fetch_blob_content(&self, repo: &str, path: &str, ref_name: &str) -> Result<Option<String>, AgentError> {
        let (status, body) = self.get_json(&format!("/repos/{repo}/contents/{path}?ref={ref_name}")).await?;
        if status == 404 {
            return Ok(None);
        }
        let encoded = body.get("content").and_then(Value::as_str).unwrap_or("").replace('\n', "");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| AgentError::PrEngine(format!("failed to decode existing blob: {e}")))?;
        Ok(Some(String::from_utf8_lossy(&decoded).to_string()))
    }

    async fn resolve_ref_sha(&self, repo: &str, branch: &str) -> Result<String, AgentError> {
        let (status, body) = self.get_json(&format!("/repos/{repo}/git/ref/heads/{branch}")).await?;
        if status != 200 {
            return Err(AgentError::PrEngine(format!("could not resolve branch '{branch}': {body}")));
        }
        body.get("object")
            .and_then(|o| o.get("sha"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::PrEngine("ref response missing object.sha".to_string()))
    }

    async fn fetch_tree_sha(&self, repo: &str, commit_sha: &str) -> Result<String, AgentError> {
        let (status, body) = self.get_json(&format!("/repos/{repo}/git/commits/{commit_sha}")).await?;
        if status != 200 {
            return Err(AgentError::PrEngine(format!("could not fetch commit '{commit_sha}': {body}")));
        }
        body.get("tree")
            .and_then(|t| t.get("sha"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::PrEngine("commit response missing tree.sha".to_string()))
    }

    async fn create_ref(&self, repo: &str, head: &str, sha: &str) -> Result<(), AgentError> {
        let (status, body) = self
            .post_json(&format!("/repos/{repo}/git/refs"), &serde_json::json!({"ref": format!("refs/heads/{head}"), "sha": sha}))
            .await?;
        if status == 201 {
            return Ok(());
        }
        let already_exists = body.get("message").and_then(Value::as_str).unwrap_or("").contains("already exists");
        if already_exists {
            let (update_status, update_body) = self
                .patch_json(&format!("/repos/{repo}/git/refs/heads/{head}"), &serde_json::json!({"sha": sha, "force": true}))
                .await?;
            if update_status == 200 {
                return Ok(());
            }
            return Err(AgentError::PrEngine(format!("failed to force-reset branch '{head}': {update_body}")));
        }
        Err(AgentError::PrEngine(format!("failed to create branch '{head}': {body}")))
    }

    async fn create_blob(&self, repo: &str, content: &str) -> Result<String, AgentError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(content.as_bytes());
        let (status, body) = self
            .post_json(&format!("/repos/{repo}/git/blobs"), &serde_json::json!({"content": encoded, "encoding": "base64"}))
            .await?;
        if status != 201 {
            return Err(AgentError::PrEngine(format!("failed to create blob: {body}")));
        }
        body.get("sha").and_then(Value::as_str).map(str::to_string).ok_or_else(|| AgentError::PrEngine("blob response missing sha".to_string()))
    }

    async fn create_tree(&self, repo: &str, base_tree: &str, entries: Vec<Value>) -> Result<String, AgentError> {
        let (status, body) = self
            .post_json(&format!("/repos/{repo}/git/trees"), &serde_json::json!({"base_tree": base_tree, "tree": entries}))
            .await?;
        if status != 201 {
            return Err(AgentError::PrEngine(format!("failed to create tree: {body}")));
        }
        body.get("sha").and_then(Value::as_str).map(str::to_string).ok_or_else(|| AgentError::PrEngine("tree response missing sha".to_string()))
    }

    async fn create_commit(&self, repo: &str, tree_sha: &str, parent_sha: &str, message: &str) -> Result<String, AgentError> {
        let (status, body) = self
            .post_json(
                &format!("/repos/{repo}/git/commits"),
                &serde_json::json!({"message": message, "tree": tree_sha, "parents": [parent_sha]}),
            )
            .await?;
        if status != 201 {
            return Err(AgentError::PrEngine(format!("failed to create commit: {body}")));
        }
        body.get("sha").and_then(Value::as_str).map(str::to_string).ok_or_else(|| AgentError::PrEngine("commit response missing sha".to_string()))
    }

    async fn update_ref(&self, repo: &str, head: &str, commit_sha: &str) -> Result<(), AgentError> {
        let (status, body) = self
            .patch_json(&format!("/repos/{repo}/git/refs/heads/{head}"), &serde_json::json!({"sha": commit_sha}))
            .await?;
        if status != 200 {
            return Err(AgentError::PrEngine(format!("failed to update branch '{head}': {body}")));
        }
        Ok(())
    }

    async fn create_or_update_pr(&self, request: &PrRequest) -> Result<(u64, bool), AgentError> {
        let (status, body) = self
            .post_json(
                &format!("/repos/{}/pulls", request.repo),
                &serde_json::json!({
                    "title": request.title,
                    "body": request.body,
                    "base": request.base,
                    "head": request.head,
                    "draft": true,
                }),
            )
            .await?;
        if status == 201 {
            let number = body.get("number").and_then(Value::as_u64).ok_or_else(|| AgentError::PrEngine("pr response missing number".to_string()))?;
            return Ok((number, true));
        }

        let message = body.get("errors").map(|e| e.to_string()).unwrap_or_default();
        if !message.contains("A pull request already exists") && !body.to_string().contains("already exists") {
            return Err(AgentError::PrEngine(format!("failed to create pull request: {body}")));
        }

        let (list_status, list_body) = self
            .get_json(&format!("/repos/{}/pulls?head={}:{}&base={}", request.repo, request.repo.split('/').next().unwrap_or(""), request.head, request.base))
            .await?;
        if list_status != 200 {
            return Err(AgentError::PrEngine(format!("failed to locate existing pull request: {list_body}")));
        }
        let existing = list_body
            .as_array()
            .and_then(|arr| arr.first())
            .ok_or_else(|| AgentError::PrEngine("no existing open pull request found for head/base".to_string()))?;
        let number = existing.get("number").and_then(Value::as_u64).ok_or_else(|| AgentError::PrEngine("existing pr missing number".to_string()))?;

        self.patch_json(
            &format!("/repos/{}/pulls/{number}", request.repo),
            &serde_json::json!({"title": request.title, "body": request.body}),
        )
        .await?;

        Ok((number, false))
    }
}

#[derive(Debug)]
pub struct PrOutcome {
    pub pr_number: u64,
    pub created: bool,
}

/// Runs the full commit protocol: resolve base, force-reset-or-create
/// head, fan the blob creation out in parallel, build tree+commit, move
/// the branch, then create-or-update the draft PR.
pub async fn compose_pull_request(client: &TreeServiceClient, request: &PrRequest) -> Result<PrOutcome, AgentError> {
    if request.files.is_empty() {
        return Err(AgentError::PrEngine("'files' must be a non-empty array".to_string()));
    }

    let mut changed_files = Vec::with_capacity(request.files.len());
    for file in &request.files {
        let existing = client.fetch_blob_content(&request.repo, &file.path, &request.base).await?;
        if let Some(existing_content) = &existing {
            validate_replacement(&file.path, Some(existing_content), &file.content)
                .map_err(|failure| AgentError::PrEngine(failure.message))?;
            if content_digest(existing_content) == content_digest(&file.content) {
                continue;
            }
        }
        changed_files.push(file);
    }

    if changed_files.is_empty() {
        return Err(AgentError::PrEngine(
            "no file in 'files' differs from the current content of the base branch; nothing to commit".to_string(),
        ));
    }

    let base_sha = client.resolve_ref_sha(&request.repo, &request.base).await?;
    client.create_ref(&request.repo, &request.head, &base_sha).await?;
    let base_tree_sha = client.fetch_tree_sha(&request.repo, &base_sha).await?;

    let blob_futures = changed_files.iter().map(|file| async move {
        let sha = client.create_blob(&request.repo, &file.content).await?;
        Ok::<Value, AgentError>(serde_json::json!({"path": file.path, "mode": "100644", "type": "blob", "sha": sha}))
    });
    let tree_entries: Vec<Value> = futures::future::join_all(blob_futures).await.into_iter().collect::<Result<_, _>>()?;

    let tree_sha = client.create_tree(&request.repo, &base_tree_sha, tree_entries).await?;
    let commit_sha = client.create_commit(&request.repo, &tree_sha, &base_sha, &request.title).await?;
    client.update_ref(&request.repo, &request.head, &commit_sha).await?;

    let (pr_number, created) = client.create_or_update_pr(request).await?;
    Ok(PrOutcome { pr_number, created })
}

/// Checks whether a PR-creation tool call and a prior read-tool call in
/// the same turn target the same repository. A looser substring match —
/// tool names containing "pr"/"pull_request" vs. "read"/"get_file" — is
/// used deliberately rather than a stricter resource-identity check, so
/// that write tools never slip through alongside an unread result.
pub fn targets_same_repo(write_args: &HashMap<String, Value>, read_args: &HashMap<String, Value>) -> bool {
    let write_repo = write_args.get("repo").and_then(Value::as_str);
    let read_repo = read_args.get("repo").and_then(Value::as_str);
    matches!((write_repo, read_repo), (Some(a), Some(b)) if a == b)
}

pub fn looks_like_pr_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("pr") || lower.contains("pull_request")
}

pub fn looks_like_read_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("read") || lower.contains("get_file")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_array_of_files_with_path_key() {
        let mut args = HashMap::new();
        args.insert("files".to_string(), json!([{"path": "a.rs", "content": "fn main() {}"}]));
        let edits = normalize_files(&args).unwrap();
        assert_eq!(edits[0].path, "a.rs");
    }

    #[test]
    fn normalizes_string_encoded_files_array() {
        let mut args = HashMap::new();
        args.insert("files".to_string(), Value::String(r#"[{"filename": "b.rs", "content": "x"}]"#.to_string()));
        let edits = normalize_files(&args).unwrap();
        assert_eq!(edits[0].path, "b.rs");
    }

    #[test]
    fn content_digest_is_stable_and_distinguishes_different_content() {
        assert_eq!(content_digest("same"), content_digest("same"));
        assert_ne!(content_digest("same"), content_digest("different"));
    }

    #[test]
    fn empty_files_array_is_rejected() {
        let mut args = HashMap::new();
        args.insert("files".to_string(), json!([]));
        let err = normalize_files(&args).unwrap_err();
        assert!(err.contains("non-empty array"));
    }

    #[test]
    fn unescapes_literal_newlines_when_no_real_newlines_present() {
        let content = maybe_unescape("line one\\nline two\\ttabbed");
        assert_eq!(content, "line one\nline two\ttabbed");
    }

    #[test]
    fn preserves_content_with_real_newlines_bit_exact() {
        let content = maybe_unescape("line one\nline two with a literal \\n in a string");
        assert_eq!(content, "line one\nline two with a literal \\n in a string");
    }

    #[test]
    fn rejects_snippet_that_shrinks_file_too_much() {
        let existing = "x".repeat(1_200);
        let result = validate_replacement("src/calc.py", Some(&existing), &"y".repeat(200));
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("VALIDATION FAILED"));
    }

    #[test]
    fn accepts_comparable_size_replacement() {
        let existing = "x".repeat(1_200);
        let result = validate_replacement("src/calc.py", Some(&existing), &"y".repeat(900));
        assert!(result.is_ok());
    }

    #[test]
    fn new_file_skips_validation() {
        let result = validate_replacement("src/new.py", None, "def f(): pass");
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_function_snippet_missing_original_imports() {
        let existing = "import os\n\ndef compute(x):\n    return os.path.join(x, 'a')\n";
        let new_content = "def compute(x):\n    return x\n";
        let result = validate_replacement("src/calc.py", Some(existing), new_content);
        assert!(result.is_err());
    }

    #[test]
    fn same_turn_filter_matches_on_repo_argument() {
        let mut write_args = HashMap::new();
        write_args.insert("repo".to_string(), json!("acme/incidents"));
        let mut read_args = HashMap::new();
        read_args.insert("repo".to_string(), json!("acme/incidents"));
        assert!(targets_same_repo(&write_args, &read_args));
    }

    #[test]
    fn same_turn_filter_does_not_match_different_repos() {
        let mut write_args = HashMap::new();
        write_args.insert("repo".to_string(), json!("acme/incidents"));
        let mut read_args = HashMap::new();
        read_args.insert("repo".to_string(), json!("acme/other"));
        assert!(!targets_same_repo(&write_args, &read_args));
    }

    #[test]
    fn pr_and_read_tool_name_heuristics() {
        assert!(looks_like_pr_tool("github_create_draft_pr"));
        assert!(looks_like_read_tool("github_get_file"));
        assert!(!looks_like_pr_tool("cloudwatch_query_logs"));
    }
}
