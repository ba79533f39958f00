// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Permission arbitration for side-effectful tools.
//!
//! Every tool carries a [`RiskLevel`](crate::RiskLevel).  `ReadOnly` tools
//! are always permitted and never reach this module.  For everything else
//! the arbiter consults, in order, first match wins:
//!
//! 1. the sandbox-scope flag (nested calls from a sanctioned code runner),
//! 2. the persistent allowlist keyed `(repo_absolute_path, tool_name)`,
//! 3. the in-memory session allowlist,
//! 4. the `auto_approve` config flag,
//! 5. the pluggable user prompt.
//!
//! Concurrent prompts from the same session are serialised through an async
//! mutex so the user never sees interleaved questions.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::RiskLevel;

tokio::task_local! {
    /// Set while execution is inside a sandboxed code-execution tool.  The
    /// sandboxed code is itself already sanctioned, so nested tool calls it
    /// makes are approved without re-prompting.
    static SANDBOX_SCOPE: bool;
}

/// Run `fut` with the sandbox-scope flag set.  The flag is task-local and
/// cleared automatically when the future completes.
pub async fn with_sandbox_scope<F>(fut: F) -> F::Output
where
    F: std::future::Future,
{
    SANDBOX_SCOPE.scope(true, fut).await
}

fn in_sandbox_scope() -> bool {
    SANDBOX_SCOPE.try_with(|v| *v).unwrap_or(false)
}

/// The four answers a user prompt can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    /// Allow and persist for this repository (`A`).
    Always,
    /// Allow for the rest of this session (`S`).
    Session,
    /// Allow this single invocation (`O`).
    Once,
    /// Deny (`N`); the tool call is not executed.
    Deny,
}

/// Pluggable asynchronous user prompt.  Front-ends provide an
/// implementation; headless runs typically configure none and rely on
/// `auto_approve` or the allowlists.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn ask(&self, repo_path: &Path, tool_name: &str, args: &Value) -> PromptOutcome;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
struct GrantEntry {
    repo: String,
    tool: String,
}

fn load_grants(path: &Path) -> HashSet<GrantEntry> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return HashSet::new();
    };
    match serde_yaml::from_str::<Vec<GrantEntry>>(&text) {
        Ok(entries) => entries.into_iter().collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable grants file; starting empty");
            HashSet::new()
        }
    }
}

/// Write the grants file via temp-file + rename so a crash mid-write never
/// leaves a torn file.
fn save_grants(path: &Path, grants: &HashSet<GrantEntry>) -> anyhow::Result<()> {
    let mut entries: Vec<&GrantEntry> = grants.iter().collect();
    entries.sort_by(|a, b| (&a.repo, &a.tool).cmp(&(&b.repo, &b.tool)));
    let text = serde_yaml::to_string(&entries)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Decides whether a risky tool call proceeds.  One instance per session.
pub struct PermissionArbiter {
    repo_path: PathBuf,
    grants_file: Option<PathBuf>,
    persistent: Mutex<HashSet<GrantEntry>>,
    session: Mutex<HashSet<String>>,
    auto_approve: bool,
    require_mcp_approval: bool,
    prompt: Option<Box<dyn PermissionPrompt>>,
    /// Serialises concurrent user prompts from this session.
    prompt_gate: tokio::sync::Mutex<()>,
}

impl PermissionArbiter {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        grants_file: Option<PathBuf>,
        auto_approve: bool,
        require_mcp_approval: bool,
        prompt: Option<Box<dyn PermissionPrompt>>,
    ) -> Self {
        let persistent = grants_file
            .as_deref()
            .map(load_grants)
            .unwrap_or_default();
        Self {
            repo_path: repo_path.into(),
            grants_file,
            persistent: Mutex::new(persistent),
            session: Mutex::new(HashSet::new()),
            auto_approve,
            require_mcp_approval,
            prompt,
            prompt_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Arbiter that approves everything.  Used by orchestration workers and
    /// the job service, where no user is present.
    pub fn auto(repo_path: impl Into<PathBuf>) -> Self {
        Self::new(repo_path, None, true, false, None)
    }

    /// Decide whether the call may proceed.  `ReadOnly` tools are always
    /// permitted without consulting any cache or prompt.
    pub async fn check(&self, tool_name: &str, risk: RiskLevel, args: &Value) -> bool {
        if risk == RiskLevel::ReadOnly {
            return true;
        }

        // 1. Sandbox-scope bypass.
        if in_sandbox_scope() && !self.require_mcp_approval {
            debug!(tool = tool_name, "approved: sandbox scope");
            return true;
        }

        // 2. Persistent allowlist.
        let key = GrantEntry {
            repo: self.repo_path.to_string_lossy().into_owned(),
            tool: tool_name.to_string(),
        };
        if self.persistent.lock().unwrap().contains(&key) {
            debug!(tool = tool_name, "approved: persistent allowlist");
            return true;
        }

        // 3. Session allowlist.
        if self.session.lock().unwrap().contains(tool_name) {
            debug!(tool = tool_name, "approved: session allowlist");
            return true;
        }

        // 4. Auto-approve.
        if self.auto_approve {
            debug!(tool = tool_name, "approved: auto_approve");
            return true;
        }

        // 5. User prompt, serialised per session.
        let Some(prompt) = &self.prompt else {
            warn!(tool = tool_name, "denied: no prompt configured");
            return false;
        };
        let _gate = self.prompt_gate.lock().await;
        match prompt.ask(&self.repo_path, tool_name, args).await {
            PromptOutcome::Always => {
                let mut grants = self.persistent.lock().unwrap();
                grants.insert(key);
                if let Some(path) = &self.grants_file {
                    if let Err(e) = save_grants(path, &grants) {
                        warn!(path = %path.display(), error = %e, "failed to persist grant");
                    }
                }
                true
            }
            PromptOutcome::Session => {
                self.session.lock().unwrap().insert(tool_name.to_string());
                true
            }
            PromptOutcome::Once => true,
            PromptOutcome::Deny => false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    /// Prompt stub that returns a fixed outcome and counts invocations.
    struct FixedPrompt {
        outcome: PromptOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PermissionPrompt for FixedPrompt {
        async fn ask(&self, _repo: &Path, _tool: &str, _args: &Value) -> PromptOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
        }
    }

    fn arbiter_with_prompt(outcome: PromptOutcome) -> (PermissionArbiter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let arb = PermissionArbiter::new(
            "/repo",
            None,
            false,
            false,
            Some(Box::new(FixedPrompt {
                outcome,
                calls: calls.clone(),
            })),
        );
        (arb, calls)
    }

    #[tokio::test]
    async fn read_only_never_prompts() {
        let (arb, calls) = arbiter_with_prompt(PromptOutcome::Deny);
        assert!(arb.check("read_file", RiskLevel::ReadOnly, &json!({})).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deny_refuses_execution() {
        let (arb, calls) = arbiter_with_prompt(PromptOutcome::Deny);
        assert!(!arb.check("write_file", RiskLevel::Write, &json!({})).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn once_allows_but_prompts_again() {
        let (arb, calls) = arbiter_with_prompt(PromptOutcome::Once);
        assert!(arb.check("write_file", RiskLevel::Write, &json!({})).await);
        assert!(arb.check("write_file", RiskLevel::Write, &json!({})).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "Once must not cache");
    }

    #[tokio::test]
    async fn session_grant_caches_for_later_calls() {
        let (arb, calls) = arbiter_with_prompt(PromptOutcome::Session);
        assert!(arb.check("write_file", RiskLevel::Write, &json!({})).await);
        assert!(arb.check("write_file", RiskLevel::Write, &json!({})).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "Session caches in memory");
    }

    #[tokio::test]
    async fn auto_approve_skips_prompt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let arb = PermissionArbiter::new(
            "/repo",
            None,
            true,
            false,
            Some(Box::new(FixedPrompt {
                outcome: PromptOutcome::Deny,
                calls: calls.clone(),
            })),
        );
        assert!(arb.check("run_process", RiskLevel::Write, &json!({})).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_prompt_configured_denies_risky_tools() {
        let arb = PermissionArbiter::new("/repo", None, false, false, None);
        assert!(!arb.check("write_file", RiskLevel::Write, &json!({})).await);
    }

    #[tokio::test]
    async fn always_persists_to_grants_file() {
        let dir = tempfile::tempdir().unwrap();
        let grants_path = dir.path().join("grants.yaml");
        let calls = Arc::new(AtomicUsize::new(0));
        let arb = PermissionArbiter::new(
            "/repo",
            Some(grants_path.clone()),
            false,
            false,
            Some(Box::new(FixedPrompt {
                outcome: PromptOutcome::Always,
                calls: calls.clone(),
            })),
        );
        assert!(arb.check("write_file", RiskLevel::Write, &json!({})).await);
        assert!(grants_path.exists(), "grants file must be written");

        // A fresh arbiter over the same file approves without prompting.
        let calls2 = Arc::new(AtomicUsize::new(0));
        let arb2 = PermissionArbiter::new(
            "/repo",
            Some(grants_path),
            false,
            false,
            Some(Box::new(FixedPrompt {
                outcome: PromptOutcome::Deny,
                calls: calls2.clone(),
            })),
        );
        assert!(arb2.check("write_file", RiskLevel::Write, &json!({})).await);
        assert_eq!(calls2.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn persistent_grant_is_keyed_by_repo_path() {
        let dir = tempfile::tempdir().unwrap();
        let grants_path = dir.path().join("grants.yaml");
        let mut grants = HashSet::new();
        grants.insert(GrantEntry {
            repo: "/other-repo".into(),
            tool: "write_file".into(),
        });
        save_grants(&grants_path, &grants).unwrap();

        let arb = PermissionArbiter::new("/repo", Some(grants_path), false, false, None);
        // Grant is for a different repo — must not apply here.
        assert!(!arb.check("write_file", RiskLevel::Write, &json!({})).await);
    }

    #[tokio::test]
    async fn sandbox_scope_bypasses_prompt() {
        let (arb, calls) = arbiter_with_prompt(PromptOutcome::Deny);
        let allowed =
            with_sandbox_scope(async { arb.check("write_file", RiskLevel::Write, &json!({})).await })
                .await;
        assert!(allowed, "nested calls inside the sandbox must auto-approve");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sandbox_scope_clears_after_future_completes() {
        let (arb, _calls) = arbiter_with_prompt(PromptOutcome::Deny);
        with_sandbox_scope(async {}).await;
        assert!(!arb.check("write_file", RiskLevel::Write, &json!({})).await);
    }

    #[tokio::test]
    async fn require_mcp_approval_disables_bypass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let arb = PermissionArbiter::new(
            "/repo",
            None,
            false,
            true,
            Some(Box::new(FixedPrompt {
                outcome: PromptOutcome::Deny,
                calls: calls.clone(),
            })),
        );
        let allowed =
            with_sandbox_scope(async { arb.check("write_file", RiskLevel::Write, &json!({})).await })
                .await;
        assert!(!allowed);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "prompt must run despite scope");
    }

    /// Prompt that asserts it is never entered concurrently.
    struct OverlapDetectingPrompt {
        active: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PermissionPrompt for OverlapDetectingPrompt {
        async fn ask(&self, _repo: &Path, _tool: &str, _args: &Value) -> PromptOutcome {
            if self.active.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.active.store(false, Ordering::SeqCst);
            PromptOutcome::Once
        }
    }

    #[tokio::test]
    async fn concurrent_prompts_are_serialised() {
        let active = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let arb = Arc::new(PermissionArbiter::new(
            "/repo",
            None,
            false,
            false,
            Some(Box::new(OverlapDetectingPrompt {
                active: active.clone(),
                overlapped: overlapped.clone(),
            })),
        ));

        let a = {
            let arb = arb.clone();
            tokio::spawn(async move { arb.check("t", RiskLevel::Write, &json!({})).await })
        };
        let b = {
            let arb = arb.clone();
            tokio::spawn(async move { arb.check("t", RiskLevel::Write, &json!({})).await })
        };
        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
        assert!(
            !overlapped.load(Ordering::SeqCst),
            "two prompts must never run at the same time"
        );
    }

    #[test]
    fn grants_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.yaml");
        let mut grants = HashSet::new();
        grants.insert(GrantEntry {
            repo: "/a".into(),
            tool: "x".into(),
        });
        grants.insert(GrantEntry {
            repo: "/b".into(),
            tool: "y".into(),
        });
        save_grants(&path, &grants).unwrap();
        let loaded = load_grants(&path);
        assert_eq!(loaded, grants);
    }

    #[test]
    fn corrupt_grants_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.yaml");
        std::fs::write(&path, "{{{{ not yaml").unwrap();
        assert!(load_grants(&path).is_empty());
    }
}
