// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Task decomposition: ask a designated model to split a free-text request
//! into a dependency DAG of subtasks.
//!
//! The model is instructed to answer with a single JSON object.  If the
//! reply does not parse, one repair round is attempted with the parse error
//! embedded; a second failure is a hard error.  Cycles are rejected rather
//! than repaired — a model that produces a cyclic plan will produce another.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use freja_model::{CompletionRequest, Message, ModelProvider, ResponseEvent};

use crate::{PlanError, SubTask, SubTaskKind, SubTaskStatus, TaskPlan};

const DECOMPOSE_SYSTEM_PROMPT: &str = "\
You are a planning assistant for a team of software engineering agents. \
Split the user's task into concrete subtasks that can be executed \
independently where possible. Answer with a single JSON object and nothing \
else, using exactly this shape:

{
  \"summary\": \"one-line plan summary\",
  \"subtasks\": [
    {
      \"id\": \"short-stable-id\",
      \"title\": \"imperative title\",
      \"description\": \"everything the executing agent needs to know\",
      \"type\": \"code|test|research|refactor|docs\",
      \"dependencies\": [\"ids of subtasks that must finish first\"],
      \"estimated_minutes\": 15
    }
  ],
  \"recommended_agent_count\": 2,
  \"risk_assessment\": \"one short paragraph\"
}

Dependencies must form a DAG. Keep subtasks coarse enough that each is a \
meaningful unit of work for one agent.";

/// The raw shape the model is asked to produce.
#[derive(Debug, Deserialize)]
struct RawPlan {
    summary: String,
    subtasks: Vec<RawSubTask>,
    #[serde(default)]
    recommended_agent_count: i64,
    #[serde(default)]
    risk_assessment: String,
}

#[derive(Debug, Deserialize)]
struct RawSubTask {
    id: String,
    title: String,
    description: String,
    #[serde(rename = "type")]
    kind: SubTaskKind,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    estimated_minutes: u32,
}

/// Decompose `request` into a validated [`TaskPlan`].
pub async fn decompose(
    model: &dyn ModelProvider,
    request: &str,
    codebase_hints: Option<&str>,
) -> anyhow::Result<TaskPlan> {
    let mut user = String::from(request);
    if let Some(hints) = codebase_hints {
        user.push_str("\n\nCodebase context:\n");
        user.push_str(hints);
    }

    let first = complete_text(model, &[
        Message::system(DECOMPOSE_SYSTEM_PROMPT),
        Message::user(user.clone()),
    ])
    .await?;

    let raw = match parse_raw_plan(&first) {
        Ok(raw) => raw,
        Err(parse_err) => {
            warn!(error = %parse_err, "decomposition was not valid JSON; retrying with repair prompt");
            let repair = format!(
                "Your previous answer could not be parsed as JSON ({parse_err}). \
                 Respond again with ONLY the corrected JSON object, no prose, \
                 no code fences."
            );
            let second = complete_text(model, &[
                Message::system(DECOMPOSE_SYSTEM_PROMPT),
                Message::user(user),
                Message::assistant(first),
                Message::user(repair),
            ])
            .await?;
            parse_raw_plan(&second)
                .map_err(|e| PlanError::InvalidDecomposition(e.to_string()))?
        }
    };

    let plan = build_plan(request, raw)?;
    plan.validate()?;
    debug!(
        subtasks = plan.subtasks.len(),
        agents = plan.recommended_agent_count,
        "decomposition accepted"
    );
    Ok(plan)
}

async fn complete_text(model: &dyn ModelProvider, messages: &[Message]) -> anyhow::Result<String> {
    let events = model
        .complete_buffered(CompletionRequest {
            messages: messages.to_vec(),
            tools: vec![],
            stream: false,
        })
        .await?;
    let mut text = String::new();
    for ev in events {
        if let ResponseEvent::ContentDelta(t) = ev {
            text.push_str(&t);
        }
    }
    Ok(text)
}

fn parse_raw_plan(text: &str) -> anyhow::Result<RawPlan> {
    let body = strip_code_fences(text);
    let raw: RawPlan = serde_json::from_str(body.trim())?;
    if raw.subtasks.is_empty() {
        anyhow::bail!("plan contains no subtasks");
    }
    Ok(raw)
}

/// Models often wrap JSON in a ```json fence despite instructions.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") up to the first newline.
    let rest = rest.split_once('\n').map(|(_, r)| r).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest)
}

fn build_plan(request: &str, raw: RawPlan) -> Result<TaskPlan, PlanError> {
    // Normalise ids to be unique: a colliding id gets a numeric suffix, and
    // dependency references keep pointing at the *first* occurrence.
    let mut seen: HashSet<String> = HashSet::new();
    let mut subtasks = Vec::with_capacity(raw.subtasks.len());
    for rs in raw.subtasks {
        let mut id = rs.id.clone();
        let mut n = 2;
        while !seen.insert(id.clone()) {
            id = format!("{}-{n}", rs.id);
            n += 1;
        }
        subtasks.push(SubTask {
            id,
            title: rs.title,
            description: rs.description,
            kind: rs.kind,
            dependencies: rs.dependencies,
            estimated_minutes: rs.estimated_minutes,
            status: SubTaskStatus::Pending,
            assigned_agent_id: None,
            result_summary: None,
        });
    }

    Ok(TaskPlan {
        task_id: Uuid::new_v4().to_string(),
        original_request: request.to_string(),
        summary: raw.summary,
        recommended_agent_count: (raw.recommended_agent_count.max(1) as usize).min(8),
        risk_assessment: raw.risk_assessment,
        subtasks,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
