//! The SQL analysis agent: a multi-turn loop where the model answers a
//! question by calling database tools.
//!
//! Each run sends the conversation to the model, executes any tool calls,
//! appends their results, and repeats until the model replies without
//! calling a tool or the turn limit is hit.

pub mod tools;

use crate::config::AgentSettings;
use crate::database::SqlBackend;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatModel, Usage};
use crate::session::SessionStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Anything that can answer a question within a session.
#[async_trait]
pub trait QueryAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, input: &str, session_id: &str) -> Result<RunOutput>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunOutput {
    pub content: String,
    pub model: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: String,
    pub is_error: bool,
}

pub struct SqlAgent {
    settings: AgentSettings,
    model: Box<dyn ChatModel>,
    backend: Arc<dyn SqlBackend>,
    sessions: Option<Arc<SessionStore>>,
}

impl SqlAgent {
    pub fn new(
        settings: AgentSettings,
        model: Box<dyn ChatModel>,
        backend: Arc<dyn SqlBackend>,
        sessions: Option<Arc<SessionStore>>,
    ) -> Self {
        Self {
            settings,
            model,
            backend,
            sessions,
        }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = format!("You are {}.\n\n## Instructions\n", self.settings.name);
        for line in &self.settings.instructions {
            prompt.push_str("- ");
            prompt.push_str(line);
            prompt.push('\n');
        }
        prompt.push_str("\nFormat your answers using markdown.\n");
        if self.settings.add_datetime_to_context {
            prompt.push_str(&format!(
                "\nThe current date and time is {}.\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        prompt
    }

    /// Seed the conversation: system prompt, recent history, then the question.
    fn initial_messages(&self, input: &str, session_id: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.system_prompt())];

        if let Some(store) = &self.sessions {
            match store.recent_runs(session_id, self.settings.num_history_runs) {
                Ok(runs) => {
                    debug!(session = session_id, runs = runs.len(), "loaded history");
                    for run in runs {
                        messages.push(ChatMessage::user(run.input));
                        messages.push(ChatMessage::assistant(run.output));
                    }
                }
                Err(e) => warn!(error = %e, "failed to load session history"),
            }
        }

        messages.push(ChatMessage::user(input));
        messages
    }
}

#[async_trait]
impl QueryAgent for SqlAgent {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn run(&self, input: &str, session_id: &str) -> Result<RunOutput> {
        let tools = tools::tool_definitions();
        let mut messages = self.initial_messages(input, session_id);
        let mut output = RunOutput {
            model: self.model.model().to_string(),
            ..RunOutput::default()
        };
        let mut last_text: Option<String> = None;
        let mut finished = false;

        info!(
            session = session_id,
            model = self.model.model(),
            max_turns = self.settings.max_turns,
            "starting agent run"
        );

        for turn in 1..=self.settings.max_turns {
            let response = self.model.chat(&messages, &tools).await?;
            output.usage.add(&response.usage);

            debug!(
                turn,
                tool_calls = response.tool_calls.len(),
                prompt_tokens = response.usage.prompt_tokens,
                "agent turn"
            );

            if let Some(text) = response.content.as_ref().filter(|t| !t.trim().is_empty()) {
                last_text = Some(text.clone());
            }

            let tool_calls = response.tool_calls;
            messages.push(ChatMessage::Assistant {
                content: response.content,
                tool_calls: tool_calls.clone(),
            });

            if tool_calls.is_empty() {
                finished = true;
                break;
            }

            for call in &tool_calls {
                let (result, is_error) = tools::dispatch(
                    self.backend.as_ref(),
                    &call.function.name,
                    &call.function.arguments,
                    self.settings.max_rows,
                )
                .await;
                if is_error {
                    debug!(tool = %call.function.name, error = %result, "tool returned error");
                }
                output.tool_calls.push(ToolInvocation {
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                    is_error,
                });
                messages.push(ChatMessage::Tool {
                    tool_call_id: call.id.clone(),
                    content: result,
                });
            }
        }

        if !finished {
            warn!(max_turns = self.settings.max_turns, "hit max turns limit");
        }
        output.content = last_text.ok_or_else(|| {
            Error::query(format!(
                "agent stopped after {} turns without an answer",
                self.settings.max_turns
            ))
        })?;

        if let Some(store) = &self.sessions {
            store.record_run(session_id, input, &output.content)?;
        }

        info!(
            session = session_id,
            tool_calls = output.tool_calls.len(),
            prompt_tokens = output.usage.prompt_tokens,
            completion_tokens = output.usage.completion_tokens,
            "agent run complete"
        );
        Ok(output)
    }
}
