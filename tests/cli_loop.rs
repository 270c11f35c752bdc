use async_trait::async_trait;
use parking_lot::Mutex;
use sql_agent::agent::{QueryAgent, RunOutput};
use sql_agent::auth::{Credential, StaticCredential};
use sql_agent::cli::run_repl;
use sql_agent::manager::{AgentBuilder, AgentManager};
use sql_agent::{Error, Result};
use std::io::Cursor;
use std::sync::Arc;

/// Records every query it receives; fails on "fail".
#[derive(Default)]
struct RecordingAgent {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl QueryAgent for RecordingAgent {
    fn name(&self) -> &str {
        "SQL Assistant"
    }

    async fn run(&self, input: &str, _session_id: &str) -> Result<RunOutput> {
        self.seen.lock().push(input.to_string());
        if input == "fail" {
            return Err(Error::query("connection reset"));
        }
        Ok(RunOutput {
            content: format!("**{input}**"),
            ..RunOutput::default()
        })
    }
}

struct SharedBuilder(Arc<RecordingAgent>);

impl AgentBuilder for SharedBuilder {
    fn build(&self, _credential: &Credential) -> Result<Arc<dyn QueryAgent>> {
        Ok(self.0.clone())
    }
}

async fn run_session(input: &str) -> (String, Vec<String>) {
    let agent = Arc::new(RecordingAgent::default());
    let manager = AgentManager::new(
        Arc::new(StaticCredential),
        Arc::new(SharedBuilder(agent.clone())),
    )
    .await
    .unwrap();

    let mut out = Vec::new();
    run_repl(&manager, "cli-session", Cursor::new(input.to_string()), &mut out)
        .await
        .unwrap();
    let seen = agent.seen.lock().clone();
    (String::from_utf8(out).unwrap(), seen)
}

#[tokio::test]
async fn banner_is_printed_first() {
    let (out, _) = run_session("exit\n").await;
    let rule = "=".repeat(60);
    assert!(out.starts_with(&format!(
        "{rule}\nSQL Server Agent Interactive CLI\n{rule}\n\nType 'exit' to quit\n"
    )));
}

#[tokio::test]
async fn exit_words_end_the_loop_without_forwarding() {
    for word in ["exit", "EXIT", "quit", "Quit", "q", "  q  "] {
        let (out, seen) = run_session(&format!("{word}\nafter\n")).await;
        assert!(seen.is_empty(), "{word} was forwarded");
        assert!(out.ends_with("\nGoodbye!\n"), "{word}: {out}");
    }
}

#[tokio::test]
async fn blank_lines_are_ignored() {
    let (_, seen) = run_session("\n   \nlist tables\nexit\n").await;
    assert_eq!(seen, ["list tables"]);
}

#[tokio::test]
async fn answers_are_rendered_after_agent_header() {
    let (out, _) = run_session("top customers\nq\n").await;
    assert!(out.contains("You: \nAgent:\ntop customers\n"));
    assert!(!out.contains("**"));
}

#[tokio::test]
async fn end_of_input_ends_the_loop() {
    let (out, seen) = run_session("one\ntwo").await;
    assert_eq!(seen, ["one", "two"]);
    assert!(!out.contains("Goodbye!"));
}

#[tokio::test]
async fn errors_are_printed_and_loop_continues() {
    let (out, seen) = run_session("fail\nnext\nexit\n").await;
    assert_eq!(seen, ["fail", "next"]);
    assert!(out.contains("Error: Query error: connection reset"));
    assert!(out.contains("Agent:\nnext\n"));
}
