//! The optional LLM client a workflow's module context may be configured
//! with, backing the `ai`/`ai_json` scripting API members.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Options recognized by `ai`/`ai_json`.
#[derive(Clone, Debug, Default)]
pub struct LlmOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub system: Option<String>,
}

/// Synchronous completion call, invoked from a workflow's worker thread.
/// Implementations are expected to block the calling thread.
pub trait LlmClient: Send + Sync {
    fn complete(&self, prompt: &str, opts: &LlmOptions) -> anyhow::Result<String>;
}

/// How long `ai`/`ai_json` wait for a completion before giving up on it.
pub const LLM_CALL_DEADLINE: Duration = Duration::from_secs(120);

/// Runs `client.complete` on its own thread and waits up to
/// `LLM_CALL_DEADLINE` for it. A call that never returns leaks its thread;
/// there is no way to interrupt an arbitrary blocking `complete`
/// implementation from the outside, only to stop waiting on it.
pub fn complete_with_deadline(client: Arc<dyn LlmClient>, prompt: String, opts: LlmOptions) -> anyhow::Result<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(client.complete(&prompt, &opts));
    });
    match rx.recv_timeout(LLM_CALL_DEADLINE) {
        Ok(result) => result,
        Err(_) => anyhow::bail!("LLM call exceeded the {}s deadline", LLM_CALL_DEADLINE.as_secs()),
    }
}
