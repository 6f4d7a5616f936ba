use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Map};
use sekia_broker::Broker;
use sekia_protocol::{Command, Payload, subjects};
use tracing::{debug, error, info, warn};

use crate::llm::{LlmClient, LlmOptions, complete_with_deadline};
use crate::value::{dynamic_to_json, json_to_dynamic};

/// Per-workflow binding through which the scripting API reaches the host:
/// broker handle, logger, optional LLM client, command secret, and the
/// handler list built up while the script is first evaluated.
pub struct ModuleContext {
    pub name: String,
    pub broker: Broker,
    pub secret: Vec<u8>,
    pub llm_client: RwLock<Option<Arc<dyn LlmClient>>>,
    pub handlers: Mutex<Vec<(String, FnPtr)>>,
}

impl ModuleContext {
    #[must_use]
    pub fn new(name: String, broker: Broker, secret: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            name,
            broker,
            secret,
            llm_client: RwLock::new(None),
            handlers: Mutex::new(Vec::new()),
        })
    }
}

fn map_to_payload(map: Map) -> Payload {
    match dynamic_to_json(map.into()) {
        serde_json::Value::Object(obj) => obj,
        _ => Payload::new(),
    }
}

fn script_error(message: impl Into<String>) -> Box<EvalAltResult> {
    let message: String = message.into();
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(message), rhai::Position::NONE))
}

/// Registers the `on`/`publish`/`command`/`log`/`ai`/`ai_json` scripting API
/// members on a fresh engine, bound to `ctx`. The `name` property is
/// supplied separately, as a constant pushed into the scope the script is
/// first evaluated with.
pub fn register(engine: &mut Engine, ctx: Arc<ModuleContext>) {
    engine.set_max_expr_depths(64, 64);
    engine.disable_symbol("eval");

    let on_ctx = ctx.clone();
    engine.register_fn("on", move |pattern: &str, handler: FnPtr| {
        on_ctx.handlers.lock().push((pattern.to_owned(), handler));
    });

    let publish_ctx = ctx.clone();
    engine.register_fn(
        "publish",
        move |subject: &str, event_type: &str, payload: Map| -> Result<(), Box<EvalAltResult>> {
            let event = sekia_protocol::Event::new(
                uuid::Uuid::new_v4().to_string(),
                event_type,
                format!("workflow:{}", publish_ctx.name),
                chrono::Utc::now().timestamp(),
                map_to_payload(payload),
            );
            let bytes = event.encode().map_err(|e| script_error(e.to_string()))?;
            publish_ctx.broker.publish(subject, &bytes);
            Ok(())
        },
    );

    let command_ctx = ctx.clone();
    engine.register_fn(
        "command",
        move |agent: &str, command: &str, payload: Map| -> Result<(), Box<EvalAltResult>> {
            let mut cmd = Command::new(command, map_to_payload(payload), format!("workflow:{}", command_ctx.name));
            cmd.sign(&command_ctx.secret).map_err(|e| script_error(e.to_string()))?;
            let bytes = cmd.encode().map_err(|e| script_error(e.to_string()))?;
            command_ctx.broker.publish(&subjects::command(agent), &bytes);
            Ok(())
        },
    );

    let log_name = ctx.name.clone();
    engine.register_fn("log", move |level: &str, message: &str| {
        match level {
            "error" => error!(workflow = %log_name, "{message}"),
            "warn" => warn!(workflow = %log_name, "{message}"),
            "debug" => debug!(workflow = %log_name, "{message}"),
            _ => info!(workflow = %log_name, "{message}"),
        }
    });

    let ai_ctx = ctx.clone();
    engine.register_fn("ai", move |prompt: &str| ai_call(&ai_ctx, prompt, &LlmOptions::default()));
    let ai_ctx_opts = ctx.clone();
    engine.register_fn("ai", move |prompt: &str, opts: Map| ai_call(&ai_ctx_opts, prompt, &parse_llm_options(opts)));

    let ai_json_ctx = ctx.clone();
    engine.register_fn("ai_json", move |prompt: &str| ai_json_call(&ai_json_ctx, prompt, &LlmOptions::default()));
    let ai_json_ctx_opts = ctx.clone();
    engine.register_fn("ai_json", move |prompt: &str, opts: Map| ai_json_call(&ai_json_ctx_opts, prompt, &parse_llm_options(opts)));
}

fn parse_llm_options(opts: Map) -> LlmOptions {
    LlmOptions {
        model: opts.get("model").and_then(|d| d.clone().try_cast::<String>()),
        max_tokens: opts.get("max_tokens").and_then(|d| d.as_int().ok()).map(|v| v as u32),
        temperature: opts.get("temperature").and_then(|d| d.as_float().ok()),
        system: opts.get("system").and_then(|d| d.clone().try_cast::<String>()),
    }
}

fn result_map(text_key: &str, text: Dynamic, error: Dynamic) -> Map {
    let mut map = Map::new();
    map.insert(text_key.into(), text);
    map.insert("error".into(), error);
    map
}

fn ai_call(ctx: &ModuleContext, prompt: &str, opts: &LlmOptions) -> Map {
    let Some(client) = ctx.llm_client.read().clone() else {
        return result_map("text", Dynamic::UNIT, "no LLM client configured".into());
    };
    match complete_with_deadline(client, prompt.to_owned(), opts.clone()) {
        Ok(text) => result_map("text", text.into(), Dynamic::UNIT),
        Err(e) => result_map("text", Dynamic::UNIT, e.to_string().into()),
    }
}

fn ai_json_call(ctx: &ModuleContext, prompt: &str, opts: &LlmOptions) -> Map {
    let Some(client) = ctx.llm_client.read().clone() else {
        return result_map("value", Dynamic::UNIT, "no LLM client configured".into());
    };
    match complete_with_deadline(client, prompt.to_owned(), opts.clone()) {
        Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => result_map("value", json_to_dynamic(&value), Dynamic::UNIT),
            Err(e) => result_map("value", Dynamic::UNIT, format!("invalid JSON from model: {e}").into()),
        },
        Err(e) => result_map("value", Dynamic::UNIT, e.to_string().into()),
    }
}
