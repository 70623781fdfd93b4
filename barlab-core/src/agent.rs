//! The decision agent: a bounded tool-calling (ReAct) loop over the fixed
//! toolkit, with exponential-backoff retry and per-round trace emission.
//!
//! The loop is an explicit finite loop — no concurrency, no async. Each
//! round either ends the conversation (`finish_reason == "stop"`), executes
//! the requested tool calls, or gives up after the retry policy exhausts,
//! collapsing the decision to a forced hold.

use crate::context::Context;
use crate::domain::Decision;
use crate::llm::{ChatMessage, ChatRequest, ChatResponse, ChatTransport, ToolCallMessage};
use crate::toolkit::{tool_schemas, Toolkit};
use crate::trace::TraceWriter;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Built-in framework prompt used when no custom system prompt is set.
/// The run's playbook is appended inside `<strategy>` tags.
const DEFAULT_SYSTEM_PROMPT: &str = "\
你是一个量化交易决策 Agent，在回测引擎中逐 bar 做出交易决策。

规则:
1. 严格遵循 <strategy> 中的策略，不要主观发挥。
2. 先用 compute / indicator_calc 验证信号，再决定是否交易。
3. 需要交易时调用 trade_execute；观望时直接给出结论，不要调用 trade_execute。
4. 交易后用 memory_log 记录决策理由；建仓后用 memory_note 维护 position_<symbol> 笔记。
5. 最终回复给出简短明确的 reasoning。";

/// Placeholder in a custom system prompt that expands to the playbook.
const STRATEGY_PLACEHOLDER: &str = "{strategy}";

/// Anything that can turn a context + toolkit into a decision.
pub trait DecisionAgent {
    fn decide(&mut self, context: &Context, toolkit: &mut Toolkit) -> Decision;

    /// Wire in the run's trace writer. Default: no tracing.
    fn attach_trace(&mut self, _trace: Arc<TraceWriter>) {}
}

/// LLM-backed agent speaking the OpenAI tool-calling protocol.
pub struct LlmAgent {
    model: String,
    max_rounds: usize,
    temperature: f64,
    system_prompt: Option<String>,
    transport: Box<dyn ChatTransport>,
    trace: Option<Arc<TraceWriter>>,
    backoff_base: Duration,
}

impl LlmAgent {
    pub fn new(model: impl Into<String>, transport: Box<dyn ChatTransport>) -> Self {
        Self {
            model: model.into(),
            max_rounds: 5,
            temperature: 0.0,
            system_prompt: None,
            transport,
            trace: None,
            backoff_base: Duration::from_secs(1),
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Base delay of the retry backoff (attempt k waits base·2^k). Tests
    /// shrink this; the default matches the documented 1s + 2s policy.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_system_prompt(&self, playbook: &str) -> String {
        match &self.system_prompt {
            Some(custom) if custom.contains(STRATEGY_PLACEHOLDER) => {
                custom.replace(STRATEGY_PLACEHOLDER, playbook)
            }
            Some(custom) => custom.clone(),
            None => format!("{DEFAULT_SYSTEM_PROMPT}\n\n<strategy>\n{playbook}\n</strategy>"),
        }
    }

    /// At most three attempts; waits base·2^k after the first two failures,
    /// gives up after the third.
    fn call_llm(&self, request: &ChatRequest) -> Option<ChatResponse> {
        for attempt in 0..3u32 {
            match self.transport.create(request) {
                Ok(response) => return Some(response),
                Err(err) if attempt == 2 => {
                    tracing::error!(%err, "LLM 调用三次失败，放弃本轮");
                    return None;
                }
                Err(err) => {
                    let wait = self.backoff_base * 2u32.pow(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        %err,
                        "LLM 调用失败，等待后重试"
                    );
                    std::thread::sleep(wait);
                }
            }
        }
        None
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn safe_tool_calls(tool_calls: &Option<Vec<ToolCallMessage>>) -> Value {
    match tool_calls {
        None => Value::Null,
        Some(calls) => Value::Array(
            calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "name": tc.function.name,
                        "args": tc.function.arguments,
                    })
                })
                .collect(),
        ),
    }
}

impl DecisionAgent for LlmAgent {
    fn decide(&mut self, context: &Context, toolkit: &mut Toolkit) -> Decision {
        let t0 = Instant::now();
        let system = self.build_system_prompt(&context.playbook);
        let mut messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(context.formatted_text.clone()),
        ];
        let schemas = tool_schemas();

        let mut final_text = String::new();
        let mut last_reasoning = String::new();
        let mut total_tokens: u64 = 0;
        let mut completed = false;

        for round in 1..=self.max_rounds {
            let request = ChatRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: schemas.clone(),
                temperature: self.temperature,
            };
            let llm_start = Instant::now();
            let Some(response) = self.call_llm(&request) else {
                break;
            };
            let llm_ms = elapsed_ms(llm_start);

            let Some(choice) = response.choices.into_iter().next() else {
                break;
            };
            let usage = response.usage.unwrap_or_default();
            total_tokens += usage.total_tokens;

            let assistant = choice.message;
            messages.push(assistant.clone());
            if let Some(content) = &assistant.content {
                if !content.is_empty() {
                    last_reasoning = content.clone();
                }
            }

            if let Some(trace) = &self.trace {
                trace.write(json!({
                    "type": "llm_call",
                    "round": round,
                    "model": self.model,
                    "input_messages": &messages[..messages.len() - 1],
                    "output_content": assistant.content.clone(),
                    "output_tool_calls": safe_tool_calls(&assistant.tool_calls),
                    "finish_reason": choice.finish_reason.clone(),
                    "tokens": {
                        "input": usage.prompt_tokens,
                        "output": usage.completion_tokens,
                        "total": usage.total_tokens,
                    },
                    "duration_ms": llm_ms,
                }));
            }

            if choice.finish_reason == "stop" {
                final_text = assistant.content.unwrap_or_default();
                completed = true;
                break;
            }

            if let Some(tool_calls) = &assistant.tool_calls {
                for tc in tool_calls {
                    // Malformed arguments degrade to an empty map, not a crash
                    let args: Value =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| json!({}));
                    let tool_start = Instant::now();
                    let result = toolkit.execute(&tc.function.name, &args);
                    let tool_ms = elapsed_ms(tool_start);

                    if let Some(trace) = &self.trace {
                        trace.write(json!({
                            "type": "tool_call",
                            "round": round,
                            "tool": tc.function.name,
                            "input": args,
                            "output": result,
                            "duration_ms": tool_ms,
                        }));
                    }
                    messages.push(ChatMessage::tool(tc.id.clone(), result.to_string()));
                }
            }
        }

        if !completed {
            final_text = if last_reasoning.is_empty() {
                format!("超过最大轮次（{}轮），强制 hold", self.max_rounds)
            } else {
                format!(
                    "[max_rounds={} 耗尽，强制 hold] {last_reasoning}",
                    self.max_rounds
                )
            };
        }

        build_decision(self, context, toolkit, final_text, total_tokens, elapsed_ms(t0))
    }

    fn attach_trace(&mut self, trace: Arc<TraceWriter>) {
        self.trace = Some(trace);
    }
}

/// Fold the toolkit's trade record into the final decision. The last trade
/// wins; extra trades are summarised into the reasoning.
fn build_decision(
    agent: &LlmAgent,
    context: &Context,
    toolkit: &Toolkit,
    mut reasoning: String,
    tokens_used: u64,
    latency_ms: f64,
) -> Decision {
    let mut action = "hold".to_string();
    let mut symbol = None;
    let mut quantity = None;
    let mut order_result = None;

    if let Some(last) = toolkit.trade_actions.last() {
        action = last.action.clone();
        symbol = Some(last.symbol.clone());
        quantity = Some(last.quantity);
        order_result = Some(last.result.clone());
        if toolkit.trade_actions.len() > 1 {
            let summary = toolkit
                .trade_actions
                .iter()
                .map(|t| format!("{} {} {}股", t.action, t.symbol, t.quantity))
                .collect::<Vec<_>>()
                .join("; ");
            reasoning.push_str(&format!("\n[全部交易: {summary}]"));
        }
    }

    Decision {
        datetime: context.datetime,
        bar_index: context.bar_index,
        action,
        symbol,
        quantity,
        reasoning,
        market_snapshot: context.market.clone(),
        account_snapshot: context.account.clone(),
        indicators_used: toolkit.indicator_queries.clone(),
        tool_calls: toolkit.call_log.clone(),
        order_result,
        model: agent.model.clone(),
        tokens_used,
        latency_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommissionConfig, RiskConfig, SlippageConfig};
    use crate::context::ContextAssembler;
    use crate::data::{make_sample_data, SampleSpec};
    use crate::engine::{Engine, EngineConfig};
    use crate::llm::{Choice, FunctionCall, TransportError, Usage};
    use crate::memory::{Memory, Workspace};
    use chrono::NaiveDate;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Scripted transport: pops pre-baked responses, or fails every call.
    struct Scripted {
        responses: RefCell<VecDeque<ChatResponse>>,
        fail_always: bool,
        calls: Rc<Cell<usize>>,
    }

    impl Scripted {
        fn with(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                fail_always: false,
                calls: Rc::new(Cell::new(0)),
            }
        }

        fn failing() -> Self {
            Self {
                responses: RefCell::new(VecDeque::new()),
                fail_always: true,
                calls: Rc::new(Cell::new(0)),
            }
        }
    }

    impl ChatTransport for Scripted {
        fn create(&self, _request: &ChatRequest) -> Result<ChatResponse, TransportError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_always {
                return Err(TransportError::Decode("connection refused".into()));
            }
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or(TransportError::ScriptExhausted)
        }
    }

    fn stop_response(content: &str) -> ChatResponse {
        ChatResponse {
            choices: vec![Choice {
                finish_reason: "stop".into(),
                message: ChatMessage {
                    role: "assistant".into(),
                    content: Some(content.into()),
                    tool_calls: None,
                    tool_call_id: None,
                },
            }],
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            }),
        }
    }

    fn tool_call_response(name: &str, arguments: &str) -> ChatResponse {
        ChatResponse {
            choices: vec![Choice {
                finish_reason: "tool_calls".into(),
                message: ChatMessage {
                    role: "assistant".into(),
                    content: Some("检查指标".into()),
                    tool_calls: Some(vec![ToolCallMessage {
                        id: "call_1".into(),
                        kind: "function".into(),
                        function: FunctionCall {
                            name: name.into(),
                            arguments: arguments.into(),
                        },
                    }]),
                    tool_call_id: None,
                },
            }],
            usage: Some(Usage {
                prompt_tokens: 200,
                completion_tokens: 30,
                total_tokens: 230,
            }),
        }
    }

    fn setup() -> (tempfile::TempDir, Engine, Memory, Context) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(Some(dir.path().join("run"))).unwrap();
        let memory = Memory::new(ws, NaiveDate::from_ymd_opt(2023, 1, 2).unwrap());
        memory.init_playbook("动量策略").unwrap();
        let frame = make_sample_data(&SampleSpec {
            periods: 40,
            ..SampleSpec::default()
        });
        let config = EngineConfig {
            initial_cash: 100_000.0,
            risk: RiskConfig {
                max_position_pct: 1.0,
                ..RiskConfig::default()
            },
            commission: CommissionConfig::default(),
            slippage: SlippageConfig::default(),
            seed: 9,
        };
        let mut engine = Engine::new(frame, "AAPL", config).unwrap();
        for _ in 0..30 {
            let _ = engine.advance().unwrap();
        }
        let ctx = ContextAssembler::default()
            .assemble(&engine, &memory, 29, &[], &[])
            .unwrap();
        (dir, engine, memory, ctx)
    }

    #[test]
    fn stop_round_produces_hold_decision() {
        let (_dir, mut engine, memory, ctx) = setup();
        let transport = Scripted::with(vec![stop_response("按兵不动")]);
        let mut agent = LlmAgent::new("test-model", Box::new(transport));
        let mut toolkit = Toolkit::new(&mut engine, &memory);
        let decision = agent.decide(&ctx, &mut toolkit);
        assert_eq!(decision.action, "hold");
        assert_eq!(decision.reasoning, "按兵不动");
        assert_eq!(decision.tokens_used, 120);
        assert_eq!(decision.model, "test-model");
    }

    #[test]
    fn tool_round_executes_and_feeds_back() {
        let (_dir, mut engine, memory, ctx) = setup();
        let transport = Scripted::with(vec![
            tool_call_response("trade_execute", r#"{"action":"buy","symbol":"AAPL","quantity":10}"#),
            stop_response("突破买入 10 股"),
        ]);
        let mut agent = LlmAgent::new("test-model", Box::new(transport));
        let mut toolkit = Toolkit::new(&mut engine, &memory);
        let decision = agent.decide(&ctx, &mut toolkit);
        assert_eq!(decision.action, "buy");
        assert_eq!(decision.symbol.as_deref(), Some("AAPL"));
        assert_eq!(decision.quantity, Some(10));
        assert_eq!(decision.order_result.as_ref().unwrap()["status"], "submitted");
        assert_eq!(decision.tool_calls.len(), 1);
        assert_eq!(decision.tokens_used, 350);
    }

    #[test]
    fn retry_exhaustion_forces_hold() {
        let (_dir, mut engine, memory, ctx) = setup();
        let transport = Scripted::failing();
        let mut agent = LlmAgent::new("test-model", Box::new(transport))
            .with_max_rounds(2)
            .with_backoff_base(Duration::from_millis(1));
        let mut toolkit = Toolkit::new(&mut engine, &memory);
        let decision = agent.decide(&ctx, &mut toolkit);
        assert_eq!(decision.action, "hold");
        assert!(!decision.reasoning.is_empty());
        assert!(decision.reasoning.contains("强制 hold"));
        assert_eq!(decision.tokens_used, 0);
        assert!(decision.latency_ms >= 0.0);
        assert!(decision.market_snapshot.is_object());
        assert!(decision.account_snapshot.is_object());
    }

    #[test]
    fn retry_makes_exactly_three_attempts() {
        let (_dir, mut engine, memory, ctx) = setup();
        let transport = Scripted::failing();
        let calls = transport.calls.clone();
        let mut agent = LlmAgent::new("test-model", Box::new(transport))
            .with_max_rounds(1)
            .with_backoff_base(Duration::from_millis(1));
        let mut toolkit = Toolkit::new(&mut engine, &memory);
        let _ = agent.decide(&ctx, &mut toolkit);
        // One round, three transport attempts
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn max_rounds_exhaustion_keeps_last_reasoning() {
        let (_dir, mut engine, memory, ctx) = setup();
        let transport = Scripted::with(vec![
            tool_call_response("account_status", "{}"),
            tool_call_response("account_status", "{}"),
        ]);
        let mut agent = LlmAgent::new("test-model", Box::new(transport)).with_max_rounds(2);
        let mut toolkit = Toolkit::new(&mut engine, &memory);
        let decision = agent.decide(&ctx, &mut toolkit);
        assert_eq!(decision.action, "hold");
        assert!(decision
            .reasoning
            .starts_with("[max_rounds=2 耗尽，强制 hold]"));
        assert!(decision.reasoning.contains("检查指标"));
    }

    #[test]
    fn multiple_trades_are_summarised() {
        let (_dir, mut engine, memory, ctx) = setup();
        let first = ChatResponse {
            choices: vec![Choice {
                finish_reason: "tool_calls".into(),
                message: ChatMessage {
                    role: "assistant".into(),
                    content: None,
                    tool_calls: Some(vec![
                        ToolCallMessage {
                            id: "call_1".into(),
                            kind: "function".into(),
                            function: FunctionCall {
                                name: "trade_execute".into(),
                                arguments: r#"{"action":"buy","symbol":"AAPL","quantity":10}"#
                                    .into(),
                            },
                        },
                        ToolCallMessage {
                            id: "call_2".into(),
                            kind: "function".into(),
                            function: FunctionCall {
                                name: "trade_execute".into(),
                                arguments: r#"{"action":"sell","symbol":"AAPL","quantity":5}"#
                                    .into(),
                            },
                        },
                    ]),
                    tool_call_id: None,
                },
            }],
            usage: None,
        };
        let transport = Scripted::with(vec![first, stop_response("调仓完成")]);
        let mut agent = LlmAgent::new("test-model", Box::new(transport));
        let mut toolkit = Toolkit::new(&mut engine, &memory);
        let decision = agent.decide(&ctx, &mut toolkit);
        assert_eq!(decision.action, "sell");
        assert!(decision.reasoning.contains("[全部交易: buy AAPL 10股; sell AAPL 5股]"));
    }

    #[test]
    fn malformed_tool_arguments_degrade_to_empty() {
        let (_dir, mut engine, memory, ctx) = setup();
        let transport = Scripted::with(vec![
            tool_call_response("account_status", "not json"),
            stop_response("完成"),
        ]);
        let mut agent = LlmAgent::new("test-model", Box::new(transport));
        let mut toolkit = Toolkit::new(&mut engine, &memory);
        let decision = agent.decide(&ctx, &mut toolkit);
        assert_eq!(decision.tool_calls.len(), 1);
        assert!(decision.tool_calls[0].output["cash"].is_number());
    }

    #[test]
    fn custom_prompt_placeholder_expands() {
        let transport = Scripted::with(vec![]);
        let agent = LlmAgent::new("m", Box::new(transport))
            .with_system_prompt("策略: {strategy} 严格执行");
        assert_eq!(
            agent.build_system_prompt("RSI 反转"),
            "策略: RSI 反转 严格执行"
        );
    }

    #[test]
    fn custom_prompt_without_placeholder_is_verbatim() {
        let transport = Scripted::with(vec![]);
        let agent = LlmAgent::new("m", Box::new(transport)).with_system_prompt("固定提示词");
        assert_eq!(agent.build_system_prompt("RSI 反转"), "固定提示词");
    }

    #[test]
    fn default_prompt_wraps_playbook_in_strategy_tags() {
        let transport = Scripted::with(vec![]);
        let agent = LlmAgent::new("m", Box::new(transport));
        let prompt = agent.build_system_prompt("RSI 反转");
        assert!(prompt.contains("<strategy>\nRSI 反转\n</strategy>"));
        assert!(prompt.starts_with("你是一个量化交易决策 Agent"));
    }

    #[test]
    fn trace_receives_llm_and_tool_events() {
        let (dir, mut engine, memory, ctx) = setup();
        let trace_path = dir.path().join("trace.jsonl");
        let trace = Arc::new(TraceWriter::new(trace_path.clone()));
        let transport = Scripted::with(vec![
            tool_call_response("account_status", "{}"),
            stop_response("完成"),
        ]);
        let mut agent = LlmAgent::new("test-model", Box::new(transport));
        agent.attach_trace(trace);
        let mut toolkit = Toolkit::new(&mut engine, &memory);
        let _ = agent.decide(&ctx, &mut toolkit);

        let text = std::fs::read_to_string(&trace_path).unwrap();
        let types: Vec<String> = text
            .lines()
            .map(|l| {
                serde_json::from_str::<Value>(l).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(types, vec!["llm_call", "tool_call", "llm_call"]);
    }
}
