//! Example handlers.
//!
//! Small enough to serve as diagnostics for a deployed bridge: `echo` and
//! `add` exercise the unary path, `fail` the error path, and `generate` the
//! streaming path with a cancellable per-token delay.

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::{HandlerError, HandlerResult};
use crate::handler::StreamHandler;
use crate::sink::StreamSink;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Number, Value};
use std::time::Duration;
use tandem_core::ChannelError;
use tracing::debug;

/// Register every example handler.
pub fn default_dispatcher(config: DispatcherConfig) -> Dispatcher {
    Dispatcher::builder()
        .config(config)
        .unary("echo", echo)
        .unary("add", add)
        .unary("fail", fail)
        .streaming("generate", Generate)
        .build()
}

/// Return params unchanged.
pub async fn echo(params: Value) -> HandlerResult<Value> {
    Ok(params)
}

/// `{a, b}` => `{result: a + b}`; missing operands count as zero.
pub async fn add(params: Value) -> HandlerResult<Value> {
    let a = operand(&params, "a")?;
    let b = operand(&params, "b")?;

    let sum = match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a.checked_add(b).map(Number::from),
        _ => None,
    };
    let sum = match sum {
        Some(sum) => sum,
        None => {
            let total = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            Number::from_f64(total)
                .ok_or_else(|| HandlerError::invalid_params("sum is not a finite number"))?
        }
    };

    Ok(json!({ "result": sum }))
}

fn operand(params: &Value, name: &str) -> HandlerResult<Number> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(Number::from(0)),
        Some(Value::Number(n)) => Ok(n.clone()),
        Some(other) => Err(HandlerError::invalid_params(format!(
            "`{}` must be a number, got {}",
            name, other
        ))),
    }
}

/// Always fails with an application error.
pub async fn fail(params: Value) -> HandlerResult<Value> {
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("requested failure")
        .to_string();
    Err(HandlerError::application(message).with_data(json!({ "params": params })))
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    #[serde(default)]
    prompt: String,
    #[serde(default = "default_tokens")]
    tokens: u64,
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
}

fn default_tokens() -> u64 {
    5
}

fn default_delay_ms() -> u64 {
    300
}

/// Emits `tokens` token events, then a `done` event.
pub struct Generate;

#[async_trait]
impl StreamHandler for Generate {
    async fn run(&self, params: Value, mut sink: StreamSink) -> HandlerResult<()> {
        let params: GenerateParams = serde_json::from_value(params)?;
        let delay = Duration::from_millis(params.delay_ms);

        for index in 0..params.tokens {
            sink.check()?;
            sink.emit(json!({
                "type": "token",
                "index": index,
                "token": format!("tok_{}", index),
                "prompt": params.prompt,
            }))
            .await?;

            if !delay.is_zero() {
                tokio::select! {
                    _ = sink.cancelled() => {
                        debug!("generate {} cancelled after {} tokens", sink.stream_id(), index + 1);
                        return Err(ChannelError::Cancelled.into());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        sink.emit(json!({ "type": "done", "total": params.tokens }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{channel, ErrorCode, Recv, StreamEvent};

    #[tokio::test]
    async fn test_echo_returns_params() {
        let params = json!({"msg": "hello"});
        assert_eq!(echo(params.clone()).await.unwrap(), params);
    }

    #[tokio::test]
    async fn test_add() {
        assert_eq!(add(json!({"a": 2, "b": 3})).await.unwrap(), json!({"result": 5}));
        assert_eq!(add(json!({"a": 1.5, "b": 1})).await.unwrap(), json!({"result": 2.5}));
        assert_eq!(add(json!({})).await.unwrap(), json!({"result": 0}));

        let err = add(json!({"a": "two"})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn test_fail_is_application_error() {
        let err = fail(json!({"message": "nope"})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::APPLICATION_ERROR);
        assert_eq!(err.message, "nope");
    }

    #[tokio::test]
    async fn test_generate_emits_tokens_then_done() {
        let (tx, mut rx) = channel(16);
        let sink = StreamSink::new("g".into(), tx);

        Generate
            .run(json!({"prompt": "hi", "tokens": 3, "delay_ms": 0}), sink)
            .await
            .unwrap();

        let mut payloads = Vec::new();
        while let Ok(Recv::Event(StreamEvent::Item { payload, .. })) =
            tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
        {
            payloads.push(payload);
        }

        assert_eq!(payloads.len(), 4);
        assert_eq!(payloads[0]["token"], "tok_0");
        assert_eq!(payloads[2]["prompt"], "hi");
        assert_eq!(payloads[3], json!({"type": "done", "total": 3}));
    }

    #[tokio::test]
    async fn test_generate_stops_when_cancelled_mid_delay() {
        let (tx, rx) = channel(16);
        let handle = rx.handle();
        let sink = StreamSink::new("g".into(), tx);

        let task = tokio::spawn(async move {
            Generate
                .run(json!({"tokens": 100, "delay_ms": 10_000}), sink)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
        drop(rx);
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_params() {
        let (tx, _rx) = channel(1);
        let sink = StreamSink::new("g".into(), tx);
        let err = Generate.run(json!({"tokens": "many"}), sink).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }

    #[test]
    fn test_default_dispatcher_methods() {
        let dispatcher = default_dispatcher(DispatcherConfig::default());
        assert_eq!(
            dispatcher.methods(),
            vec!["add", "echo", "engine.stream.cancel", "fail", "generate"]
        );
    }
}
