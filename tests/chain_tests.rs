//! # Chain Integration Tests
//!
//! Sequential accumulation, interruption, directives, and async chains.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acta::chain::{self, ChainItem, ChainOptions, ChainOutcome};
use acta::{ActionRef, EngineConfig, ErrorKind, Executor};
use common::*;
use serde_json::{json, Value};

fn executor() -> Executor {
    Executor::new(EngineConfig::default().with_backoff(10))
}

fn item(action: impl acta::Action + 'static) -> ChainItem {
    ChainItem::Action(Arc::new(action))
}

fn item_with(action: impl acta::Action + 'static, params: Value) -> ChainItem {
    ChainItem::WithParams(Arc::new(action), params)
}

#[tokio::test]
async fn add_multiply_subtract_accumulates() {
    let outcome = chain::run(
        &executor(),
        vec![
            item(AddAction),
            item_with(MultiplyAction, json!({"amount": 3})),
            item(SubtractAction),
        ],
        json!({"value": 5}),
        ChainOptions::new(),
    )
    .await
    .unwrap();

    match outcome {
        ChainOutcome::Completed { result, directive } => {
            assert_eq!(result["value"], json!(15));
            assert_eq!(result["amount"], json!(3));
            assert!(directive.is_none());
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn later_actions_see_earlier_outputs() {
    let outcome = chain::run(
        &executor(),
        vec![item(AddAction), item(AddAction), item(AddAction)],
        json!({"value": 0, "amount": 10}),
        ChainOptions::new(),
    )
    .await
    .unwrap();

    match outcome {
        ChainOutcome::Completed { result, .. } => assert_eq!(result["value"], json!(30)),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn interrupt_check_halts_with_partial_params() {
    let outcome = chain::run(
        &executor(),
        vec![item(AddAction), item(MultiplyAction)],
        json!({"value": 5, "amount": 1}),
        ChainOptions::new().with_interrupt_check(|| true),
    )
    .await
    .unwrap();

    match outcome {
        ChainOutcome::Interrupted { partial } => {
            assert_eq!(partial["value"], json!(5));
            assert_eq!(partial["amount"], json!(1));
        }
        other => panic!("expected interruption, got {other:?}"),
    }
}

#[tokio::test]
async fn interrupt_after_first_action_keeps_its_output() {
    let calls = Arc::new(AtomicU32::new(0));
    let probe_calls = Arc::clone(&calls);

    let outcome = chain::run(
        &executor(),
        vec![item(AddAction), item(AddAction), item(AddAction)],
        json!({"value": 0}),
        ChainOptions::new()
            .with_interrupt_check(move || probe_calls.fetch_add(1, Ordering::SeqCst) >= 1),
    )
    .await
    .unwrap();

    match outcome {
        ChainOutcome::Interrupted { partial } => {
            // One add ran before the probe fired.
            assert_eq!(partial["value"], json!(1));
        }
        other => panic!("expected interruption, got {other:?}"),
    }
}

#[tokio::test]
async fn failure_halts_chain() {
    let err = chain::run(
        &executor(),
        vec![item(AddAction), item(FailAction), item(AddAction)],
        json!({"value": 1}),
        ChainOptions::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(err.message(), "deliberate failure");
}

#[tokio::test]
async fn null_params_rejected_as_invalid_input() {
    let err = chain::run(
        &executor(),
        vec![item(AddAction)],
        Value::Null,
        ChainOptions::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn list_params_rejected_as_invalid_input() {
    let err = chain::run(
        &executor(),
        vec![item(AddAction)],
        json!([["value", 1]]),
        ChainOptions::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn chain_context_reaches_actions() {
    struct ReadsContext;

    #[async_trait::async_trait]
    impl acta::Action for ReadsContext {
        fn name(&self) -> &str {
            "reads_context"
        }

        async fn execute(
            &self,
            _params: acta::Params,
            context: &acta::RunContext,
        ) -> acta::ActionResult {
            let env = context.get("env").cloned().unwrap_or(Value::Null);
            Ok(acta::ActionOutput::from_json(json!({"env_seen": env})))
        }
    }

    let outcome = chain::run(
        &executor(),
        vec![ChainItem::Action(Arc::new(ReadsContext) as ActionRef)],
        json!({}),
        ChainOptions::new().with_context(json!({"env": "staging"})),
    )
    .await
    .unwrap();

    match outcome {
        ChainOutcome::Completed { result, .. } => {
            assert_eq!(result["env_seen"], json!("staging"));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn async_chain_await_and_result() {
    let executor = executor();
    let handle = chain::run_async(
        &executor,
        vec![item(AddAction), item(AddAction)],
        json!({"value": 10}),
        ChainOptions::new(),
    )
    .unwrap();

    let outcome = chain::await_result(&executor, handle, Some(Duration::from_millis(1_000)))
        .await
        .unwrap();
    match outcome {
        ChainOutcome::Completed { result, .. } => assert_eq!(result["value"], json!(12)),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn async_chain_cancel_while_running() {
    let executor = executor();
    let handle = chain::run_async(
        &executor,
        vec![item(SlowAction::new(5_000))],
        json!({}),
        ChainOptions::new().with_timeout_ms(10_000),
    )
    .unwrap();
    assert!(chain::cancel(&executor, handle).await.is_ok());
}

#[tokio::test]
async fn async_chain_non_owner_await_rejected() {
    let executor = executor();
    let handle = chain::run_async(
        &executor,
        vec![item(SlowAction::new(5_000))],
        json!({}),
        ChainOptions::new(),
    )
    .unwrap();

    let stolen = tokio::spawn({
        let executor = executor.clone();
        async move {
            chain::await_result(&executor, handle, Some(Duration::from_millis(50))).await
        }
    })
    .await
    .unwrap();
    assert_eq!(stolen.unwrap_err().kind(), ErrorKind::InvalidInput);
}
