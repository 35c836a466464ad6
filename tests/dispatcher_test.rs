//! Integration coverage for the Environment's dispatch algorithm: admission
//! control, timeouts, and metrics recording around tool execution.

use std::sync::Arc;
use std::time::Duration;

use agent_core::{tool, AbortSignal, Environment, Gateway, InMemorySessionStore, ProviderRegistry, ToolContext, ToolResult};

fn environment() -> Environment {
    let gateway = Arc::new(Gateway::new(ProviderRegistry::new()));
    Environment::new(Arc::new(InMemorySessionStore::new()), gateway)
}

#[tokio::test]
async fn tool_not_found_is_reported_without_dispatch() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Warn)
        .try_init();

    let env = environment();
    let abort = AbortSignal::default();
    let result = env
        .handle_action(agent_core::Action::new("ghost", serde_json::json!({})), "s1", &abort)
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Tool not found"));
}

#[tokio::test]
async fn concurrency_limited_tool_still_completes_and_is_metered() {
    let env = environment();
    env.concurrency.set_limit("slow", 1).await;
    env.register_tool(tool("slow", "blocks").handler(|_args, ctx: ToolContext| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = &ctx;
        Ok(ToolResult::ok("done"))
    }));

    let env = Arc::new(env);
    let env2 = env.clone();
    let abort = AbortSignal::default();
    let abort2 = abort.clone();

    let first = tokio::spawn(async move {
        env2.handle_action(agent_core::Action::new("slow", serde_json::json!({})), "s1", &abort2)
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snapshot_before = env.tool_metrics("slow");
    assert_eq!(snapshot_before.calls_total, 0);

    first.await.unwrap();
    let snapshot_after = env.tool_metrics("slow");
    assert_eq!(snapshot_after.calls_total, 1);
}

#[tokio::test]
async fn timeout_is_recorded_in_metrics() {
    let env = environment();
    env.timeouts.set_for_tool("slow", Duration::from_millis(10)).await;
    env.register_tool(tool("slow", "too slow").handler(|_args, _ctx| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ToolResult::ok("never"))
    }));
    let abort = AbortSignal::default();
    let result = env
        .handle_action(agent_core::Action::new("slow", serde_json::json!({})), "s1", &abort)
        .await;
    assert!(!result.success);
    assert_eq!(env.tool_metrics("slow").timeouts_total, 1);
}
