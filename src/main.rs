//! Wasp - Rust 终端编码助手
//!
//! 入口：初始化日志、加载配置、向 Planner 要计划，再用状态机执行到终态并打印报告。

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wasp::config::load_config;
use wasp::core::{build_machine, create_llm_from_config};
use wasp::planner::{LlmPlanner, Planner};
use wasp::workflow::RunPhase;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let request: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if request.trim().is_empty() {
        eprintln!("usage: wasp <natural language request>");
        std::process::exit(2);
    }

    let cfg = load_config(None).context("Failed to load config")?;
    if let Some(root) = &cfg.app.workspace_root {
        std::fs::create_dir_all(root).context("Failed to create workspace root")?;
    }

    let llm = create_llm_from_config(&cfg);

    let planner = LlmPlanner::new(llm.clone());
    let plan = planner
        .plan(&request)
        .await
        .context("Planner failed to produce a plan")?;
    tracing::info!(plan_id = %plan.id, tasks = plan.tasks.len(), "plan created");

    let mut machine = build_machine(&cfg, llm, plan).context("Failed to build workflow")?;

    // Ctrl-C 触发协作式取消：在任务边界生效
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_on_signal.cancel();
        }
    });

    let report = machine.run(cancel).await;

    println!("{}", report.summary);
    if !report.completed.is_empty() {
        println!("completed: {}", report.completed.join(", "));
    }
    if !report.failed.is_empty() {
        println!("failed: {}", report.failed.join(", "));
    }
    for fix in &report.suggested_fixes {
        println!("suggested fix: {}", fix);
    }

    if report.phase == RunPhase::Failed {
        std::process::exit(1);
    }
    Ok(())
}
