//! Demo binary wiring the queue, scheduler, and backtester together end to
//! end. Not part of the library's public contract — a smoke test an
//! operator can run by hand.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use tradeflow_core::backtester::{
    Backtester, BacktestConfig, BacktestContext, HistoricalBar, OrderAction, OrderRequest, PositionSizing,
};
use tradeflow_core::config::Config;
use tradeflow_core::queue::{AddJobOptions, JobPriority, QueueConfig, WorkflowQueue};
use tradeflow_core::scheduler::{RegisterOptions, ScheduledWorkflow, Scheduler, SchedulerConfig, Trigger, WorkflowRunner};

struct LoggingRunner;

#[async_trait]
impl WorkflowRunner for LoggingRunner {
    async fn run(&self, schedule: &ScheduledWorkflow) -> anyhow::Result<String> {
        tracing::info!(schedule = %schedule.name, "workflow runner invoked");
        Ok(format!("exec-{}", schedule.id))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let config = Config::from_env()?;

    let queue = WorkflowQueue::new(
        QueueConfig {
            max_concurrent: config.queue.max_concurrent,
            poll_interval: config.queue.poll_interval,
            stall_timeout: config.queue.stall_timeout,
        },
        None,
    );
    queue
        .register(
            "log-message",
            Arc::new(|data: serde_json::Value| async move {
                tracing::info!(?data, "job executed");
                Ok(serde_json::json!({ "ok": true }))
            }),
        )
        .await;
    queue
        .add(
            "log-message",
            serde_json::json!({ "text": "hello from the workflow queue" }),
            AddJobOptions { priority: JobPriority::High, ..Default::default() },
        )
        .await?;
    queue.start();
    queue.drain().await;
    queue.stop().await;

    let scheduler = Scheduler::new(
        SchedulerConfig {
            max_global_concurrent: config.scheduler.max_global_concurrent,
            tick_interval: config.scheduler.tick_interval,
            retry_delay: config.scheduler.retry_delay,
        },
        None,
    );
    scheduler.set_workflow_runner(Arc::new(LoggingRunner)).await;
    scheduler
        .register(
            "hourly-scan",
            Trigger::Cron("0 0 * * * *".into()),
            serde_json::json!({}),
            RegisterOptions::default(),
        )
        .await?;
    scheduler.run_now(scheduler.get_schedules().await[0].id).await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let mut backtester = Backtester::new(BacktestConfig { initial_cash: Decimal::new(10_000, 0), ..Default::default() });
    let bars = vec![
        bar("2026-01-01T00:00:00Z", 100),
        bar("2026-01-02T00:00:00Z", 105),
        bar("2026-01-03T00:00:00Z", 112),
    ];
    backtester.load_data("DEMO", bars, "2026-01-01T00:00:00Z".parse()?, "2026-01-03T00:00:00Z".parse()?)?;

    let mut bought = false;
    let mut strategy = move |ctx: &BacktestContext| -> Vec<OrderRequest> {
        if !bought && ctx.bars.contains_key("DEMO") {
            bought = true;
            vec![OrderRequest {
                symbol: "DEMO".into(),
                action: OrderAction::Buy,
                sizing: PositionSizing::PercentOfEquity(Decimal::new(5, 1)),
                reason: Some("demo entry".into()),
            }]
        } else {
            vec![]
        }
    };
    let result = backtester.run(&mut strategy)?;
    tracing::info!(final_value = %result.final_portfolio.total_value(), trades = result.trades.len(), "backtest complete");

    Ok(())
}

fn bar(ts: &str, close: i64) -> HistoricalBar {
    let price = Decimal::new(close, 0);
    HistoricalBar { timestamp: ts.parse().unwrap(), open: price, high: price, low: price, close: price, volume: Decimal::new(1000, 0) }
}
