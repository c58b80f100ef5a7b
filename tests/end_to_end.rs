//! Top-level end-to-end scenarios exercising the queue, scheduler, and
//! backtester through their public APIs, mirroring the six scenarios and
//! the quantified invariants from the design's testable-properties section.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tradeflow_core::backtester::{
    BacktestConfig, BacktestContext, Backtester, HistoricalBar, OrderAction, OrderRequest, PositionSizing,
};
use tradeflow_core::queue::{AddJobOptions, JobPriority, JobStatus, QueueConfig, WorkflowQueue};
use tradeflow_core::scheduler::{RegisterOptions, ScheduledWorkflow, Scheduler, SchedulerConfig, Trigger, WorkflowRunner};

// 1. Priority ordering: enqueue LOW, HIGH, CRITICAL, NORMAL; with
// concurrency=1, expect dispatch order [CRITICAL, HIGH, NORMAL, LOW].
#[tokio::test]
async fn priority_ordering_dispatches_critical_first() {
    let queue = WorkflowQueue::new(QueueConfig { max_concurrent: 1, ..Default::default() }, None);
    let order = Arc::new(Mutex::new(Vec::new()));

    let recorded = order.clone();
    queue
        .register(
            "record",
            Arc::new(move |data: serde_json::Value| {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().unwrap().push(data["label"].as_str().unwrap().to_string());
                    Ok(serde_json::json!({}))
                }
            }),
        )
        .await;

    for (label, priority) in
        [("low", JobPriority::Low), ("high", JobPriority::High), ("critical", JobPriority::Critical), ("normal", JobPriority::Normal)]
    {
        queue
            .add("record", serde_json::json!({ "label": label }), AddJobOptions { priority, ..Default::default() })
            .await
            .unwrap();
    }

    queue.start();
    queue.drain().await;
    queue.stop().await;

    assert_eq!(*order.lock().unwrap(), vec!["critical", "high", "normal", "low"]);
}

// 2. Retry with exponential backoff: handler throws on attempts 1 and 2,
// succeeds on 3; maxAttempts=3. Expect completed with attempts=3.
#[tokio::test]
async fn retry_with_backoff_eventually_completes() {
    let queue = WorkflowQueue::new(QueueConfig { max_concurrent: 1, poll_interval: Duration::from_millis(5), ..Default::default() }, None);
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = attempts.clone();
    queue
        .register(
            "flaky",
            Arc::new(move |_data: serde_json::Value| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        anyhow::bail!("transient failure on attempt {n}");
                    }
                    Ok(serde_json::json!({ "attempt": n }))
                }
            }),
        )
        .await;

    let id = queue
        .add("flaky", serde_json::json!({}), AddJobOptions { max_attempts: Some(3), ..Default::default() })
        .await
        .unwrap();

    queue.start();
    // Backoff after the first two failures is ~1s then ~2s; give the
    // dispatch loop enough wall-clock time to drain through both.
    tokio::time::sleep(Duration::from_millis(3200)).await;
    queue.stop().await;

    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);
}

// 3. Max-attempts failure: handler always throws; maxAttempts=2. Expect
// failed with attempts=2 and the thrown message recorded.
#[tokio::test]
async fn max_attempts_failure_records_error_message() {
    let queue = WorkflowQueue::new(QueueConfig { max_concurrent: 1, poll_interval: Duration::from_millis(5), ..Default::default() }, None);

    queue
        .register("always-fails", Arc::new(|_data: serde_json::Value| async move { anyhow::bail!("handler exploded") }))
        .await;

    let id = queue
        .add("always-fails", serde_json::json!({}), AddJobOptions { max_attempts: Some(2), ..Default::default() })
        .await
        .unwrap();

    queue.start();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    queue.stop().await;

    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert!(job.error.as_deref().unwrap_or("").contains("handler exploded"));
}

struct SleepyRunner {
    delay: Duration,
    invocations: Arc<AtomicU32>,
}

#[async_trait]
impl WorkflowRunner for SleepyRunner {
    async fn run(&self, _schedule: &ScheduledWorkflow) -> anyhow::Result<String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok("done".into())
    }
}

// 4. Scheduler per-schedule cap: maxConcurrent=1, runner sleeps 500ms;
// trigger the event twice back-to-back; expect exactly one invocation.
#[tokio::test]
async fn per_schedule_cap_collapses_back_to_back_triggers() {
    let invocations = Arc::new(AtomicU32::new(0));
    let scheduler = Scheduler::new(SchedulerConfig::default(), None);
    scheduler
        .set_workflow_runner(Arc::new(SleepyRunner { delay: Duration::from_millis(500), invocations: invocations.clone() }))
        .await;
    scheduler
        .register(
            "cap-test",
            Trigger::Event("t".into()),
            serde_json::json!({}),
            RegisterOptions { max_concurrent: 1, ..Default::default() },
        )
        .await
        .unwrap();

    scheduler.trigger_event("t", serde_json::json!({})).await;
    scheduler.trigger_event("t", serde_json::json!({})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

// 5. Scheduler event no-match: subscriber registered for "a"; trigger
// "b"; expect the runner never invoked.
#[tokio::test]
async fn mismatched_event_trigger_never_invokes_the_runner() {
    let invocations = Arc::new(AtomicU32::new(0));
    let scheduler = Scheduler::new(SchedulerConfig::default(), None);
    scheduler
        .set_workflow_runner(Arc::new(SleepyRunner { delay: Duration::from_millis(1), invocations: invocations.clone() }))
        .await;
    scheduler
        .register("a-listener", Trigger::Event("a".into()), serde_json::json!({}), RegisterOptions::default())
        .await
        .unwrap();

    let fired = scheduler.trigger_event("b", serde_json::json!({})).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(fired.is_empty());
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

fn bar_at(day_offset: i64, close: i64) -> HistoricalBar {
    let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(day_offset);
    let price = Decimal::new(close, 0);
    HistoricalBar { timestamp: ts, open: price, high: price, low: price, close: price, volume: dec!(1_000_000) }
}

// 6. Backtester buy-and-hold uptrend: 90 bars of monotonically rising
// closes 100->200; buy 100 shares on bar 1, then hold.
#[tokio::test]
async fn buy_and_hold_uptrend_produces_one_profitable_trade() {
    let mut backtester = Backtester::new(BacktestConfig::default());
    let bars: Vec<HistoricalBar> = (0..90).map(|day| bar_at(day, 100 + (day * 100 / 89))).collect();
    let start = bars.first().unwrap().timestamp;
    let end = bars.last().unwrap().timestamp;
    backtester.load_data("UP", bars, start, end).unwrap();

    let mut bought = false;
    let mut strategy = move |ctx: &BacktestContext| -> Vec<OrderRequest> {
        if !bought && ctx.bars.contains_key("UP") {
            bought = true;
            return vec![OrderRequest {
                symbol: "UP".into(),
                action: OrderAction::Buy,
                sizing: PositionSizing::Fixed(dec!(100)),
                reason: Some("enter on bar 1".into()),
            }];
        }
        vec![]
    };

    let result = backtester.run(&mut strategy).unwrap();

    assert_eq!(result.trades.len(), 1);
    let position = result.final_portfolio.positions.get("UP").unwrap();
    assert_eq!(position.quantity, dec!(100));
    assert!(result.metrics.total_return > Decimal::ZERO);
    assert!(result.metrics.max_drawdown >= Decimal::ZERO);
    assert!(!result.snapshots.is_empty());
    let last = result.snapshots.last().unwrap();
    assert_eq!(last.cumulative_return, result.metrics.total_return);
}

// Quantified invariant: cancelling an already-cancelled job is a no-op
// returning an error on the second attempt, not a second cancellation event.
#[tokio::test]
async fn cancelling_twice_only_succeeds_once() {
    let queue = WorkflowQueue::new(QueueConfig::default(), None);
    queue.register("noop", Arc::new(|_data: serde_json::Value| async move { Ok(serde_json::json!({})) })).await;
    let id = queue
        .add("noop", serde_json::json!({}), AddJobOptions { delay_ms: 60_000, ..Default::default() })
        .await
        .unwrap();

    queue.cancel(id).await.unwrap();
    let second = queue.cancel(id).await;
    assert!(second.is_err());

    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

// Quantified invariant: retrying a non-failed job returns an error and
// does not mutate state.
#[tokio::test]
async fn retrying_a_non_failed_job_is_rejected() {
    let queue = WorkflowQueue::new(QueueConfig::default(), None);
    queue.register("noop", Arc::new(|_data: serde_json::Value| async move { Ok(serde_json::json!({})) })).await;
    let id = queue.add("noop", serde_json::json!({}), AddJobOptions { delay_ms: 60_000, ..Default::default() }).await.unwrap();

    let before = queue.get_job(id).await.unwrap();
    assert!(queue.retry(id).await.is_err());
    let after = queue.get_job(id).await.unwrap();
    assert_eq!(before.status, after.status);
    assert_eq!(before.attempts, after.attempts);
}

// Quantified invariant: disable(enable(S)) restores S to the prior
// disabled state.
#[tokio::test]
async fn disable_after_enable_restores_disabled_state() {
    let scheduler = Scheduler::new(SchedulerConfig::default(), None);
    let id = scheduler
        .register(
            "toggle",
            Trigger::Event("never".into()),
            serde_json::json!({}),
            RegisterOptions { enabled: false, ..Default::default() },
        )
        .await
        .unwrap();

    scheduler.enable(id).await.unwrap();
    assert!(scheduler.get_schedule(id).await.unwrap().enabled);

    scheduler.disable(id).await.unwrap();
    assert!(!scheduler.get_schedule(id).await.unwrap().enabled);
}
