/// Scenario runner: executes the delivery scenarios in sequence and produces
/// an aggregated pass/fail report.
///
/// Scenarios: uneven → resend → concurrent → budget → heal
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use transat::{FaillibleStorage, FailurePlan, PublisherConfig, ResilientPublisher, TransatError};

use crate::events::emit;
use crate::scenario_common::{expect_eq, timed_step_async, ScenarioResult};

#[derive(Serialize)]
struct RunnerSummary {
    event: &'static str,
    scenarios: Vec<ScenarioLine>,
    total_passed: usize,
    total_failed: usize,
    total_elapsed_s: f64,
    overall_status: &'static str,
}

#[derive(Serialize)]
struct ScenarioLine {
    scenario: String,
    status: &'static str,
    passed: usize,
    failed: usize,
    elapsed_ms: f64,
}

type Shared = Arc<FaillibleStorage<u32>>;

fn backend(name: &str, plan: FailurePlan) -> Shared {
    Arc::new(FaillibleStorage::new(name, plan))
}

fn publisher(a: &Shared, b: &Shared, config: PublisherConfig) -> ResilientPublisher<u32> {
    ResilientPublisher::pair(a.clone(), b.clone(), config)
}

/// The scenarios assert exact attempt counts, so only the pacing and the
/// confirmation order are taken from the caller's config.
fn scenario_config(base: &PublisherConfig) -> PublisherConfig {
    PublisherConfig::new()
        .retry_interval(base.retry_interval_value())
        .confirm_order(base.confirm_order_value())
}

/// Run every scenario. Returns `Ok(false)` if any step failed.
pub async fn run(base: PublisherConfig) -> anyhow::Result<bool> {
    let runner_start = Instant::now();
    let base = scenario_config(&base);
    tracing::info!(?base, "running scenarios");

    let results = vec![
        ("uneven", uneven(&base).await),
        ("resend", resend(&base).await),
        ("concurrent", concurrent(&base).await),
        ("budget", budget(&base).await),
        ("heal", heal(&base).await),
    ];

    let mut lines = Vec::new();
    let mut total_passed = 0usize;
    let mut total_failed = 0usize;

    for (name, result) in &results {
        match result {
            Ok(r) => {
                r.print_summary();
                total_passed += r.passed;
                total_failed += r.failed;
                lines.push(ScenarioLine {
                    scenario: name.to_string(),
                    status: if r.success() { "PASS" } else { "FAIL" },
                    passed: r.passed,
                    failed: r.failed,
                    elapsed_ms: r.total_ms,
                });
            }
            Err(e) => {
                eprintln!("\n[FAIL] Scenario {name}: {e}");
                total_failed += 1;
                lines.push(ScenarioLine {
                    scenario: name.to_string(),
                    status: "ERROR",
                    passed: 0,
                    failed: 1,
                    elapsed_ms: 0.0,
                });
            }
        }
    }

    let overall = if total_failed > 0 { "FAIL" } else { "PASS" };
    let total_elapsed_s = runner_start.elapsed().as_secs_f64();

    eprintln!("\nTotal: {total_passed} passed, {total_failed} failed | {total_elapsed_s:.2}s | [{overall}]");

    emit(&RunnerSummary {
        event: "scenario_summary",
        scenarios: lines,
        total_passed,
        total_failed,
        total_elapsed_s,
        overall_status: overall,
    });

    Ok(total_failed == 0)
}

/// A never drops, B drops its first 3 writes.
async fn uneven(base: &PublisherConfig) -> anyhow::Result<ScenarioResult> {
    let start = Instant::now();
    let mut result = ScenarioResult::new("uneven");

    let a = backend("a", FailurePlan::Never);
    let b = backend("b", FailurePlan::DropFirst(3));
    let p = publisher(&a, &b, base.clone());
    let (a, b, p) = (&a, &b, &p);

    result.add(
        timed_step_async("send 42", || async move {
            p.send(42).await.map_err(|e| e.to_string())?;
            Ok(String::new())
        })
        .await,
    );
    result.add(
        timed_step_async("store calls", || async move {
            expect_eq("a store calls", a.store_calls(), 1)?;
            expect_eq("b store calls", b.store_calls(), 4)?;
            Ok("a=1 b=4".into())
        })
        .await,
    );
    result.add(
        timed_step_async("held-sets", || async move {
            let expected = HashSet::from([42]);
            expect_eq("a values", a.values(), expected.clone())?;
            expect_eq("b values", b.values(), expected)?;
            Ok(String::new())
        })
        .await,
    );

    result.finalize(start);
    Ok(result)
}

/// A second send of a confirmed message touches no backend.
async fn resend(base: &PublisherConfig) -> anyhow::Result<ScenarioResult> {
    let start = Instant::now();
    let mut result = ScenarioResult::new("resend");

    let a = backend("a", FailurePlan::Never);
    let b = backend("b", FailurePlan::Never);
    let p = publisher(&a, &b, base.clone());
    let (a, b, p) = (&a, &b, &p);

    result.add(
        timed_step_async("first send", || async move {
            p.send(1).await.map_err(|e| e.to_string())?;
            Ok(String::new())
        })
        .await,
    );
    result.add(
        timed_step_async("second send is free", || async move {
            let stores = (a.store_calls(), b.store_calls());
            let reads = (a.holds_calls(), b.holds_calls());
            p.send(1).await.map_err(|e| e.to_string())?;
            expect_eq("store calls", (a.store_calls(), b.store_calls()), stores)?;
            expect_eq("holds calls", (a.holds_calls(), b.holds_calls()), reads)?;
            Ok("0 backend calls".into())
        })
        .await,
    );

    result.finalize(start);
    Ok(result)
}

/// Two callers share a publisher; both messages land in both backends.
async fn concurrent(base: &PublisherConfig) -> anyhow::Result<ScenarioResult> {
    let start = Instant::now();
    let mut result = ScenarioResult::new("concurrent");

    let a = backend(
        "a",
        FailurePlan::Random {
            drop_rate: 0.5,
            seed: 1,
        },
    );
    let b = backend(
        "b",
        FailurePlan::Random {
            drop_rate: 0.5,
            seed: 2,
        },
    );
    let p = Arc::new(publisher(&a, &b, base.clone()));

    let t1 = tokio::spawn({
        let p = Arc::clone(&p);
        async move { p.send(1).await }
    });
    let t2 = tokio::spawn({
        let p = Arc::clone(&p);
        async move { p.send(2).await }
    });

    let (a, b) = (&a, &b);
    result.add(
        timed_step_async("both sends complete", || async move {
            t1.await.map_err(|e| e.to_string())?.map_err(|e| e.to_string())?;
            t2.await.map_err(|e| e.to_string())?.map_err(|e| e.to_string())?;
            Ok(String::new())
        })
        .await,
    );
    result.add(
        timed_step_async("held-sets {1,2}", || async move {
            let expected = HashSet::from([1, 2]);
            expect_eq("a values", a.values(), expected.clone())?;
            expect_eq("b values", b.values(), expected)?;
            Ok(format!("a dropped {}, b dropped {}", a.dropped_calls(), b.dropped_calls()))
        })
        .await,
    );

    result.finalize(start);
    Ok(result)
}

/// A dead backend exhausts the attempt budget instead of blocking forever.
async fn budget(base: &PublisherConfig) -> anyhow::Result<ScenarioResult> {
    let start = Instant::now();
    let mut result = ScenarioResult::new("budget");

    let a = backend("a", FailurePlan::Never);
    let b = backend("b", FailurePlan::Always);
    let p = publisher(&a, &b, base.clone().max_attempts(5));
    let (b, p) = (&b, &p);

    result.add(
        timed_step_async("delivery failed after 5", || async move {
            match p.send(1).await {
                Err(TransatError::DeliveryFailed { attempts: 5, .. }) => {}
                other => return Err(format!("expected DeliveryFailed(5), got {other:?}")),
            }
            expect_eq("b store calls", b.store_calls(), 5)?;
            Ok(String::new())
        })
        .await,
    );
    result.add(
        timed_step_async("first backend kept", || async move {
            if p.confirmed_in(0, &1) && !p.is_confirmed(&1) {
                Ok(String::new())
            } else {
                Err("confirmation state wrong".into())
            }
        })
        .await,
    );

    result.finalize(start);
    Ok(result)
}

/// A backend that recovers gets the message on the next send.
async fn heal(base: &PublisherConfig) -> anyhow::Result<ScenarioResult> {
    let start = Instant::now();
    let mut result = ScenarioResult::new("heal");

    let a = backend("a", FailurePlan::Never);
    let b = backend("b", FailurePlan::Always);
    let p = publisher(&a, &b, base.clone().max_attempts(10));
    let (a, b, p) = (&a, &b, &p);

    result.add(
        timed_step_async("send while broken", || async move {
            match p.send(3).await {
                Err(e) => Ok(e.to_string()),
                Ok(()) => Err("send succeeded against a dead backend".into()),
            }
        })
        .await,
    );
    result.add(
        timed_step_async("send after heal", || async move {
            b.set_plan(FailurePlan::Never);
            let a_calls = a.store_calls();
            p.send(3).await.map_err(|e| e.to_string())?;
            expect_eq("a store calls", a.store_calls(), a_calls)?;
            expect_eq("b values", b.values(), HashSet::from([3]))?;
            Ok(String::new())
        })
        .await,
    );

    result.finalize(start);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use transat::ConfirmOrder;

    #[test]
    fn scenario_config_keeps_pacing_only() {
        let base = PublisherConfig::new()
            .retry_interval(Duration::from_millis(3))
            .max_attempts(2)
            .deadline(Duration::from_millis(1))
            .confirm_order(ConfirmOrder::Concurrent);

        let config = scenario_config(&base);

        assert_eq!(config.retry_interval_value(), Duration::from_millis(3));
        assert_eq!(config.confirm_order_value(), ConfirmOrder::Concurrent);
        assert_eq!(config.max_attempts_value(), PublisherConfig::new().max_attempts_value());
        assert_eq!(config.deadline_value(), None);
    }

    #[tokio::test]
    async fn uneven_passes_under_a_tight_caller_budget() {
        let base = scenario_config(&PublisherConfig::new().max_attempts(2));
        let result = uneven(&base).await.unwrap();
        assert!(result.success());
    }
}
