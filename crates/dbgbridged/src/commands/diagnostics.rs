//! `health_check` and `performance_metrics`.

use std::time::Duration;

use serde_json::{Value, json};

use crate::dispatch::CommandError;
use crate::executor::ExecutionResult;
use crate::protocol::{Reply, Request};
use crate::session::timestamp;

use super::CommandContext;

const TEST_COMMAND: &str = "version";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const METRICS_CHECK_TIMEOUT: Duration = Duration::from_secs(3);
const IDLE_AFTER: Duration = Duration::from_secs(300);

pub(crate) fn health_check(context: &CommandContext, _request: &Request) -> Result<Reply, CommandError> {
    // Read before the test command, which itself counts as a command.
    let snapshot = context.session().snapshot();
    let trial = context.execute(TEST_COMMAND, HEALTH_CHECK_TIMEOUT);
    let responsive = !trial.failed;

    let (status, message) = if !responsive {
        ("unhealthy", "Debugger is not responding")
    } else if snapshot.since_last_command > IDLE_AFTER {
        ("idle", "No commands executed recently")
    } else {
        ("healthy", "All systems operational")
    };

    Ok(Reply::output(format!("{status}: {message}")).with_field(
        "health",
        json!({
            "status": status,
            "message": message,
            "engine_responsive": responsive,
            "test_error": test_error(&trial),
            "time_since_last_command": snapshot.since_last_command.as_secs(),
            "last_execution_time": snapshot.last_execution.map(|elapsed| elapsed.as_secs_f64()),
            "session_id": snapshot.session_id,
            "timestamp": timestamp(),
        }),
    ))
}

pub(crate) fn performance_metrics(
    context: &CommandContext,
    _request: &Request,
) -> Result<Reply, CommandError> {
    let snapshot = context.session().snapshot();
    let trial = context.execute(TEST_COMMAND, METRICS_CHECK_TIMEOUT);

    let mut metrics = json!({
        "last_execution_time_ms": snapshot.last_execution.map(millis),
        "time_since_last_command_ms": millis(snapshot.since_last_command),
        "uptime_seconds": snapshot.uptime.as_secs(),
        "commands": snapshot.commands,
        "failures": snapshot.failures,
        "timeouts": snapshot.timeouts,
        "detached_calls": snapshot.detached,
        "session_id": snapshot.session_id,
        "timestamp": timestamp(),
    });
    if trial.failed {
        metrics["test_command_time_ms"] = json!(-1);
        metrics["performance_status"] = json!("error");
        metrics["performance_error"] = test_error(&trial);
    } else {
        metrics["test_command_time_ms"] = json!(millis(trial.elapsed));
        metrics["performance_status"] = json!(rating(trial.elapsed));
    }

    let status = metrics["performance_status"].as_str().unwrap_or("error").to_owned();
    Ok(Reply::output(format!("performance: {status}")).with_field("performance_metrics", metrics))
}

/// Rates a test command round trip.
pub(crate) fn rating(elapsed: Duration) -> &'static str {
    if elapsed < Duration::from_secs(1) {
        "good"
    } else if elapsed < Duration::from_secs(3) {
        "fair"
    } else {
        "poor"
    }
}

fn test_error(trial: &ExecutionResult) -> Value {
    if trial.failed {
        trial
            .error_detail
            .clone()
            .map_or(Value::Null, Value::String)
    } else {
        Value::Null
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;
    use serde_json::Map;

    use super::*;
    use crate::commands::test_support::context;
    use crate::engine::test_doubles::ScriptedEngine;

    fn request() -> Request {
        Request::command(5, "health_check", Map::new())
    }

    #[rstest]
    #[case(Duration::from_millis(200), "good")]
    #[case(Duration::from_millis(1500), "fair")]
    #[case(Duration::from_secs(4), "poor")]
    fn rates_test_command_latency(#[case] elapsed: Duration, #[case] expected: &str) {
        assert_eq!(rating(elapsed), expected);
    }

    #[test]
    fn healthy_engine_reports_healthy() {
        let engine = Arc::new(ScriptedEngine::new());
        let context = context(&engine);
        let reply = health_check(&context, &request()).expect("reply");
        let health = reply.field("health").expect("health");
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["engine_responsive"], true);
        assert_eq!(health["session_id"], "commands-test");
        assert!(health["test_error"].is_null());
    }

    #[test]
    fn unavailable_engine_reports_unhealthy() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.set_unavailable(true);
        let context = context(&engine);
        let reply = health_check(&context, &request()).expect("reply");
        let health = reply.field("health").expect("health");
        assert_eq!(health["status"], "unhealthy");
        assert!(health["test_error"].is_string());
    }

    #[test]
    fn metrics_include_latency_rating_and_counters() {
        let engine = Arc::new(ScriptedEngine::new());
        let context = context(&engine);
        let reply = performance_metrics(&context, &request()).expect("reply");
        let metrics = reply.field("performance_metrics").expect("metrics");
        assert_eq!(metrics["performance_status"], "good");
        assert_eq!(metrics["commands"], 0);
        assert!(metrics["test_command_time_ms"].is_u64());
        assert_eq!(reply.text(), Some("performance: good"));
    }
}
