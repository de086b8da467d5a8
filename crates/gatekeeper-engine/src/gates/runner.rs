use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use gatekeeper_core::errors::{ConfigError, ValidationDefect};
use gatekeeper_core::record::ValidationOutcome;
use gatekeeper_core::traits::{RunContext, ValidationHandler, ValidationReport};
use gatekeeper_core::types::ValidationStatus;

use crate::registry::ValidationRegistry;

/// How a single handler invocation ended.
enum Invocation {
    Returned(ValidationReport),
    Defect(String),
    TimedOut(Duration),
}

/// Runs one validation by name and contains every handler defect.
///
/// The only error that escapes is an unknown validation name; handler
/// errors, panics, and deadline misses all become `status = error`.
pub struct ValidationRunner<'a> {
    registry: &'a ValidationRegistry,
}

impl<'a> ValidationRunner<'a> {
    pub fn new(registry: &'a ValidationRegistry) -> Self {
        Self { registry }
    }

    pub fn run(&self, name: &str, ctx: &RunContext) -> Result<ValidationOutcome, ConfigError> {
        self.run_with_deadline(name, ctx, None)
    }

    /// With a deadline, handlers that honor it run inline through
    /// `check_within`. Any other handler runs on a worker thread; a late
    /// worker is detached and its result discarded.
    pub fn run_with_deadline(
        &self,
        name: &str,
        ctx: &RunContext,
        deadline: Option<Duration>,
    ) -> Result<ValidationOutcome, ConfigError> {
        let handler = self.registry.resolve(name)?;
        let start = Instant::now();
        let invocation = match deadline {
            None => invoke(|| handler.check(ctx)),
            Some(limit) if handler.honors_deadline() => {
                invoke(|| handler.check_within(ctx, limit))
            }
            Some(limit) => invoke_with_deadline(handler, ctx.clone(), limit),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match invocation {
            Invocation::Returned(report) => ValidationOutcome {
                name: name.to_string(),
                status: if report.passed {
                    ValidationStatus::Passed
                } else {
                    ValidationStatus::Failed
                },
                duration_ms,
                details: report.details,
                reason: if report.passed { None } else { report.error },
                error_message: None,
            },
            Invocation::Defect(message) => {
                warn!(validation = name, error = %message, "validation defect contained");
                ValidationOutcome::error(name, message, duration_ms)
            }
            Invocation::TimedOut(limit) => {
                let message = ValidationDefect::timed_out(limit).message;
                warn!(validation = name, "{message}; worker detached");
                ValidationOutcome::error(name, message, duration_ms)
            }
        };
        debug!(
            validation = name,
            status = ?outcome.status,
            duration_ms,
            "validation finished"
        );
        Ok(outcome)
    }
}

fn invoke<F>(call: F) -> Invocation
where
    F: FnOnce() -> Result<ValidationReport, ValidationDefect>,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(report)) => Invocation::Returned(report),
        Ok(Err(defect)) => Invocation::Defect(defect.message),
        Err(payload) => {
            let message = panic_message(&*payload);
            Invocation::Defect(format!("handler panicked: {message}"))
        }
    }
}

fn invoke_with_deadline(
    handler: Arc<dyn ValidationHandler>,
    ctx: RunContext,
    limit: Duration,
) -> Invocation {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("gk-validation".into())
        .spawn(move || {
            // The receiver is gone once the deadline passed.
            let _ = tx.send(invoke(|| handler.check(&ctx)));
        });
    if let Err(e) = spawned {
        return Invocation::Defect(format!("cannot spawn validation worker: {e}"));
    }
    match rx.recv_timeout(limit) {
        Ok(invocation) => invocation,
        Err(RecvTimeoutError::Timeout) => Invocation::TimedOut(limit),
        Err(RecvTimeoutError::Disconnected) => {
            Invocation::Defect("validation worker exited without a result".into())
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    type Check = Result<ValidationReport, ValidationDefect>;

    fn registry() -> ValidationRegistry {
        ValidationRegistry::new()
            .with("ok", |ctx: &RunContext| -> Check {
                Ok(ValidationReport::pass(json!({ "target": ctx.get("target") })))
            })
            .with("nope", |_: &RunContext| -> Check {
                Ok(ValidationReport::fail("certificate expired", json!({ "days": -3 })))
            })
            .with("broken", |_: &RunContext| -> Check {
                Err(ValidationDefect::new("connection refused"))
            })
            .with("panics", |_: &RunContext| -> Check {
                panic!("index out of bounds")
            })
            .with("slow", |_: &RunContext| -> Check {
                thread::sleep(Duration::from_millis(300));
                Ok(ValidationReport::pass(json!(null)))
            })
    }

    #[test]
    fn passing_handler_maps_to_passed() {
        let registry = registry();
        let runner = ValidationRunner::new(&registry);
        let ctx = RunContext::new().with("target", "staging");
        let outcome = runner.run("ok", &ctx).unwrap();
        assert_eq!(outcome.status, ValidationStatus::Passed);
        assert_eq!(outcome.details["target"], "staging");
        assert!(outcome.error_message.is_none());
        assert!(outcome.reason.is_none());
    }

    #[test]
    fn expected_failure_keeps_reason_without_error_message() {
        let registry = registry();
        let outcome = ValidationRunner::new(&registry)
            .run("nope", &RunContext::new())
            .unwrap();
        assert_eq!(outcome.status, ValidationStatus::Failed);
        assert_eq!(outcome.reason.as_deref(), Some("certificate expired"));
        assert!(outcome.error_message.is_none());
        assert_eq!(outcome.details["days"], -3);
    }

    #[test]
    fn handler_error_is_contained() {
        let registry = registry();
        let outcome = ValidationRunner::new(&registry)
            .run("broken", &RunContext::new())
            .unwrap();
        assert_eq!(outcome.status, ValidationStatus::Error);
        assert_eq!(outcome.error_message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn handler_panic_is_contained() {
        let registry = registry();
        let outcome = ValidationRunner::new(&registry)
            .run("panics", &RunContext::new())
            .unwrap();
        assert_eq!(outcome.status, ValidationStatus::Error);
        assert_eq!(
            outcome.error_message.as_deref(),
            Some("handler panicked: index out of bounds")
        );
    }

    #[test]
    fn panic_under_deadline_is_contained() {
        let registry = registry();
        let outcome = ValidationRunner::new(&registry)
            .run_with_deadline("panics", &RunContext::new(), Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(outcome.status, ValidationStatus::Error);
        let message = outcome.error_message.unwrap();
        assert!(message.starts_with("handler panicked"));
    }

    #[test]
    fn deadline_miss_becomes_error() {
        let registry = registry();
        let outcome = ValidationRunner::new(&registry)
            .run_with_deadline("slow", &RunContext::new(), Some(Duration::from_millis(20)))
            .unwrap();
        assert_eq!(outcome.status, ValidationStatus::Error);
        let message = outcome.error_message.as_deref();
        assert_eq!(message, Some("timed out after 20ms"));
        assert!(outcome.duration_ms < 300);
    }

    #[test]
    fn deadline_met_returns_report() {
        let registry = registry();
        let outcome = ValidationRunner::new(&registry)
            .run_with_deadline("ok", &RunContext::new(), Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(outcome.status, ValidationStatus::Passed);
    }

    /// Stops its own work at the deadline, like a killed child process.
    struct Cooperative {
        stopped: Arc<AtomicBool>,
    }

    impl ValidationHandler for Cooperative {
        fn check(&self, _: &RunContext) -> Check {
            Ok(ValidationReport::pass(json!(null)))
        }

        fn honors_deadline(&self) -> bool {
            true
        }

        fn check_within(&self, _: &RunContext, limit: Duration) -> Check {
            thread::sleep(limit);
            self.stopped.store(true, Ordering::SeqCst);
            Err(ValidationDefect::timed_out(limit))
        }
    }

    #[test]
    fn deadline_aware_handler_is_awaited_until_it_stops() {
        let stopped = Arc::new(AtomicBool::new(false));
        let handler = Cooperative {
            stopped: stopped.clone(),
        };
        let registry = ValidationRegistry::new().with("bounded", handler);
        let limit = Some(Duration::from_millis(20));
        let outcome = ValidationRunner::new(&registry)
            .run_with_deadline("bounded", &RunContext::new(), limit)
            .unwrap();
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(outcome.status, ValidationStatus::Error);
        let message = outcome.error_message.as_deref();
        assert_eq!(message, Some("timed out after 20ms"));
    }

    #[test]
    fn deadline_aware_handler_uses_plain_check_without_budget() {
        let stopped = Arc::new(AtomicBool::new(false));
        let handler = Cooperative {
            stopped: stopped.clone(),
        };
        let registry = ValidationRegistry::new().with("bounded", handler);
        let outcome = ValidationRunner::new(&registry)
            .run("bounded", &RunContext::new())
            .unwrap();
        assert_eq!(outcome.status, ValidationStatus::Passed);
        assert!(!stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn unknown_validation_escapes_as_config_error() {
        let registry = registry();
        let err = ValidationRunner::new(&registry)
            .run("missing", &RunContext::new())
            .unwrap_err();
        assert_eq!(err, ConfigError::UnknownValidation("missing".into()));
    }
}
