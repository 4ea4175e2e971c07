use std::sync::mpsc::Sender;

use chrono::Utc;
use tracing::{debug, warn};

use crate::models::{PaymentOrder, PaymentStatus};
use crate::services::api_client::ApiError;
use crate::services::config_loader::PaymentConfig;

/// Status lookup seam so the verification flow can run against the real
/// client or a scripted source.
#[allow(async_fn_in_trait)]
pub trait PaymentStatusSource {
    async fn payment_status(&self, order_id: &str) -> Result<PaymentOrder, ApiError>;
}

/// Terminal outcome of one verification flow. Once any of these is reached
/// the flow never polls again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Success,
    Declined,
    Cancelled,
    /// The order sat in `PENDING` past the staleness window or the attempt
    /// budget. The payment may still have gone through out-of-band, so the
    /// copy points at the dashboard as well as retry.
    Expired,
    /// The order never resolved at all within the attempt budget.
    TimedOut,
    /// The redirect URL carried no order id.
    InvalidCallback,
}

impl VerifyOutcome {
    pub fn redirect(self) -> RedirectTarget {
        match self {
            // Timed-out also lands on the dashboard: a payment that silently
            // succeeded can still be observed there.
            VerifyOutcome::Success | VerifyOutcome::TimedOut => RedirectTarget::Dashboard,
            VerifyOutcome::Declined
            | VerifyOutcome::Cancelled
            | VerifyOutcome::Expired
            | VerifyOutcome::InvalidCallback => RedirectTarget::WorkshopRegistration,
        }
    }

    pub fn notice(self) -> &'static str {
        match self {
            VerifyOutcome::Success => "Payment successful! Your workshop seat is confirmed.",
            VerifyOutcome::Declined => "Payment failed. Please retry from the workshop page.",
            VerifyOutcome::Cancelled => {
                "Payment was cancelled. You can retry from the workshop page."
            }
            VerifyOutcome::Expired => {
                "Payment session expired. If you completed the payment, check your dashboard; otherwise retry."
            }
            VerifyOutcome::TimedOut => {
                "Verification timed out. Check your dashboard in a few minutes."
            }
            VerifyOutcome::InvalidCallback => "Invalid payment callback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectTarget {
    Dashboard,
    WorkshopRegistration,
}

impl RedirectTarget {
    pub fn path(self) -> &'static str {
        match self {
            RedirectTarget::Dashboard => "/dashboard",
            RedirectTarget::WorkshopRegistration => "/workshops/register",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Continue,
    Settle(VerifyOutcome),
}

#[derive(Debug)]
pub enum VerifyEvent {
    Checked {
        attempt: u32,
        status: Option<PaymentStatus>,
    },
    Settled {
        outcome: VerifyOutcome,
        notice: &'static str,
    },
    RedirectScheduled {
        target: RedirectTarget,
        after_ms: u64,
    },
}

/// Extract the order id from the hosted-checkout redirect URL.
pub fn order_id_from_callback(callback_url: &str) -> Option<String> {
    let (_, rest) = callback_url.split_once('?')?;
    let query = rest.split('#').next().unwrap_or(rest);
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if (key == "order_id" || key == "orderId") && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

/// Pure transition rule, evaluated once per poll. `status` is `None` when
/// the check itself failed (network error, unparseable body): treated as not
/// yet resolved, as is any status the server added after this client shipped.
pub fn evaluate_poll(
    status: Option<PaymentStatus>,
    attempts_made: u32,
    minutes_elapsed: i64,
    timing: &PaymentConfig,
) -> PollDecision {
    match status {
        Some(PaymentStatus::Success) => PollDecision::Settle(VerifyOutcome::Success),
        Some(PaymentStatus::Failed) => PollDecision::Settle(VerifyOutcome::Declined),
        Some(PaymentStatus::Cancelled) => PollDecision::Settle(VerifyOutcome::Cancelled),
        Some(PaymentStatus::Pending) => {
            if attempts_made >= timing.max_poll_attempts
                || minutes_elapsed > timing.stale_after_minutes
            {
                PollDecision::Settle(VerifyOutcome::Expired)
            } else {
                PollDecision::Continue
            }
        }
        Some(PaymentStatus::Unknown) | None => PollDecision::Continue,
    }
}

/// Drive a full verification flow for one order: an immediate check, then
/// fixed-interval polling until a terminal outcome or the attempt budget runs
/// out. Polls are strictly sequential; dropping the returned future is the
/// only cancellation and leaves no timer behind.
pub async fn run_verification<S: PaymentStatusSource>(
    source: &S,
    order_id: &str,
    timing: &PaymentConfig,
    events: &Sender<VerifyEvent>,
) -> VerifyOutcome {
    let mut attempts_made = 0u32;

    while attempts_made < timing.max_poll_attempts {
        if attempts_made > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(timing.poll_interval_ms)).await;
        }

        let order = match source.payment_status(order_id).await {
            Ok(order) => Some(order),
            Err(err) => {
                warn!("Status check failed for order {}: {}", order_id, err);
                None
            }
        };
        attempts_made += 1;

        let status = order.as_ref().map(|order| order.status);
        let _ = events.send(VerifyEvent::Checked {
            attempt: attempts_made,
            status,
        });

        let minutes_elapsed = order
            .as_ref()
            .and_then(|order| order.created_at)
            .map(|created_at| (Utc::now().fixed_offset() - created_at).num_minutes())
            .unwrap_or(0);

        match evaluate_poll(status, attempts_made, minutes_elapsed, timing) {
            PollDecision::Continue => {
                debug!(
                    "Payment flow: Verifying -> Verifying (attempt {}, status {:?})",
                    attempts_made, status
                );
            }
            PollDecision::Settle(outcome) => return settle(outcome, timing, events),
        }
    }

    settle(VerifyOutcome::TimedOut, timing, events)
}

/// Fail fast when the redirect carried no order id.
pub fn reject_invalid_callback(timing: &PaymentConfig, events: &Sender<VerifyEvent>) -> VerifyOutcome {
    settle(VerifyOutcome::InvalidCallback, timing, events)
}

fn settle(
    outcome: VerifyOutcome,
    timing: &PaymentConfig,
    events: &Sender<VerifyEvent>,
) -> VerifyOutcome {
    debug!("Payment flow: Verifying -> {:?}", outcome);
    let _ = events.send(VerifyEvent::Settled {
        outcome,
        notice: outcome.notice(),
    });
    let _ = events.send(VerifyEvent::RedirectScheduled {
        target: outcome.redirect(),
        after_ms: timing.redirect_delay_ms,
    });
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;

    use chrono::{Duration, Utc};

    use super::*;

    fn fast_timing() -> PaymentConfig {
        PaymentConfig {
            poll_interval_ms: 0,
            redirect_delay_ms: 0,
            ..PaymentConfig::default()
        }
    }

    fn order(status: PaymentStatus, minutes_ago: i64) -> PaymentOrder {
        PaymentOrder {
            order_id: "ord_123".to_string(),
            status,
            created_at: Some((Utc::now() - Duration::minutes(minutes_ago)).fixed_offset()),
        }
    }

    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<PaymentOrder, ApiError>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<PaymentOrder, ApiError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PaymentStatusSource for ScriptedSource {
        async fn payment_status(&self, _order_id: &str) -> Result<PaymentOrder, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Config("script exhausted".into())))
        }
    }

    fn drain(rx: &mpsc::Receiver<VerifyEvent>) -> Vec<VerifyEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn terminal_statuses_settle_immediately() {
        let timing = fast_timing();
        assert_eq!(
            evaluate_poll(Some(PaymentStatus::Success), 1, 0, &timing),
            PollDecision::Settle(VerifyOutcome::Success)
        );
        assert_eq!(
            evaluate_poll(Some(PaymentStatus::Failed), 1, 0, &timing),
            PollDecision::Settle(VerifyOutcome::Declined)
        );
        assert_eq!(
            evaluate_poll(Some(PaymentStatus::Cancelled), 1, 0, &timing),
            PollDecision::Settle(VerifyOutcome::Cancelled)
        );
    }

    #[test]
    fn stale_pending_expires_regardless_of_attempts() {
        let timing = fast_timing();
        assert_eq!(
            evaluate_poll(Some(PaymentStatus::Pending), 1, 16, &timing),
            PollDecision::Settle(VerifyOutcome::Expired)
        );
    }

    #[test]
    fn pending_at_attempt_budget_expires_even_when_fresh() {
        let timing = fast_timing();
        assert_eq!(
            evaluate_poll(Some(PaymentStatus::Pending), 10, 0, &timing),
            PollDecision::Settle(VerifyOutcome::Expired)
        );
        assert_eq!(
            evaluate_poll(Some(PaymentStatus::Pending), 9, 0, &timing),
            PollDecision::Continue
        );
    }

    #[test]
    fn unknown_and_unresolved_statuses_keep_polling() {
        let timing = fast_timing();
        assert_eq!(
            evaluate_poll(Some(PaymentStatus::Unknown), 3, 0, &timing),
            PollDecision::Continue
        );
        assert_eq!(evaluate_poll(None, 3, 0, &timing), PollDecision::Continue);
    }

    #[test]
    fn callback_order_id_extraction() {
        assert_eq!(
            order_id_from_callback("https://revil.example.org/payment/callback?order_id=ord_123"),
            Some("ord_123".to_string())
        );
        assert_eq!(
            order_id_from_callback("https://revil.example.org/cb?state=x&orderId=ord_9#top"),
            Some("ord_9".to_string())
        );
        assert_eq!(
            order_id_from_callback("https://revil.example.org/payment/callback"),
            None
        );
        assert_eq!(
            order_id_from_callback("https://revil.example.org/cb?order_id="),
            None
        );
    }

    #[tokio::test]
    async fn pending_pending_success_resolves_in_three_checks() {
        let source = ScriptedSource::new(vec![
            Ok(order(PaymentStatus::Pending, 0)),
            Ok(order(PaymentStatus::Pending, 0)),
            Ok(order(PaymentStatus::Success, 0)),
        ]);
        let (tx, rx) = mpsc::channel();
        let timing = fast_timing();

        let outcome = run_verification(&source, "ord_123", &timing, &tx).await;

        assert_eq!(outcome, VerifyOutcome::Success);
        assert_eq!(source.calls(), 3);

        let events = drain(&rx);
        let settled: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                VerifyEvent::Settled { outcome, .. } => Some(*outcome),
                _ => None,
            })
            .collect();
        let redirects: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                VerifyEvent::RedirectScheduled { target, .. } => Some(*target),
                _ => None,
            })
            .collect();
        assert_eq!(settled, vec![VerifyOutcome::Success]);
        assert_eq!(redirects, vec![RedirectTarget::Dashboard]);
    }

    #[tokio::test]
    async fn polling_stops_after_first_terminal_status() {
        let source = ScriptedSource::new(vec![
            Ok(order(PaymentStatus::Failed, 0)),
            Ok(order(PaymentStatus::Success, 0)),
        ]);
        let (tx, _rx) = mpsc::channel();
        let timing = fast_timing();

        let outcome = run_verification(&source, "ord_123", &timing, &tx).await;

        assert_eq!(outcome, VerifyOutcome::Declined);
        assert_eq!(source.calls(), 1);
        assert_eq!(outcome.redirect(), RedirectTarget::WorkshopRegistration);
    }

    #[tokio::test]
    async fn network_errors_are_swallowed_until_timeout() {
        let source = ScriptedSource::new(Vec::new());
        let (tx, rx) = mpsc::channel();
        let timing = fast_timing();

        let outcome = run_verification(&source, "ord_123", &timing, &tx).await;

        assert_eq!(outcome, VerifyOutcome::TimedOut);
        assert_eq!(source.calls(), timing.max_poll_attempts);
        assert_eq!(outcome.redirect(), RedirectTarget::Dashboard);

        let settled_count = drain(&rx)
            .iter()
            .filter(|event| matches!(event, VerifyEvent::Settled { .. }))
            .count();
        assert_eq!(settled_count, 1);
    }

    #[tokio::test]
    async fn stale_pending_settles_on_first_check() {
        let source = ScriptedSource::new(vec![Ok(order(PaymentStatus::Pending, 16))]);
        let (tx, _rx) = mpsc::channel();
        let timing = fast_timing();

        let outcome = run_verification(&source, "ord_123", &timing, &tx).await;

        assert_eq!(outcome, VerifyOutcome::Expired);
        assert_eq!(source.calls(), 1);
        assert_ne!(outcome.notice(), VerifyOutcome::TimedOut.notice());
    }

    #[test]
    fn invalid_callback_settles_without_polling() {
        let (tx, rx) = mpsc::channel();
        let timing = fast_timing();

        let outcome = reject_invalid_callback(&timing, &tx);

        assert_eq!(outcome, VerifyOutcome::InvalidCallback);
        assert_eq!(outcome.notice(), "Invalid payment callback");
        let events = drain(&rx);
        assert_eq!(events.len(), 2);
    }
}
