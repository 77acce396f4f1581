mod common;

use common::ScriptedStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use windowlimit::{CancelToken, DecisionEngine, LimiterConfig, Sleeper, StoreError};

/// Sleeper that signals when a backoff starts and then never wakes on its own.
#[derive(Debug, Clone, Default)]
struct ParkedSleeper {
    entered: Arc<Notify>,
}

impl Sleeper for ParkedSleeper {
    fn sleep(&self, _duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.entered.notify_one();
        Box::pin(std::future::pending())
    }
}

fn conflicting_engine(sleeper: ParkedSleeper) -> DecisionEngine<ScriptedStore> {
    let store = ScriptedStore::new().on_increment(|_| Err(StoreError::WriteConflict));
    DecisionEngine::new(store, LimiterConfig::default()).unwrap().with_sleeper(sleeper)
}

#[tokio::test]
async fn cancel_during_backoff_reports_cancelled() {
    let sleeper = ParkedSleeper::default();
    let entered = sleeper.entered.clone();
    let engine = Arc::new(conflicting_engine(sleeper));
    let cancel = CancelToken::new();

    let task = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.decide_with_cancel("u1", &cancel).await })
    };

    entered.notified().await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("cancellation must cut the sleep short")
        .expect("task");
    assert!(result.unwrap_err().is_cancelled(), "cancellation is not a deny");
    assert_eq!(engine.store().increments(), 1, "no attempt after cancellation");
}

#[tokio::test]
async fn pre_cancelled_token_never_touches_the_store() {
    let engine = conflicting_engine(ParkedSleeper::default());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = engine.decide_with_cancel("u1", &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(engine.store().increments(), 0);
}

#[tokio::test]
async fn uncancelled_decisions_complete_normally() {
    let engine = DecisionEngine::new(ScriptedStore::new(), LimiterConfig::default()).unwrap();
    let cancel = CancelToken::new();

    assert!(engine.decide_with_cancel("u1", &cancel).await.unwrap().is_allowed());
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn dropping_the_decision_abandons_the_backoff() {
    let sleeper = ParkedSleeper::default();
    let engine = conflicting_engine(sleeper);

    let outcome = tokio::time::timeout(Duration::from_millis(50), engine.decide("u1")).await;
    assert!(outcome.is_err(), "parked backoff never completes by itself");
    assert_eq!(engine.store().increments(), 1);
}
