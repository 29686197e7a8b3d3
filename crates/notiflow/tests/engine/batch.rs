use std::time::Duration as StdDuration;

use notiflow::channel::memory::{RecordingMailer, RecordingSink, RecordingTracker};
use notiflow::channel::{ChannelError, ExecutionStatus};
use notiflow::rules::{CUSTOM_IN_APP_ROLE, OBRA_COMPLETED};
use notiflow::{
    BatchInput, BatchOutcome, EffectDefinition, EventContext, MemoryStore, RecipientToken, Rule,
    RuleRegistry, When,
};
use serde_json::json;
use time::{Duration, OffsetDateTime};

use crate::support::{TestApp, init_test_tracing};

const STAGGERED: &str = "test.staggered";
const EMAIL_THEN_NOTICE: &str = "test.email_then_notice";

/// Two in-app notices for `userId`: the first ten days out, the second now.
fn staggered_rule() -> Rule {
    Rule::new(|ctx: &EventContext| {
        vec![RecipientToken::User(ctx.get_str("userId").unwrap_or("u1").to_string())]
    })
    .effect(
        EffectDefinition::in_app()
            .title("later")
            .when(When::At(OffsetDateTime::now_utc() + Duration::days(10))),
    )
    .effect(EffectDefinition::in_app().title("now"))
}

fn email_then_notice_rule() -> Rule {
    Rule::new(|_: &EventContext| vec![RecipientToken::User("u1".into())])
        .effect(EffectDefinition::email().title("first").subject("first"))
        .effect(EffectDefinition::in_app().title("second"))
}

fn test_rules() -> std::sync::Arc<RuleRegistry> {
    notiflow::rules::register_standard(RuleRegistry::builder())
        .register(STAGGERED, staggered_rule())
        .register(EMAIL_THEN_NOTICE, email_then_notice_rule())
        .build()
}

fn obra_completed_ctx() -> EventContext {
    EventContext::new()
        .with("tenantId", "t1")
        .with("actorId", "u1")
        .with("obra", json!({ "id": "o-17", "name": "Hospital Norte" }))
}

#[tokio::test]
async fn obra_completed_notifies_now_and_emails_two_minutes_later() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let before = OffsetDateTime::now_utc();
    let batch_id = app
        .engine
        .emit(OBRA_COMPLETED, &obra_completed_ctx())
        .await
        .unwrap()
        .expect("rule is registered");
    let after = OffsetDateTime::now_utc();

    app.drain().await;

    let rows = app.sink.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, "u1");
    assert_eq!(rows[0].title, "Obra completada");
    assert_eq!(rows[0].notification_type, "success");
    assert_eq!(rows[0].action_url.as_deref(), Some("/excel/o-17"));
    assert!(app.mailer.sent().is_empty());

    let suspensions = app.store.suspensions();
    assert_eq!(suspensions.len(), 1);
    let (suspended, until) = suspensions[0];
    assert_eq!(suspended, batch_id);
    assert!(until >= before + Duration::minutes(2));
    assert!(until <= after + Duration::minutes(2));
    assert_eq!(app.store.outcome(batch_id), None);

    assert_eq!(app.store.fast_forward(), 1);
    app.drain().await;

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "u1@example.com");
    assert_eq!(sent[0].subject, "Obra completada: Hospital Norte");
    assert_eq!(app.sink.rows().len(), 1);
    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Completed));

    assert_eq!(
        app.event_types(batch_id).await,
        [
            "started",
            "dispatched",
            "delivered",
            "suspended",
            "resumed",
            "dispatched",
            "delivered",
            "completed"
        ]
    );
}

#[tokio::test]
async fn role_notice_reaches_every_member() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let ctx = EventContext::new()
        .with("tenantId", "t1")
        .with("roleKey", "foreman")
        .with("title", "X")
        .with("body", "Revisar el acopio");
    let batch_id = app.engine.emit(CUSTOM_IN_APP_ROLE, &ctx).await.unwrap().unwrap();

    app.drain().await;

    let rows = app.sink.rows();
    let users: Vec<_> = rows.iter().map(|r| r.user_id.as_str()).collect();
    assert_eq!(users, ["u2", "u3"]);
    assert!(rows.iter().all(|r| r.title == "X"));
    assert!(rows.iter().all(|r| r.tenant_id.as_deref() == Some("t1")));
    assert!(app.store.suspensions().is_empty());
    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Completed));
}

#[tokio::test]
async fn far_future_effect_holds_back_later_effects() {
    init_test_tracing();
    let app = TestApp::builder().rules(test_rules()).build();

    let ctx = EventContext::new().with("userId", "u1");
    let batch_id = app.engine.emit(STAGGERED, &ctx).await.unwrap().unwrap();

    app.drain().await;

    assert_eq!(app.sink.attempts(), 0);
    assert_eq!(app.store.suspensions().len(), 1);
    assert!(app.store.suspensions()[0].1 > OffsetDateTime::now_utc() + Duration::days(9));

    app.store.fast_forward();
    app.drain().await;

    let titles: Vec<_> = app.sink.rows().into_iter().map(|r| r.title).collect();
    assert_eq!(titles, ["later", "now"]);
    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Completed));
}

#[tokio::test]
async fn immediate_suspensions_let_drain_finish_the_batch() {
    init_test_tracing();
    let app = TestApp::builder()
        .store(MemoryStore::new().resolve_suspensions_immediately())
        .rules(test_rules())
        .build();

    let ctx = EventContext::new().with("userId", "u1");
    let batch_id = app.engine.emit(STAGGERED, &ctx).await.unwrap().unwrap();

    app.drain().await;

    let titles: Vec<_> = app.sink.rows().into_iter().map(|r| r.title).collect();
    assert_eq!(titles, ["later", "now"]);
    assert_eq!(app.store.suspensions().len(), 1);
    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Completed));
}

#[tokio::test]
async fn failed_delivery_stops_the_batch_and_marks_the_execution() {
    init_test_tracing();
    let app = TestApp::builder()
        .rules(test_rules())
        .mailer(RecordingMailer::new().fail_with("relay refused"))
        .build();

    let ctx = EventContext::new().with("executionId", "exec-1");
    let batch_id = app.engine.emit(EMAIL_THEN_NOTICE, &ctx).await.unwrap().unwrap();

    app.drain().await;

    assert_eq!(app.mailer.attempts(), 1);
    assert_eq!(app.sink.attempts(), 0);
    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Failed));

    let updates = app.tracker.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].id, "exec-1");
    assert_eq!(updates[0].status, ExecutionStatus::Failed);
    assert_eq!(
        updates[0].error_message.as_deref(),
        Some(ChannelError::Email("relay refused".into()).to_string().as_str())
    );

    let types = app.event_types(batch_id).await;
    assert_eq!(types.last().map(String::as_str), Some("failed"));
    assert!(!types.iter().any(|t| t == "completed"));
}

#[tokio::test]
async fn failed_delivery_without_execution_id_records_nothing() {
    init_test_tracing();
    let app = TestApp::builder()
        .rules(test_rules())
        .mailer(RecordingMailer::new().fail_with("relay refused"))
        .build();

    let batch_id = app
        .engine
        .emit(EMAIL_THEN_NOTICE, &EventContext::new())
        .await
        .unwrap()
        .unwrap();

    app.drain().await;

    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Failed));
    assert_eq!(app.tracker.attempts(), 0);
}

#[tokio::test]
async fn completed_execution_is_marked_exactly_once() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let ctx = EventContext::new()
        .with("userId", "u1")
        .with("title", "Hola")
        .with("executionId", "exec-2");
    let batch_id = app
        .engine
        .emit(notiflow::rules::CUSTOM_IN_APP_USER, &ctx)
        .await
        .unwrap()
        .unwrap();

    app.drain().await;
    app.drain().await;
    app.engine
        .service
        .execute(&BatchInput::StepSucceeded { batch_id, index: 0 })
        .await
        .unwrap();
    app.drain().await;

    let updates = app.tracker.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, ExecutionStatus::Completed);
    assert_eq!(updates[0].error_message, None);
}

#[tokio::test]
async fn tracker_failure_parks_the_outcome_step() {
    init_test_tracing();
    let app = TestApp::builder()
        .tracker(RecordingTracker::new().fail_with("executions table gone"))
        .build();

    let ctx = EventContext::new()
        .with("userId", "u1")
        .with("title", "Hola")
        .with("executionId", "exec-3");
    let batch_id = app
        .engine
        .emit(notiflow::rules::CUSTOM_IN_APP_USER, &ctx)
        .await
        .unwrap()
        .unwrap();

    app.drain().await;

    assert_eq!(app.sink.rows().len(), 1);
    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Completed));
    assert_eq!(app.store.pending_steps(), 0);

    let parked = app.engine.runtime.fetch_parked_steps(10).await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].batch_id, batch_id);
    assert!(
        parked[0]
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("executions table gone"))
    );
}

#[tokio::test]
async fn duplicate_wake_is_journaled_as_ignored() {
    init_test_tracing();
    let app = TestApp::builder().rules(test_rules()).build();

    let ctx = EventContext::new().with("userId", "u1");
    let batch_id = app.engine.emit(STAGGERED, &ctx).await.unwrap().unwrap();

    let wake = BatchInput::Wake { batch_id, index: 0 };
    app.engine.service.execute(&wake).await.unwrap();
    app.engine.service.execute(&wake).await.unwrap();

    app.drain().await;

    let titles: Vec<_> = app.sink.rows().into_iter().map(|r| r.title).collect();
    assert_eq!(titles, ["later", "now"]);

    let types = app.event_types(batch_id).await;
    assert_eq!(types.iter().filter(|t| *t == "ignored").count(), 1);
    assert_eq!(types.iter().filter(|t| *t == "completed").count(), 1);

    let late = BatchInput::StepSucceeded { batch_id, index: 1 };
    app.engine.service.execute(&late).await.unwrap();
    assert_eq!(app.event_types(batch_id).await, types);
}

#[tokio::test]
async fn unregistered_event_starts_nothing() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let started = app
        .engine
        .emit("obra.archived", &EventContext::new().with("actorId", "u1"))
        .await
        .unwrap();

    assert_eq!(started, None);
    assert_eq!(app.drain().await, 0);
    assert_eq!(app.sink.attempts(), 0);
}

#[tokio::test]
async fn batch_resumes_after_restart() {
    init_test_tracing();
    let first = TestApp::builder().rules(test_rules()).build();

    let ctx = EventContext::new().with("userId", "u1");
    let batch_id = first.engine.emit(STAGGERED, &ctx).await.unwrap().unwrap();
    first.drain().await;
    assert_eq!(first.sink.attempts(), 0);

    let second = first.restart();
    drop(first);

    second.store.fast_forward();
    second.drain().await;

    assert_eq!(second.sink.rows().len(), 2);
    assert_eq!(second.store.outcome(batch_id), Some(BatchOutcome::Completed));
}

#[tokio::test]
async fn running_runtime_delivers_in_the_background() {
    init_test_tracing();
    let app = TestApp::builder().build();
    let sink: RecordingSink = app.sink.clone();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let runtime = app.engine.runtime.clone();
    let handle = tokio::spawn(async move {
        runtime
            .run(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let ctx = EventContext::new().with("userId", "u1").with("title", "Hola");
    app.engine
        .emit(notiflow::rules::CUSTOM_IN_APP_USER, &ctx)
        .await
        .unwrap();

    let delivered = tokio::time::timeout(StdDuration::from_secs(5), async {
        while sink.rows().is_empty() {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await;
    assert!(delivered.is_ok(), "notice was not delivered in time");

    let _ = stop_tx.send(());
    handle.await.unwrap().unwrap();
}
