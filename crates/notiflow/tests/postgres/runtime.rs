//! The notification runtime end to end over PgStore.

use notiflow::channel::ExecutionStatus;
use notiflow::channel::memory::{RecordingMailer, RecordingTracker};
use notiflow::rules::{CUSTOM_IN_APP_ROLE, CUSTOM_IN_APP_USER, OBRA_COMPLETED};
use notiflow::{BatchQueryStore, EventContext};
use serde_json::json;
use test_utils::db_test;
use time::{Duration, OffsetDateTime};

use crate::support::db::{batch_outcome, count_pending_steps, fast_forward_wakeups, pending_wakeups};
use crate::support::helpers::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, TestApp, assert_event_types, init_test_tracing,
    wait_until,
};

db_test!(obra_completed_survives_the_email_delay, |pool| {
    init_test_tracing();
    let app = TestApp::new(pool)?;

    let ctx = EventContext::new()
        .with("tenantId", "t1")
        .with("actorId", "u1")
        .with("obra", json!({ "id": "o-1", "name": "Puente Sur" }));
    let before = OffsetDateTime::now_utc();
    let batch_id = app.engine.emit(OBRA_COMPLETED, &ctx).await?.expect("batch started");

    app.drain().await?;

    assert_eq!(app.sink.rows().len(), 1);
    assert!(app.mailer.sent().is_empty());
    let pending = pending_wakeups(pool, batch_id).await?;
    assert_eq!(pending.len(), 1);
    assert!(pending[0] >= before + Duration::minutes(2) - Duration::seconds(1));
    assert_eq!(batch_outcome(pool, batch_id).await?, None);

    assert_eq!(fast_forward_wakeups(pool).await?, 1);
    app.drain().await?;

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Obra completada: Puente Sur");
    assert_eq!(batch_outcome(pool, batch_id).await?.as_deref(), Some("completed"));

    let events = app.store.fetch_batch_events(batch_id).await?;
    assert_event_types(
        &events,
        &[
            "started",
            "dispatched",
            "delivered",
            "suspended",
            "resumed",
            "dispatched",
            "delivered",
            "completed",
        ],
    );
    Ok(())
});

db_test!(role_fan_out_delivers_in_order, |pool| {
    init_test_tracing();
    let app = TestApp::new(pool)?;

    let ctx = EventContext::new()
        .with("tenantId", "t1")
        .with("roleKey", "foreman")
        .with("title", "X");
    let batch_id = app.engine.emit(CUSTOM_IN_APP_ROLE, &ctx).await?.expect("batch started");

    app.drain().await?;

    let users: Vec<_> = app.sink.rows().into_iter().map(|r| r.user_id).collect();
    assert_eq!(users, ["u2", "u3"]);
    assert_eq!(batch_outcome(pool, batch_id).await?.as_deref(), Some("completed"));
    assert_eq!(count_pending_steps(pool).await?, 0);
    Ok(())
});

db_test!(failure_marks_the_execution_failed, |pool| {
    init_test_tracing();
    let app = TestApp::with(
        pool,
        notiflow::rules::standard_rules(),
        RecordingMailer::new().fail_with("mailbox unavailable"),
        RecordingTracker::new(),
    )?;

    let ctx = EventContext::new()
        .with("tenantId", "t1")
        .with("actorId", "u1")
        .with("executionId", "exec-9")
        .with("obra", json!({ "id": "o-2", "name": "Escuela" }));
    let batch_id = app.engine.emit(OBRA_COMPLETED, &ctx).await?.expect("batch started");

    app.drain().await?;
    fast_forward_wakeups(pool).await?;
    app.drain().await?;

    assert_eq!(app.sink.rows().len(), 1);
    assert_eq!(app.mailer.attempts(), 1);
    assert_eq!(batch_outcome(pool, batch_id).await?.as_deref(), Some("failed"));

    let updates = app.tracker.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].id, "exec-9");
    assert_eq!(updates[0].status, ExecutionStatus::Failed);
    assert_eq!(
        updates[0].error_message.as_deref(),
        Some("email send failed: mailbox unavailable")
    );
    Ok(())
});

db_test!(suspended_batch_resumes_under_a_new_runtime, |pool| {
    init_test_tracing();
    let first = TestApp::new(pool)?;

    let ctx = EventContext::new()
        .with("tenantId", "t1")
        .with("actorId", "u1")
        .with("obra", json!({ "id": "o-3", "name": "Hangar" }));
    let batch_id = first.engine.emit(OBRA_COMPLETED, &ctx).await?.expect("batch started");
    first.drain().await?;
    drop(first);

    let second = TestApp::new(pool)?;
    fast_forward_wakeups(pool).await?;
    second.drain().await?;

    assert_eq!(second.sink.rows().len(), 0);
    assert_eq!(second.mailer.sent().len(), 1);
    assert_eq!(batch_outcome(pool, batch_id).await?.as_deref(), Some("completed"));
    Ok(())
});

db_test!(running_workers_deliver_and_shut_down, |pool| {
    init_test_tracing();
    let app = TestApp::new(pool)?;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let runtime = app.engine.runtime.clone();
    let handle = tokio::spawn(async move {
        runtime
            .run(async {
                let _ = stop_rx.await;
            })
            .await
    });

    for title in ["uno", "dos", "tres"] {
        let ctx = EventContext::new().with("userId", "u1").with("title", title);
        app.engine.emit(CUSTOM_IN_APP_USER, &ctx).await?;
    }

    let sink = app.sink.clone();
    wait_until(DEFAULT_TEST_TIMEOUT, DEFAULT_POLL_INTERVAL, || {
        let sink = sink.clone();
        async move { Ok((sink.rows().len() == 3).then_some(())) }
    })
    .await?;

    let _ = stop_tx.send(());
    handle.await??;

    let batches = app.store.list_batches(10, 0).await?;
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|b| b.status == "completed"));
    Ok(())
});
