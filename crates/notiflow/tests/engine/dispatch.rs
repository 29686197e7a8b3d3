use notiflow::rules::{CUSTOM_EMAIL_USER, CUSTOM_IN_APP_ROLE, CUSTOM_IN_APP_USER, PENDIENTE_DUE};
use notiflow::{BatchOutcome, BatchQueryStore, EventContext};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::support::{TestApp, init_test_tracing};

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap()
}

#[tokio::test]
async fn pendiente_due_waits_for_the_due_date() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let due = OffsetDateTime::now_utc() + Duration::days(3);
    let ctx = EventContext::new()
        .with("userId", "u1")
        .with("title", "Certificado de obra")
        .with("dueDate", rfc3339(due));
    let batch_id = app.engine.emit(PENDIENTE_DUE, &ctx).await.unwrap().unwrap();

    app.drain().await;

    assert_eq!(app.sink.attempts(), 0);
    assert_eq!(app.mailer.attempts(), 0);
    let suspensions = app.store.suspensions();
    assert_eq!(suspensions.len(), 1);
    assert_eq!(suspensions[0].1.unix_timestamp(), due.unix_timestamp());

    app.store.fast_forward();
    app.drain().await;

    let rows = app.sink.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "Pendiente por vencer: Certificado de obra");
    assert_eq!(rows[0].notification_type, "warning");

    // The email shares the due date, which the real clock has not reached.
    assert_eq!(app.mailer.attempts(), 0);
    assert_eq!(app.store.suspensions().len(), 2);
    assert_eq!(app.store.fast_forward(), 1);
    app.drain().await;

    assert_eq!(app.mailer.sent().len(), 1);
    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Completed));
}

#[tokio::test]
async fn pendiente_due_without_email_sends_only_the_notice() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let ctx = EventContext::new()
        .with("userId", "u1")
        .with("title", "Certificado de obra")
        .with("sendEmail", false);
    let batch_id = app.engine.emit(PENDIENTE_DUE, &ctx).await.unwrap().unwrap();

    app.drain().await;

    assert_eq!(app.sink.rows().len(), 1);
    assert_eq!(app.mailer.attempts(), 0);
    assert!(app.store.suspensions().is_empty());
    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Completed));
}

#[tokio::test]
async fn past_due_date_is_delivered_at_once() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let ctx = EventContext::new()
        .with("userId", "u1")
        .with("title", "Vencido")
        .with("when", rfc3339(OffsetDateTime::now_utc() - Duration::hours(1)));
    app.engine.emit(CUSTOM_IN_APP_USER, &ctx).await.unwrap().unwrap();

    app.drain().await;

    assert_eq!(app.sink.rows().len(), 1);
    assert!(app.store.suspensions().is_empty());
}

#[tokio::test]
async fn malformed_when_is_delivered_at_once() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let ctx = EventContext::new()
        .with("userId", "u1")
        .with("title", "Hola")
        .with("when", "next tuesday-ish");
    app.engine.emit(CUSTOM_IN_APP_USER, &ctx).await.unwrap().unwrap();

    app.drain().await;

    assert_eq!(app.sink.rows().len(), 1);
    assert!(app.store.suspensions().is_empty());
}

#[tokio::test]
async fn email_without_address_completes_without_sending() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let ctx = EventContext::new()
        .with("userId", "u3")
        .with("title", "Aviso")
        .with("body", "Sin correo registrado");
    let batch_id = app.engine.emit(CUSTOM_EMAIL_USER, &ctx).await.unwrap().unwrap();

    app.drain().await;

    assert_eq!(app.mailer.attempts(), 0);
    assert_eq!(app.store.outcome(batch_id), Some(BatchOutcome::Completed));
}

#[tokio::test]
async fn custom_email_uses_the_given_subject_and_html() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let ctx = EventContext::new()
        .with("userId", "u2")
        .with("title", "Aviso")
        .with("subject", "Recordatorio semanal")
        .with("html", "<h1>Hola</h1>");
    app.engine.emit(CUSTOM_EMAIL_USER, &ctx).await.unwrap().unwrap();

    app.drain().await;

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "u2@example.com");
    assert_eq!(sent[0].subject, "Recordatorio semanal");
    assert_eq!(sent[0].html, "<h1>Hola</h1>");
}

#[tokio::test]
async fn role_without_members_starts_no_batch() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let ctx = EventContext::new()
        .with("tenantId", "t2")
        .with("roleKey", "foreman")
        .with("title", "X");
    let started = app.engine.emit(CUSTOM_IN_APP_ROLE, &ctx).await.unwrap();

    assert_eq!(started, None);
    assert!(app.store.list_batches(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn every_emission_gets_its_own_batch() {
    init_test_tracing();
    let app = TestApp::builder().build();

    let ctx = EventContext::new().with("userId", "u1").with("title", "Hola");
    let first = app.engine.emit(CUSTOM_IN_APP_USER, &ctx).await.unwrap().unwrap();
    let second = app.engine.emit(CUSTOM_IN_APP_USER, &ctx).await.unwrap().unwrap();
    assert_ne!(first, second);

    app.drain().await;

    assert_eq!(app.sink.rows().len(), 2);
    let batches = app.store.list_batches(10, 0).await.unwrap();
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|b| b.status == "completed"));
}
