//! Integration tests for the page job pipeline
//!
//! These tests use wiremock to serve a robots.txt, a listing page and its
//! PDFs, and check what ends up in the document store.

mod common;

use common::{Harness, PDF_BYTES};
use regdoc_harvester::crawler::{FetchErrorKind, ResourceStatus};
use regdoc_harvester::state::{FailureReason, JobState};
use regdoc_harvester::storage::{DocumentKind, DocumentStore, SqliteDocumentStore};
use regdoc_harvester::QueryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, route: &str, html: String) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

fn pdf_response() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_bytes(PDF_BYTES.to_vec())
        .insert_header("content-type", "application/pdf")
}

fn listing_html(base: &str) -> String {
    format!(
        r#"<html><head><title>Normograma</title></head><body>
        <main>
          <h1>Circulares</h1>
          <p>Listado de circulares y resoluciones vigentes para el sector salud.</p>
          <a href="/docs/circular-1.pdf">Circular 1</a>
          <a href="{base}/docs/circular-2.pdf">Circular 2</a>
          <a href="docs/circular-1.pdf">Circular 1 (copia)</a>
          <a href="/contacto">Contacto</a>
        </main>
        </body></html>"#
    )
}

#[tokio::test]
async fn test_page_with_pdfs_end_to_end() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /\n").await;
    mount_page(&server, "/normas", listing_html(&base)).await;

    Mock::given(method("GET"))
        .and(path("/docs/circular-1.pdf"))
        .respond_with(pdf_response())
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/docs/circular-2.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let harness = Harness::new(QueryPolicy::Preserve);
    let report = harness
        .pipeline
        .run_page(&format!("{}/normas", base), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(
        report.transitions,
        vec![
            JobState::Pending,
            JobState::PermissionChecked,
            JobState::PageFetched,
            JobState::ContentExtracted,
            JobState::PdfsDiscovered,
            JobState::PdfsDownloaded,
            JobState::Persisted,
            JobState::Done,
        ]
    );

    assert_eq!(harness.store.count_documents(Some(DocumentKind::Page)).unwrap(), 1);
    assert_eq!(harness.store.count_documents(Some(DocumentKind::Pdf)).unwrap(), 1);
    assert_eq!(harness.store.job_count().unwrap(), 1);

    let pdfs: Vec<_> = report.outcomes_of(DocumentKind::Pdf).collect();
    assert_eq!(pdfs.len(), 2);
    assert!(matches!(pdfs[0].status, ResourceStatus::Stored { version: 1, .. }));
    assert_eq!(
        pdfs[1].status,
        ResourceStatus::Failed {
            reason: "fetch:server_error".to_string()
        }
    );
    assert_eq!(report.failed(), 1);

    let page = report.page.as_ref().unwrap();
    assert_eq!(page.metadata["title"].to_string(), "Normograma");
    assert_eq!(page.metadata["pdf_links"].to_string(), "2");
    assert!(page.attachment_ref.is_none());
}

#[tokio::test]
async fn test_stored_pdf_has_attachment_and_metadata() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /\n").await;
    mount_page(
        &server,
        "/normas",
        r#"<html><body><a href="/docs/Resoluci%C3%B3n%2010.pdf">Resolución 10</a></body></html>"#
            .to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/docs/Resoluci%C3%B3n%2010.pdf"))
        .respond_with(pdf_response())
        .mount(&server)
        .await;

    let harness = Harness::new(QueryPolicy::Preserve);
    let report = harness
        .pipeline
        .run_page(&format!("{}/normas", base), &CancellationToken::new())
        .await
        .unwrap();

    let id = match &report.outcomes_of(DocumentKind::Pdf).next().unwrap().status {
        ResourceStatus::Stored { id, .. } => id.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    let doc = harness.store.get(&id).unwrap();

    assert_eq!(doc.kind, DocumentKind::Pdf);
    assert_eq!(doc.metadata["filename"].to_string(), "Resolución 10.pdf");
    assert_eq!(doc.metadata["anchor_text"].to_string(), "Resolución 10");
    assert_eq!(
        doc.metadata["source_page_url"].to_string(),
        format!("{}/normas", base)
    );
    assert_eq!(doc.metadata["size_bytes"].to_string(), PDF_BYTES.len().to_string());

    let reference = doc.attachment_ref.unwrap();
    assert!(reference.starts_with("sha256:"));
    assert_eq!(harness.store.attachment(&reference).unwrap(), PDF_BYTES.to_vec());
    assert!(harness.store.exists(&doc.content_fingerprint).unwrap());
}

#[tokio::test]
async fn test_disallowed_seed_makes_no_requests() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nDisallow: /privado/\n").await;

    Mock::given(method("GET"))
        .and(path("/privado/normas"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&base)))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/docs/circular-1.pdf"))
        .respond_with(pdf_response())
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(QueryPolicy::Preserve);
    let report = harness
        .pipeline
        .run_page(&format!("{}/privado/normas", base), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Failed(FailureReason::PermissionDenied));
    assert_eq!(report.skipped(), 1);
    assert_eq!(harness.store.count_documents(None).unwrap(), 0);
    assert_eq!(harness.store.job_count().unwrap(), 1);
}

#[tokio::test]
async fn test_page_fetch_failure_persists_nothing() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /\n").await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(QueryPolicy::Preserve);
    let report = harness
        .pipeline
        .run_page(&format!("{}/gone", base), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.state,
        JobState::Failed(FailureReason::Fetch(FetchErrorKind::ClientError))
    );
    assert_eq!(harness.store.count_documents(None).unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_before_start_has_no_side_effects() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    token.cancel();

    let harness = Harness::new(QueryPolicy::Preserve);
    let report = harness
        .pipeline
        .run_page(&format!("{}/normas", base), &token)
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Failed(FailureReason::Cancelled));
    assert!(report.outcomes.is_empty());
    assert_eq!(harness.store.count_documents(None).unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_after_page_fetch_keeps_finished_work() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /\n").await;
    mount_page(
        &server,
        "/normas",
        r#"<html><body>
            <a href="/docs/rapida.pdf">Rápida</a>
            <a href="/docs/lenta.pdf">Lenta</a>
        </body></html>"#
            .to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/docs/rapida.pdf"))
        .respond_with(pdf_response())
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/lenta.pdf"))
        .respond_with(pdf_response().set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let harness = Harness::new(QueryPolicy::Preserve);
    let token = CancellationToken::new();

    let cancel_once_stored = async {
        for _ in 0..500 {
            if harness.store.count_documents(Some(DocumentKind::Pdf)).unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
    };
    let page_url = format!("{}/normas", base);
    let (report, ()) = tokio::join!(
        harness.pipeline.run_page(&page_url, &token),
        cancel_once_stored
    );
    let report = report.unwrap();

    assert_eq!(report.state, JobState::Done);
    let pdfs: Vec<_> = report.outcomes_of(DocumentKind::Pdf).collect();
    assert_eq!(pdfs.len(), 2);
    assert!(pdfs[0].url.ends_with("/docs/rapida.pdf"));
    assert!(matches!(pdfs[0].status, ResourceStatus::Stored { version: 1, .. }));
    assert!(pdfs[1].url.ends_with("/docs/lenta.pdf"));
    assert!(matches!(pdfs[1].status, ResourceStatus::Cancelled));

    assert!(report.page.is_some());
    assert_eq!(harness.store.count_documents(Some(DocumentKind::Page)).unwrap(), 1);
    assert_eq!(harness.store.count_documents(Some(DocumentKind::Pdf)).unwrap(), 1);
}

#[tokio::test]
async fn test_pdf_redirect_into_disallowed_path_skipped() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nDisallow: /privado/\n").await;
    mount_page(
        &server,
        "/normas",
        r#"<html><body><a href="/docs/a.pdf">Circular</a></body></html>"#.to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/docs/a.pdf"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/privado/a.pdf"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/privado/a.pdf"))
        .respond_with(pdf_response())
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(QueryPolicy::Preserve);
    let report = harness
        .pipeline
        .run_page(&format!("{}/normas", base), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(
        report.outcomes_of(DocumentKind::Pdf).next().unwrap().status,
        ResourceStatus::Skipped {
            reason: "permission_denied".to_string()
        }
    );
    assert_eq!(harness.store.count_documents(Some(DocumentKind::Pdf)).unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_pdf_content_not_stored() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /\n").await;
    mount_page(
        &server,
        "/normas",
        r#"<html><body><a href="/docs/login.pdf">Documento</a></body></html>"#.to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/docs/login.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>Inicie sesión</html>")
                .insert_header("content-type", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(QueryPolicy::Preserve);
    let report = harness
        .pipeline
        .run_page(&format!("{}/normas", base), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(
        report.outcomes_of(DocumentKind::Pdf).next().unwrap().status,
        ResourceStatus::Failed {
            reason: "invalid_content".to_string()
        }
    );
    assert_eq!(harness.store.count_documents(Some(DocumentKind::Pdf)).unwrap(), 0);
}

#[tokio::test]
async fn test_rerun_leaves_unchanged_pdf_alone() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /\n").await;
    mount_page(
        &server,
        "/normas",
        r#"<html><body><a href="/docs/circular-1.pdf">Circular 1</a></body></html>"#.to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/docs/circular-1.pdf"))
        .respond_with(pdf_response())
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let harness = Harness::with_store(QueryPolicy::Preserve, store);
    let seed = format!("{}/normas", base);
    let token = CancellationToken::new();

    let first = harness.pipeline.run_page(&seed, &token).await.unwrap();
    let second = harness.pipeline.run_page(&seed, &token).await.unwrap();

    let first_pdf = first.outcomes_of(DocumentKind::Pdf).next().unwrap();
    let second_pdf = second.outcomes_of(DocumentKind::Pdf).next().unwrap();
    let id = match &first_pdf.status {
        ResourceStatus::Stored { id, .. } => id.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(second_pdf.status, ResourceStatus::Unchanged { id: id.clone() });
    assert_eq!(harness.store.get(&id).unwrap().version, 1);

    assert_eq!(second.page.as_ref().unwrap().version, 2);
    assert_eq!(harness.store.count_documents(None).unwrap(), 2);
    assert_eq!(harness.store.job_count().unwrap(), 2);
}

#[tokio::test]
async fn test_strip_policy_collapses_query_variants() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /\n").await;
    mount_page(
        &server,
        "/normas",
        r#"<html><body>
            <a href="/docs/circular-1.pdf">Circular 1</a>
            <a href="/docs/circular-1.pdf?version=2">Circular 1 (v2)</a>
        </body></html>"#
            .to_string(),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/docs/circular-1.pdf"))
        .respond_with(pdf_response())
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(QueryPolicy::Strip);
    let report = harness
        .pipeline
        .run_page(&format!("{}/normas", base), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcomes_of(DocumentKind::Pdf).count(), 1);
    assert_eq!(harness.store.count_documents(Some(DocumentKind::Pdf)).unwrap(), 1);
}

#[tokio::test]
async fn test_run_processes_every_seed() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nDisallow: /privado/\n").await;
    mount_page(&server, "/a", "<html><body>A</body></html>".to_string()).await;
    mount_page(&server, "/b", "<html><body>B</body></html>".to_string()).await;

    let harness = Harness::new(QueryPolicy::Preserve);
    let seeds = vec![
        format!("{}/a", base),
        format!("{}/privado/x", base),
        format!("{}/b", base),
    ];
    let reports = harness
        .pipeline
        .run(&seeds, &CancellationToken::new())
        .await
        .unwrap();

    let states: Vec<JobState> = reports.iter().map(|r| r.state).collect();
    assert_eq!(
        states,
        vec![
            JobState::Done,
            JobState::Failed(FailureReason::PermissionDenied),
            JobState::Done,
        ]
    );
    assert_eq!(harness.store.count_documents(Some(DocumentKind::Page)).unwrap(), 2);
    assert_eq!(harness.store.job_count().unwrap(), 3);
    assert!(harness.audit.attempts().len() >= 3);
}
