#![cfg(unix)]

mod support;

use std::fs::File;
use std::time::{Duration, SystemTime};

use markmap_api_types::TaskState;
use markmap_service::application::error::SubmitError;
use markmap_service::application::sweeper::{ExpirySweeper, SweepOutcome, SweepPolicy};
use markmap_service::domain::artifacts::ArtifactKind;

use support::{
    FAILING_BROWSER, FAILING_MARKMAP, FAKE_BROWSER, FAKE_MARKMAP, PUBLIC_URL, script_harness,
    wait_terminal,
};

const OUTLINE: &[u8] = b"# Root\n## A\n## B\n";

#[tokio::test]
async fn labelled_submission_produces_html_then_png() {
    let harness = script_harness(FAKE_MARKMAP, Some(FAKE_BROWSER));
    let pipeline = &harness.pipeline;

    let response = pipeline
        .submit(OUTLINE, Some("demo"))
        .await
        .expect("submission succeeds");

    let base = response.base_name.clone();
    assert_eq!(base, format!("demo_{}", response.timestamp));
    assert!(response.success);
    assert!(!response.png_ready);
    assert_eq!(
        response.html.url,
        format!("{PUBLIC_URL}/artifacts/{base}/raw/html")
    );
    assert_eq!(response.preview_url, format!("{PUBLIC_URL}/html/{base}.html"));

    let html = harness
        .store()
        .read_file(&format!("{base}.html"))
        .await
        .expect("html stored");
    assert_eq!(&html[..], b"<html># Root\n## A\n## B</html>");

    let task_id = response.task_id.expect("snapshot scheduled");
    let task = wait_terminal(pipeline.tasks(), task_id).await;
    assert_eq!(task.state, TaskState::Completed);
    assert!(task.completed_at.is_some());

    let kinds: Vec<_> = harness
        .store()
        .list_set(&base)
        .await
        .expect("listing")
        .into_iter()
        .map(|file| file.kind)
        .collect();
    assert_eq!(kinds, ArtifactKind::ALL.to_vec());

    let again = pipeline
        .submit(OUTLINE, Some("another label"))
        .await
        .expect("dedup hit");
    assert_eq!(again.base_name, base);
    assert!(again.png_ready);
    assert_eq!(
        again.png.expect("png link").url,
        format!("{PUBLIC_URL}/artifacts/{base}/raw/png")
    );
    assert_eq!(harness.converter_calls(), 1);
}

#[tokio::test]
async fn unlabelled_submission_uses_bare_timestamp() {
    let harness = script_harness(FAKE_MARKMAP, None);

    let response = harness
        .pipeline
        .submit(b"# Only", Some("   "))
        .await
        .expect("submission succeeds");

    assert_eq!(response.base_name, response.timestamp.to_string());
    assert!(response.task_id.is_none());
    assert!(response.png.is_none());
}

#[tokio::test]
async fn failed_snapshot_leaves_html_usable() {
    let harness = script_harness(FAKE_MARKMAP, Some(FAILING_BROWSER));

    let response = harness
        .pipeline
        .submit(OUTLINE, Some("crashy"))
        .await
        .expect("primary conversion succeeds");
    let task = wait_terminal(
        harness.pipeline.tasks(),
        response.task_id.expect("snapshot scheduled"),
    )
    .await;

    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.error.as_deref(), Some("chromium: page crashed"));

    let kinds: Vec<_> = harness
        .store()
        .list_set(&response.base_name)
        .await
        .expect("listing")
        .into_iter()
        .map(|file| file.kind)
        .collect();
    assert_eq!(kinds, vec![ArtifactKind::Source, ArtifactKind::Html]);

    let again = harness
        .pipeline
        .submit(OUTLINE, None)
        .await
        .expect("dedup hit");
    assert_eq!(again.base_name, response.base_name);
    assert!(!again.png_ready);
}

#[tokio::test]
async fn conversion_failure_reports_stderr_and_is_retried() {
    let harness = script_harness(FAILING_MARKMAP, Some(FAKE_BROWSER));

    for _ in 0..2 {
        let err = harness
            .pipeline
            .submit(OUTLINE, Some("broken"))
            .await
            .expect_err("conversion fails");
        assert!(matches!(err, SubmitError::Conversion(_)));
        assert_eq!(err.diagnostic(), "markmap: unexpected heading level");
    }

    assert_eq!(harness.converter_calls(), 2);
    assert!(harness.pipeline.tasks().is_empty());

    // The source is kept for diagnosis.
    let sources = std::fs::read_dir(harness.store().root())
        .expect("read store")
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "md"))
        .count();
    assert_eq!(sources, 2);
}

#[tokio::test]
async fn swept_artifacts_are_regenerated_on_resubmission() {
    let harness = script_harness(FAKE_MARKMAP, None);

    let first = harness
        .pipeline
        .submit(OUTLINE, Some("aging"))
        .await
        .expect("submission succeeds");

    let old = SystemTime::now() - Duration::from_secs(48 * 3600);
    for file in harness
        .store()
        .list_set(&first.base_name)
        .await
        .expect("listing")
    {
        File::options()
            .write(true)
            .open(&file.path)
            .and_then(|handle| handle.set_modified(old))
            .expect("age file");
    }

    let sweeper = ExpirySweeper::new(harness.store().clone(), SweepPolicy::default());
    let outcome = sweeper.run_cycle().await.expect("sweep");
    assert_eq!(
        outcome,
        SweepOutcome::Swept {
            scanned: 2,
            deleted: 2
        }
    );

    let second = harness
        .pipeline
        .submit(OUTLINE, Some("aging"))
        .await
        .expect("resubmission succeeds");

    assert_eq!(harness.converter_calls(), 2);
    assert!(
        harness
            .store()
            .read_file(&second.html.file_name)
            .await
            .is_ok()
    );
}
