//! End-to-end pipeline tests over an in-memory SurrealDB, the in-memory
//! vector store, and deterministic hashed embeddings. Fixture PDFs are
//! authored on the fly.

use std::{path::Path, sync::Arc, time::Duration};

use chrono::Utc;
use common::{
    storage::{
        db::SurrealDbClient,
        types::{
            classification::DocumentKind,
            embedding_twin::EmbeddingTwin,
            extracted_document::{ExtractedDocument, ExtractionOutcome},
            pipeline_message::{PipelineMessage, PipelineStage},
            pipeline_task::PipelineTask,
        },
    },
    utils::{config::BreakpointPolicy, embedding::EmbeddingProvider},
    vector::{MemoryVectorStore, VectorStore},
};
use ingestion_pipeline::{
    chunker::ChunkerConfig, cracker::crack_document, pipeline::IngestionPipeline, run_worker_loop,
    scanner::scan_and_enqueue,
};
use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, Stream,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn write_pdf(path: &Path, pages: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save pdf");
}

fn test_chunker_config() -> ChunkerConfig {
    ChunkerConfig {
        unit_min_chars: 5,
        unit_max_chars: 60,
        buffer_size: 0,
        breakpoint_policy: BreakpointPolicy::Absolute,
        breakpoint_amount: 0.8,
        min_chunk_chars: 10,
    }
}

async fn test_harness() -> (Arc<SurrealDbClient>, MemoryVectorStore, Arc<IngestionPipeline>) {
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb"),
    );
    db.ensure_initialized().await.expect("schema");

    let store = MemoryVectorStore::new();
    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        EmbeddingProvider::new_hashed(64),
        Arc::new(store.clone()),
        test_chunker_config(),
    ));

    (db, store, pipeline)
}

/// Claims and processes tasks across every stage until all queues drain.
/// Failed tasks are rescheduled into the future, so the loop terminates.
async fn drain_queues(db: &SurrealDbClient, pipeline: &IngestionPipeline) {
    loop {
        let mut claimed_any = false;
        for stage in PipelineStage::ALL {
            while let Some(task) = PipelineTask::claim_next_ready(
                db,
                stage,
                "drain-worker",
                Utc::now(),
                Duration::from_secs(60),
            )
            .await
            .expect("claim")
            {
                claimed_any = true;
                // Failures surface through the assertions that follow the
                // drain, not here.
                let _ = pipeline.process_task(task).await;
            }
        }
        if !claimed_any {
            break;
        }
    }
}

#[tokio::test]
async fn cold_start_ingests_the_whole_library() {
    let library = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(library.path().join("5e/core")).expect("mkdir");
    std::fs::create_dir_all(library.path().join("5e/adventures")).expect("mkdir");

    write_pdf(
        &library.path().join("5e/core/phb.pdf"),
        &[
            "alpha beta gamma delta epsilon zeta eta theta iota kappa",
            "alpha beta gamma delta epsilon zeta eta theta lambda mu",
        ],
    );
    write_pdf(
        &library.path().join("5e/adventures/curse.pdf"),
        &["omega psi chi phi upsilon tau sigma rho pi omicron"],
    );

    let (db, store, pipeline) = test_harness().await;
    let shutdown = CancellationToken::new();

    let summary = scan_and_enqueue(library.path(), &db, &shutdown)
        .await
        .expect("scan");
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.enqueued, 2);
    assert_eq!(summary.unchanged, 0);
    assert_eq!(summary.errors, 0);

    drain_queues(&db, &pipeline).await;

    let documents = db
        .get_all_stored_items::<ExtractedDocument>()
        .await
        .expect("documents");
    assert_eq!(documents.len(), 2);
    for document in &documents {
        assert!(
            document.is_fully_processed,
            "document {} not fully processed",
            document.file_name
        );
        assert_eq!(document.ruleset_tag, "5e");
        assert!(!document.extracted_text.trim().is_empty());
    }

    let phb = documents
        .iter()
        .find(|d| d.file_name == "phb.pdf")
        .expect("phb");
    assert_eq!(phb.document_kind, DocumentKind::Rulebook);
    assert_eq!(phb.page_count, 2);

    let curse = documents
        .iter()
        .find(|d| d.file_name == "curse.pdf")
        .expect("curse");
    assert_eq!(curse.document_kind, DocumentKind::Adventure);

    let twins = db
        .get_all_stored_items::<EmbeddingTwin>()
        .await
        .expect("twins");
    assert!(!twins.is_empty());
    assert_eq!(store.point_count().await.expect("points"), twins.len() as u64);

    // A second scan of the untouched library is a no-op.
    let summary = scan_and_enqueue(library.path(), &db, &shutdown)
        .await
        .expect("rescan");
    assert_eq!(summary.enqueued, 0);
    assert_eq!(summary.unchanged, 2);

    drain_queues(&db, &pipeline).await;
    assert_eq!(store.point_count().await.expect("points"), twins.len() as u64);
}

#[tokio::test]
async fn edited_document_is_reprocessed_without_orphans() {
    let library = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(library.path().join("pf2")).expect("mkdir");
    let pdf_path = library.path().join("pf2/core.pdf");

    write_pdf(
        &pdf_path,
        &[
            "alpha beta gamma delta epsilon zeta eta theta iota kappa",
            "omega psi chi phi upsilon tau sigma rho pi omicron",
        ],
    );

    let (db, store, pipeline) = test_harness().await;
    let shutdown = CancellationToken::new();

    scan_and_enqueue(library.path(), &db, &shutdown)
        .await
        .expect("scan");
    drain_queues(&db, &pipeline).await;

    let document_id = ExtractedDocument::stable_id(&pdf_path.to_string_lossy());
    let old_twins = EmbeddingTwin::count_by_source_id(&document_id, &db)
        .await
        .expect("twins");
    // The orphan assertions below are vacuous unless the first revision
    // produced more chunks than the second.
    assert!(old_twins >= 2, "expected multiple chunks, got {old_twins}");

    // Shrink the document to a single short page.
    write_pdf(&pdf_path, &["nu xi omicron sigma tau upsilon nu xi"]);

    let summary = scan_and_enqueue(library.path(), &db, &shutdown)
        .await
        .expect("rescan");
    assert_eq!(summary.enqueued, 1);

    drain_queues(&db, &pipeline).await;

    let document = ExtractedDocument::find_by_path(&pdf_path.to_string_lossy(), &db)
        .await
        .expect("find")
        .expect("document");
    assert!(document.is_fully_processed);
    assert_eq!(document.page_count, 1);

    // Both stores hold exactly the new revision's chunks: no stale points,
    // no orphan twins.
    let new_twins = EmbeddingTwin::count_by_source_id(&document_id, &db)
        .await
        .expect("twins");
    let document_points = store
        .payloads()
        .await
        .into_iter()
        .filter(|payload| {
            payload.get("document_id").and_then(|v| v.as_str()) == Some(document_id.as_str())
        })
        .count();
    assert_eq!(new_twins, document_points);
    assert!(new_twins > 0);

    for payload in store.payloads().await {
        if payload.get("document_id").and_then(|v| v.as_str()) == Some(document_id.as_str()) {
            let text = payload
                .get("text")
                .and_then(|v| v.as_str())
                .expect("chunk text in payload");
            assert!(!text.contains("alpha"), "stale chunk text survived: {text}");
        }
    }
}

#[tokio::test]
async fn redelivery_compacts_after_a_crash_between_extraction_and_cleanup() {
    let library = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(library.path().join("pf2")).expect("mkdir");
    let pdf_path = library.path().join("pf2/core.pdf");

    write_pdf(
        &pdf_path,
        &[
            "alpha beta gamma delta epsilon zeta eta theta iota kappa",
            "omega psi chi phi upsilon tau sigma rho pi omicron",
        ],
    );

    let (db, store, pipeline) = test_harness().await;
    let shutdown = CancellationToken::new();

    scan_and_enqueue(library.path(), &db, &shutdown)
        .await
        .expect("scan");
    drain_queues(&db, &pipeline).await;

    let file_path = pdf_path.to_string_lossy().into_owned();
    let document_id = ExtractedDocument::stable_id(&file_path);
    let old_twins = EmbeddingTwin::count_by_source_id(&document_id, &db)
        .await
        .expect("twins");
    assert!(old_twins >= 2, "expected multiple chunks, got {old_twins}");

    write_pdf(&pdf_path, &["nu xi rho sigma tau upsilon nu xi"]);

    // A crack worker persists the new extraction and then dies before any
    // downstream work runs. The stored text now matches the file on disk.
    let (_, outcome) = crack_document(&file_path, "pf2", &db)
        .await
        .expect("crack")
        .expect("supported file");
    assert_eq!(outcome, ExtractionOutcome::TextChanged);

    // The lease expires and the crack task is delivered again; it sees
    // unchanged text this time around.
    PipelineTask::enqueue(
        PipelineMessage::CrackDocument {
            file_path: file_path.clone(),
            relative_directory: "pf2".into(),
        },
        &db,
    )
    .await
    .expect("enqueue");
    drain_queues(&db, &pipeline).await;

    let new_twins = EmbeddingTwin::count_by_source_id(&document_id, &db)
        .await
        .expect("twins");
    let document_points = store
        .payloads()
        .await
        .into_iter()
        .filter(|payload| {
            payload.get("document_id").and_then(|v| v.as_str()) == Some(document_id.as_str())
        })
        .count();
    assert!(new_twins > 0);
    assert_eq!(new_twins, document_points);

    for payload in store.payloads().await {
        if payload.get("document_id").and_then(|v| v.as_str()) == Some(document_id.as_str()) {
            let text = payload
                .get("text")
                .and_then(|v| v.as_str())
                .expect("chunk text in payload");
            assert!(
                !text.contains("omega") && !text.contains("alpha"),
                "stale chunk text survived redelivery: {text}"
            );
        }
    }
}

#[tokio::test]
async fn interrupted_extraction_heals_on_the_next_scan() {
    let library = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(library.path().join("5e")).expect("mkdir");
    write_pdf(
        &library.path().join("5e/phb.pdf"),
        &["alpha beta gamma delta epsilon zeta eta theta"],
    );

    let (db, _store, _pipeline) = test_harness().await;
    let shutdown = CancellationToken::new();

    let summary = scan_and_enqueue(library.path(), &db, &shutdown)
        .await
        .expect("scan");
    assert_eq!(summary.enqueued, 1);

    // The crack task never ran (simulating a crash), so the hash matches but
    // there is no extraction. The next scan re-enqueues instead of skipping.
    let summary = scan_and_enqueue(library.path(), &db, &shutdown)
        .await
        .expect("rescan");
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.unchanged, 0);
}

#[tokio::test]
async fn conversation_messages_flow_through_their_own_stage() {
    let (db, store, pipeline) = test_harness().await;

    let message_id = format!("msg-{}", Uuid::new_v4());
    PipelineTask::enqueue(
        PipelineMessage::ConversationMessageReadyForEmbedding {
            message_id: message_id.clone(),
            game_id: "game-42".into(),
            text: "I cast fireball at the goblin warband".into(),
            role: "player".into(),
            created_at: Utc::now(),
        },
        &db,
    )
    .await
    .expect("enqueue");

    drain_queues(&db, &pipeline).await;

    assert_eq!(store.point_count().await.expect("points"), 1);
    let twin = EmbeddingTwin::find_by_owner(&message_id, &db)
        .await
        .expect("find")
        .expect("twin");
    assert_eq!(twin.source_id, "game-42");

    let payload = store.payloads().await.pop().expect("payload");
    assert_eq!(
        payload.get("game_id").and_then(|v| v.as_str()),
        Some("game-42")
    );
    assert_eq!(payload.get("role").and_then(|v| v.as_str()), Some("player"));
}

#[tokio::test]
async fn worker_loops_process_until_cancelled() {
    let library = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(library.path().join("5e")).expect("mkdir");
    let pdf_path = library.path().join("5e/phb.pdf");
    write_pdf(
        &pdf_path,
        &["alpha beta gamma delta epsilon zeta eta theta iota kappa"],
    );

    let (db, _store, pipeline) = test_harness().await;
    let shutdown = CancellationToken::new();

    scan_and_enqueue(library.path(), &db, &shutdown)
        .await
        .expect("scan");

    let mut workers = Vec::new();
    for stage in [
        PipelineStage::Cracking,
        PipelineStage::Chunking,
        PipelineStage::Embedding,
    ] {
        workers.push(tokio::spawn(run_worker_loop(
            Arc::clone(&db),
            Arc::clone(&pipeline),
            stage,
            shutdown.clone(),
        )));
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let done = ExtractedDocument::find_by_path(&pdf_path.to_string_lossy(), &db)
            .await
            .expect("find")
            .is_some_and(|d| d.is_fully_processed);
        if done {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pipeline did not finish before the deadline"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    shutdown.cancel();
    for worker in workers {
        worker
            .await
            .expect("worker join")
            .expect("worker loop result");
    }
}
