/// End-to-end tests for the cardrag pipeline.
///
/// Tests the complete flow:
///   Corpus → Chunker → Embedder → Store → Retriever
use cardrag::config::Config;
use cardrag::embedder::Embedder;
use cardrag::embedder::mock::MockEmbedder;
use cardrag::store::{self, StoreError};
use cardrag::{ChunkPolicy, Corpus, IndexHandle, Indexer, Location, RetrieveError, Retriever};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_policies(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("access_control.md"),
        "# Access control\n\nAccess follows least privilege.\n\nAdmin rights expire after 30 days.",
    )
    .unwrap();
    fs::write(
        dir.join("incident_response.txt"),
        "Severity one incidents page the on-call engineer.\n\nCustomer data exposure is always a crisis.",
    )
    .unwrap();
    fs::write(dir.join("README.png"), [0u8, 1, 2, 3]).unwrap();
}

/// Minimal PDF with one line of Courier text per page.
fn write_pdf(path: &Path, pages: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
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
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// Full pipeline over a policy folder: build → load → search.
#[test]
fn test_policy_folder_pipeline() {
    let temp_dir = tempdir().unwrap();
    let docs_dir = temp_dir.path().join("policies");
    write_policies(&docs_dir);
    let index_path = temp_dir.path().join("index").join("index.db");

    let embedder = MockEmbedder::default();
    let corpus = Corpus::from_path(&docs_dir).unwrap();
    let indexer = Indexer::new(&embedder, ChunkPolicy::per_section());
    let report = indexer.build(&corpus, &index_path).unwrap();

    assert_eq!(report.documents, 2, "png files are not source documents");
    assert_eq!(report.chunks, 5);
    assert_eq!(report.dimensions, 384);

    let index = store::load(&index_path).unwrap();
    assert_eq!(index.chunks.len(), index.embeddings.rows());
    assert_eq!(index.chunks[0].id, "access_control.md#sec1");
    assert_eq!(index.chunks[0].text, "# Access control");
    assert_eq!(index.chunks[4].location, Location::Section { ordinal: 2 });

    // Querying with a chunk's exact text must rank that chunk first
    let retriever = Retriever::open(&embedder, &index_path);
    let hits = retriever
        .search("Customer data exposure is always a crisis.", 3)
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].chunk.id, "incident_response.txt#sec2");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert_eq!(hits[0].citation(), "incident_response.txt, section 2");
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // Asking for more than exists returns everything
    assert_eq!(retriever.search("anything", 50).unwrap().len(), 5);
}

/// PDF book: size-bounded cards, one page never merged into another.
#[test]
fn test_pdf_book_pipeline() {
    let temp_dir = tempdir().unwrap();
    let pdf_path = temp_dir.path().join("book.pdf");
    write_pdf(&pdf_path, &["Hello World!", "Second page text"]);
    let index_path = temp_dir.path().join("book.db");

    let corpus = Corpus::from_path(&pdf_path).unwrap();
    let docs = corpus.load().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].source_name, "book.pdf");

    let embedder = MockEmbedder::new(64);
    let indexer = Indexer::new(&embedder, ChunkPolicy::size_bounded(400));
    let report = indexer.build(&corpus, &index_path).unwrap();
    assert_eq!(report.chunks, 2);

    let index = store::load(&index_path).unwrap();
    assert_eq!(index.chunks[0].id, "book.pdf#p1.1");
    assert_eq!(index.chunks[1].id, "book.pdf#p2.1");
    assert!(index.chunks[0].text.contains("Hello World!"));
    assert_eq!(index.chunks[1].location, Location::Page { page: 2, part: 1 });
    assert!(index.meta.source.starts_with("pdf:"));
    assert_eq!(index.meta.chunk_policy, "size-bounded(max_chars=400)");
}

/// Rebuilding the same corpus yields the same chunks and vectors.
#[test]
fn test_rebuild_is_reproducible() {
    let temp_dir = tempdir().unwrap();
    let docs_dir = temp_dir.path().join("policies");
    write_policies(&docs_dir);

    let embedder = MockEmbedder::new(32);
    let indexer = Indexer::new(&embedder, ChunkPolicy::size_bounded(60));
    let corpus = Corpus::Directory(docs_dir);

    let a = temp_dir.path().join("a.db");
    let b = temp_dir.path().join("b.db");
    indexer.build(&corpus, &a).unwrap();
    indexer.build(&corpus, &b).unwrap();

    let first = store::load(&a).unwrap();
    let second = store::load(&b).unwrap();
    assert_eq!(first.chunks, second.chunks);
    assert_eq!(first.embeddings, second.embeddings);
}

/// Five chunk records with four embedding rows must not load.
#[test]
fn test_truncated_embeddings_are_corrupt() {
    let temp_dir = tempdir().unwrap();
    let docs_dir = temp_dir.path().join("policies");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(docs_dir.join("five.md"), "a\n\nb\n\nc\n\nd\n\ne").unwrap();
    let index_path = temp_dir.path().join("index.db");

    let embedder = MockEmbedder::new(8);
    Indexer::new(&embedder, ChunkPolicy::per_section())
        .build(&Corpus::Directory(docs_dir), &index_path)
        .unwrap();

    {
        let conn = rusqlite::Connection::open(&index_path).unwrap();
        conn.execute("DELETE FROM embeddings WHERE ordinal = 2", [])
            .unwrap();
    }

    let err = store::load(&index_path).unwrap_err();
    assert!(matches!(err, StoreError::CorruptIndex { .. }), "{err:?}");

    let retriever = Retriever::new(&embedder, IndexHandle::from_path(&index_path, None));
    assert!(matches!(
        retriever.search("a", 3),
        Err(RetrieveError::Store(StoreError::CorruptIndex { .. }))
    ));
}

/// Searching before any build surfaces IndexNotFound.
#[test]
fn test_search_before_build() {
    let temp_dir = tempdir().unwrap();
    let embedder = MockEmbedder::new(8);
    let retriever = Retriever::open(&embedder, temp_dir.path().join("missing.db"));

    assert!(matches!(
        retriever.search("where is the index?", 3),
        Err(RetrieveError::Store(StoreError::IndexNotFound(_)))
    ));
}

/// A different configured model only warns.
#[test]
fn test_model_mismatch_is_not_fatal() {
    let temp_dir = tempdir().unwrap();
    let docs_dir = temp_dir.path().join("policies");
    write_policies(&docs_dir);
    let index_path = temp_dir.path().join("index.db");

    let embedder = MockEmbedder::default();
    Indexer::new(&embedder, ChunkPolicy::per_section())
        .build(&Corpus::Directory(docs_dir), &index_path)
        .unwrap();

    let index = store::load_checked(&index_path, "all-MiniLM-L6-v2").unwrap();
    assert_eq!(index.meta.model_name, "mock-hash");
}

/// Batch embedding keeps input order.
#[test]
fn test_batch_embedding_order() {
    let embedder = MockEmbedder::default();
    let texts = ["t1", "t2", "t3"];

    let batch = embedder.embed(&texts).unwrap();
    assert_eq!(batch.len(), 3);
    for (i, text) in texts.iter().enumerate() {
        assert_eq!(batch[i], embedder.embed_one(text).unwrap());
    }
}

/// Config defaults drive the same build the CLI performs.
#[test]
fn test_config_driven_build() {
    let temp_dir = tempdir().unwrap();
    let docs_dir = temp_dir.path().join("policies");
    write_policies(&docs_dir);

    let config = Config {
        corpus_path: docs_dir.to_string_lossy().into_owned(),
        index_path: temp_dir
            .path()
            .join("idx.db")
            .to_string_lossy()
            .into_owned(),
        ..Config::default()
    };
    assert!(config.validate().is_ok());

    let corpus = config.corpus().unwrap();
    let policy = config.chunk_policy(&corpus);
    assert_eq!(policy, ChunkPolicy::per_section());

    let embedder = MockEmbedder::new(config.model.dimensions);
    let report = Indexer::new(&embedder, policy)
        .build(&corpus, &config.index_path())
        .unwrap();
    assert_eq!(report.chunks, 5);
}
