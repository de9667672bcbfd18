//! End-to-end duplicate reporting and exclusion flows.
//!
//! Embeddings are attached directly to persisted units so the flows run
//! against a deterministic similarity field with no embedding service.

use std::path::Path;

use dry_core::pipeline::{Engine, InitOptions};
use dry_core::types::{IndexUnit, UnitType};

const SAMPLE_JAVA: &str = r#"
public class Sample {
    int sum(int a, int b) {
        int total = a + b;
        trace(total);
        return total;
    }
}
"#;

const OTHER_JAVA: &str = r#"
public class Other {
    int add(int x, int y) {
        int total = x + y;
        trace(total);
        return total;
    }
}
"#;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    std::fs::write(path, content).expect("write");
}

/// Give every persisted unit the same vector: all pairs become perfectly
/// similar, which drives detection without an embedding service.
fn attach_uniform_embeddings(engine: &Engine) {
    let mut units: Vec<IndexUnit> = engine.store().get_all_units().expect("units");
    for unit in &mut units {
        unit.embedding = Some(vec![1.0, 0.0, 0.5]);
    }
    engine.store().update_units(&units).expect("update");
}

async fn indexed_engine(dir: &Path) -> Engine {
    let mut engine = Engine::open(dir).await.expect("open");
    engine
        .init(&InitOptions { skip_embeddings: true })
        .await
        .expect("init");
    attach_uniform_embeddings(&engine);
    engine
}

#[tokio::test]
async fn identical_functions_produce_a_function_group_with_canonical_key() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write(dir.path(), "a/Sample.java", SAMPLE_JAVA);
    write(dir.path(), "b/Other.java", OTHER_JAVA);

    let mut engine = indexed_engine(dir.path()).await;
    let report = engine.build_duplicate_report().await.expect("report");

    let function_group = report
        .duplicates
        .iter()
        .find(|g| g.left.unit_type == UnitType::Function)
        .expect("function duplicate group");
    assert_eq!(
        function_group.exclusion_string,
        "function|Other.add(arity:2)|Sample.sum(arity:2)"
    );
    let short_len = function_group.short_id.len();
    assert!((8..=22).contains(&short_len));
    assert!(report.score.score > 0.0);

    // Descending similarity, ties broken by pair key.
    for pair in report.duplicates.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
        if (pair[0].similarity - pair[1].similarity).abs() < 1e-12 {
            assert!(pair[0].exclusion_string <= pair[1].exclusion_string);
        }
    }
}

#[tokio::test]
async fn excluding_a_group_removes_it_and_survives_cleanup() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write(dir.path(), "a/Sample.java", SAMPLE_JAVA);
    write(dir.path(), "b/Other.java", OTHER_JAVA);

    let mut engine = indexed_engine(dir.path()).await;
    let first = engine.build_duplicate_report().await.expect("report");
    let function_group = first
        .duplicates
        .iter()
        .find(|g| g.left.unit_type == UnitType::Function)
        .expect("function group")
        .clone();

    // The reporting collaborator writes the payload; exclusion commands
    // resolve short ids against the latest written report.
    let reports_dir = engine.reports_dir();
    std::fs::create_dir_all(&reports_dir).expect("mkdir reports");
    std::fs::write(
        reports_dir.join("dupes-2026-08-01T00-00-00.000Z.json"),
        serde_json::to_string_pretty(&first).expect("serialize"),
    )
    .expect("write report");

    let added = engine
        .add_exclusion(&function_group.short_id)
        .await
        .expect("exclude");
    assert!(added);

    // Idempotence: the second application reports nothing added.
    let added_again = engine
        .add_exclusion(&function_group.short_id)
        .await
        .expect("exclude again");
    assert!(!added_again);

    let second = engine.build_duplicate_report().await.expect("report");
    assert_eq!(second.duplicates.len(), first.duplicates.len() - 1);
    assert!(second
        .duplicates
        .iter()
        .all(|g| g.exclusion_string != function_group.exclusion_string));

    // The excluded pair still exists in the code, so cleanup keeps it.
    let cleanup = engine.clean_exclusions().await.expect("cleanup");
    assert_eq!(cleanup.kept, 1);
    assert_eq!(cleanup.removed, 0);
}

#[tokio::test]
async fn stale_exclusions_are_removed_by_cleanup() {
    let dir = tempfile::tempdir().expect("create temp dir");
    write(dir.path(), "a/Sample.java", SAMPLE_JAVA);
    write(
        dir.path(),
        "dryconfig.json",
        r#"{"excludedPairs": ["function|Gone.f(arity:1)|Gone.g(arity:1)", "not a pair key"]}"#,
    );

    let mut engine = indexed_engine(dir.path()).await;
    let cleanup = engine.clean_exclusions().await.expect("cleanup");
    assert_eq!(cleanup.kept, 0);
    assert_eq!(cleanup.removed, 2);

    // The pruned config was persisted.
    let raw = std::fs::read_to_string(dir.path().join("dryconfig.json")).expect("read");
    assert!(!raw.contains("Gone.f"));
}

#[tokio::test]
async fn blocks_differing_only_in_comments_pair_up() {
    let left = r#"
public class LeftJob {
    int process(int[] values) {
        int total = 0;
        for (int v : values) {
            int doubled = v * 2; // double it
            int shifted = doubled + 1;
            total += shifted;
            audit(total);
        }
        return total;
    }
}
"#;
    let right = r#"
public class RightJob {
    int handle(int[] values) {
        int total = 0;
        for (int v : values) {
            int doubled = v * 2;
            int shifted = doubled + 1; /* offset */
            total  +=  shifted;
            audit(total);
        }
        return total;
    }
}
"#;

    let dir = tempfile::tempdir().expect("create temp dir");
    write(dir.path(), "a/LeftJob.java", left);
    write(dir.path(), "b/RightJob.java", right);

    let mut engine = indexed_engine(dir.path()).await;
    let report = engine.build_duplicate_report().await.expect("report");

    let block_group = report
        .duplicates
        .iter()
        .find(|g| g.left.unit_type == UnitType::Block)
        .expect("block duplicate group");

    // Comments and spacing differ, yet both sides hash identically.
    let (_, a, b) = dry_core::pairs::parse_pair_key(&block_group.exclusion_string)
        .expect("well-formed key");
    assert_eq!(a, b);
}
