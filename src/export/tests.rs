//! End-to-end engine scenarios over in-memory sources and sinks.

use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::{Binary, Bson, Document, doc, spec::BinarySubtype};

use super::source::fields_to_projection;
use super::*;
use crate::error::ExportError;

fn taxlots_account() -> Document {
    doc! {
        "_id": "myId",
        "firstName": "Bob",
        "taxlots": [ { "rec": 0 }, { "rec": 1 }, { "rec": 2 } ],
    }
}

fn options(concurrency: usize) -> PipelineOptions {
    PipelineOptions {
        concurrency,
        progress_interval: Duration::from_secs(1),
    }
}

fn csv_encoder(fields: &[&str], header: bool) -> Arc<TabularEncoder> {
    let columns = Arc::new(ColumnSet::from_fields(fields.iter().copied()).unwrap());
    Arc::new(TabularEncoder::new(columns, ",", DateFormat::default()).with_header(header))
}

async fn run_to_string<S: RecordSource>(
    encoder: Arc<dyn DocumentEncoder>,
    source: S,
    concurrency: usize,
) -> crate::error::Result<String> {
    let pipeline = ExportPipeline::new(encoder, options(concurrency));
    let run = pipeline.run(source, OutputSink::new(Vec::new(), "memory")).await?;
    Ok(String::from_utf8(run.output).unwrap())
}

/// Data rows sorted, header kept in front.
fn normalized(output: &str, has_header: bool) -> Vec<String> {
    let mut lines: Vec<String> = output.lines().map(str::to_string).collect();
    let start = usize::from(has_header);
    lines[start..].sort();
    lines
}

#[tokio::test]
async fn test_unwound_csv_scenario() {
    let source = Unwind::new(VecSource::new(vec![taxlots_account()]), "taxlots");
    let output = run_to_string(csv_encoder(&["taxlots.rec", "firstName"], true), source, 1)
        .await
        .unwrap();

    assert_eq!(output, "taxlots.rec,firstName\n0,Bob\n1,Bob\n2,Bob\n");
}

#[tokio::test]
async fn test_unwound_csv_scenario_concurrent() {
    let source = Unwind::new(VecSource::new(vec![taxlots_account()]), "taxlots");
    let output = run_to_string(csv_encoder(&["taxlots.rec", "firstName"], true), source, 4)
        .await
        .unwrap();

    assert_eq!(
        normalized(&output, true),
        vec!["taxlots.rec,firstName", "0,Bob", "1,Bob", "2,Bob"]
    );
}

/// Applies an inclusion projection the way the server does: listed paths are
/// kept, arrays of documents are projected element-wise, `_id` is kept unless
/// excluded.
fn apply_inclusion(doc: &Document, projection: &Document) -> Document {
    let mut paths: Vec<Vec<&str>> = projection
        .iter()
        .filter(|(_, v)| v.as_i32() == Some(1))
        .map(|(k, _)| k.split('.').collect())
        .collect();
    if !projection.contains_key("_id") {
        paths.push(vec!["_id"]);
    }
    project_paths(doc, &paths)
}

fn project_paths(doc: &Document, paths: &[Vec<&str>]) -> Document {
    let mut out = Document::new();
    for (key, value) in doc {
        let rests: Vec<Vec<&str>> = paths
            .iter()
            .filter(|p| p[0] == key.as_str())
            .map(|p| p[1..].to_vec())
            .collect();
        if rests.is_empty() {
            continue;
        }
        if rests.iter().any(Vec::is_empty) {
            out.insert(key, value.clone());
            continue;
        }
        match value {
            Bson::Document(nested) => {
                out.insert(key, project_paths(nested, &rests));
            }
            Bson::Array(items) => {
                let projected: Vec<Bson> = items
                    .iter()
                    .filter_map(|item| item.as_document())
                    .map(|nested| Bson::Document(project_paths(nested, &rests)))
                    .collect();
                out.insert(key, projected);
            }
            _ => {}
        }
    }
    out
}

#[tokio::test]
async fn test_json_scenario() {
    let projection = fields_to_projection(["firstName", "taxlots.rec"]);
    let projected = apply_inclusion(&taxlots_account(), &projection);
    assert!(!projected.contains_key("_id"));

    let output = run_to_string(
        Arc::new(JsonEncoder::new(JsonFormat::Relaxed)),
        VecSource::new(vec![projected]),
        2,
    )
    .await
    .unwrap();

    assert_eq!(
        output,
        "{\"firstName\": \"Bob\", \"taxlots\": [{\"rec\": 0}, {\"rec\": 1}, {\"rec\": 2}]}\n"
    );
}

#[tokio::test]
async fn test_json_keeps_id_when_listed() {
    let projection = fields_to_projection(["_id", "firstName"]);
    let projected = apply_inclusion(&taxlots_account(), &projection);

    let output = run_to_string(
        Arc::new(JsonEncoder::new(JsonFormat::Relaxed)),
        VecSource::new(vec![projected]),
        1,
    )
    .await
    .unwrap();

    assert_eq!(output, "{\"_id\": \"myId\", \"firstName\": \"Bob\"}\n");
}

#[tokio::test]
async fn test_header_alone_for_empty_source() {
    let output = run_to_string(csv_encoder(&["a", "b.c"], true), VecSource::new(Vec::new()), 3)
        .await
        .unwrap();
    assert_eq!(output, "a,b.c\n");
}

#[tokio::test]
async fn test_field_count_matches_columns() {
    let docs = vec![
        doc! { "a": 1 },
        doc! { "b": { "c": "x" }, "z": true },
        doc! {},
        doc! { "a": null, "b": { "c": null }, "d": [1, 2] },
        doc! { "d": [ { "e": 1.5 } ], "a": "first" },
    ];
    let fields = ["a", "b.c", "d.0", "d.0.e"];
    let output = run_to_string(csv_encoder(&fields, false), VecSource::new(docs), 2)
        .await
        .unwrap();

    let rows: Vec<&str> = output.lines().collect();
    assert_eq!(rows.len(), 5);
    for row in rows {
        assert_eq!(row.split(',').count(), fields.len(), "row {row:?}");
    }
}

#[tokio::test]
async fn test_column_order_ignores_document_order() {
    let docs = vec![doc! { "age": 41, "name": "Eve" }, doc! { "name": "Joe", "age": 7 }];
    let output = run_to_string(csv_encoder(&["name", "age"], true), VecSource::new(docs), 1)
        .await
        .unwrap();
    assert_eq!(output, "name,age\nEve,41\nJoe,7\n");
}

#[tokio::test]
async fn test_unwind_repeats_other_columns() {
    let doc = doc! { "owner": "Ann", "tags": ["x", "y", "z", "w"], "n": 5 };
    let source = Unwind::new(VecSource::new(vec![doc]), "tags");
    let output = run_to_string(csv_encoder(&["owner", "tags", "n"], false), source, 2)
        .await
        .unwrap();

    assert_eq!(
        normalized(&output, false),
        vec!["Ann,w,5", "Ann,x,5", "Ann,y,5", "Ann,z,5"]
    );
}

#[tokio::test]
async fn test_unsupported_type_aborts_without_partial_row() {
    let bad = doc! {
        "name": "blob",
        "data": Binary { subtype: BinarySubtype::Generic, bytes: vec![0, 1] },
    };
    let encoder = csv_encoder(&["name", "data"], false);

    // Encoding the document alone never yields a row
    let err = encoder.encode(&bad).unwrap_err();
    assert!(err.to_string().contains("field 'data'"));

    let err = run_to_string(encoder, VecSource::new(vec![doc! { "name": "ok" }, bad]), 1)
        .await
        .unwrap_err();
    assert!(err.is_unsupported_type());
    assert!(matches!(err, ExportError::Encode(_)));
}

#[tokio::test]
async fn test_flattened_leaves_match_tabular_cells() {
    let doc = doc! { "a": { "b": [ { "c": 1 }, { "c": 3 } ] }, "d": "e" };
    let leaves = flatten_leaves(&doc);
    let fields: Vec<&str> = leaves.keys().map(String::as_str).collect();
    assert_eq!(fields, vec!["a.b.0.c", "a.b.1.c", "d"]);

    let output = run_to_string(csv_encoder(&fields, true), VecSource::new(vec![doc]), 1)
        .await
        .unwrap();
    assert_eq!(output, "a.b.0.c,a.b.1.c,d\n1,3,e\n");
}

#[tokio::test]
async fn test_large_run_writes_every_record() {
    let docs: Vec<Document> = (0..500).map(|n| doc! { "n": n, "sq": n * n }).collect();
    let output = run_to_string(csv_encoder(&["n", "sq"], false), VecSource::new(docs), 8)
        .await
        .unwrap();

    let mut seen: Vec<i32> = output
        .lines()
        .map(|line| line.split(',').next().unwrap().parse().unwrap())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..500).collect::<Vec<_>>());
}
