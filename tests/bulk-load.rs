mod fixture;

use fixture::Pipeline;
use mysql_docsync::app::readiness_gate;
use mysql_docsync::bootstrap::{BulkLoader, TableLoad};
use mysql_docsync::document;
use mysql_docsync::document::FieldValue;
use mysql_docsync::error::Error;
use mysql_docsync::replication::BinlogPosition;
use mysql_docsync::test_util::SnapshotStub;
use std::path::PathBuf;

fn work_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("docsync-{name}-{}", std::process::id()))
}

fn orders() -> Vec<Vec<Option<&'static str>>> {
    vec![
        vec![Some("5"), Some("99.5000")],
        vec![Some("8"), None],
        vec![Some("broken"), Some("1.0000")],
    ]
}

#[tokio::test]
async fn loads_tables_exported_at_shared_position() -> Result<(), Error> {
    let pipeline = Pipeline::new().await?;
    let position = BinlogPosition::new("bin.000031", 1200);
    let source = SnapshotStub::at(position.clone())
        .with_table("shop", "orders", &["id", "total"], orders())
        .with_table("shop", "logs", &["id", "msg"], vec![vec![Some("1"), Some("tab\there")]]);

    let loader = BulkLoader::new(pipeline.sink.clone(), source, work_dir("shared"));
    let loads = loader
        .load_tables("shop", &["orders".to_string(), "logs".to_string()])
        .await?;

    assert_eq!(
        loads[0],
        (
            "orders".to_string(),
            TableLoad::Loaded {
                rows: 3,
                failed_rows: 0,
                position: position.clone()
            }
        )
    );
    assert_eq!(pipeline.checkpoint.read().await?, Some(position));
    assert_eq!(
        pipeline.documents("shop", "logs").await,
        vec![document! {"id" => "1", "msg" => "tab\there"}]
    );
    assert_eq!(
        pipeline.checkpoint.loaded_tables("shop").await?,
        vec!["orders".to_string(), "logs".to_string()]
    );

    Ok(())
}

#[tokio::test]
async fn coerces_exported_values_with_bootstrapped_schema() -> Result<(), Error> {
    let pipeline = Pipeline::bootstrapped().await?;
    let source = SnapshotStub::at(BinlogPosition::new("bin.000031", 1200))
        .with_table("shop", "orders", &["id", "total"], orders());

    let loader = BulkLoader::new(pipeline.sink.clone(), source, work_dir("coerced"));
    let load = loader.load_table("shop", "orders").await?;

    assert!(matches!(
        load,
        TableLoad::Loaded {
            rows: 2,
            failed_rows: 1,
            ..
        }
    ));
    assert_eq!(
        pipeline.documents("shop", "orders").await,
        vec![
            document! {"id" => 5, "total" => 99.5},
            document! {"id" => 8, "total" => FieldValue::Null},
        ]
    );
    assert_eq!(
        pipeline.checkpoint.read().await?,
        Some(BinlogPosition::new("bin.000025", 250160467))
    );

    Ok(())
}

#[tokio::test]
async fn moving_source_leaves_table_untouched() -> Result<(), Error> {
    let pipeline = Pipeline::bootstrapped().await?;
    let before = BinlogPosition::new("bin.000031", 1200);
    let after = BinlogPosition::new("bin.000031", 1480);
    let source = SnapshotStub::with_positions([before.clone(), after.clone()])
        .with_table("shop", "orders", &["id", "total"], orders());

    let loader = BulkLoader::new(pipeline.sink.clone(), source, work_dir("moving"));
    let loads = loader.load_tables("shop", &["orders".to_string()]).await?;

    assert_eq!(
        loads,
        vec![("orders".to_string(), TableLoad::SourceChanged { before, after })]
    );
    assert_eq!(pipeline.documents("shop", "orders").await.len(), 2);
    assert!(matches!(
        readiness_gate(
            &pipeline.checkpoint,
            &["shop".to_string()],
            &["orders".to_string()]
        )
        .await,
        Err(Error::TablesNotLoaded(missing)) if missing == vec!["orders".to_string()]
    ));

    Ok(())
}
