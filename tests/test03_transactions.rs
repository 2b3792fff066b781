use std::sync::Arc;

use sql_conduit::test_utils::MockAdapter;
use sql_conduit::{DatabaseHandle, DbConfig, SqlConduitError};
use tokio::runtime::Runtime;

fn pooled_handle(adapter: Arc<MockAdapter>, max_connections: usize) -> Arc<DatabaseHandle> {
    let config = DbConfig {
        single_threaded: Some(false),
        max_connections: Some(max_connections),
        ..DbConfig::default()
    };
    Arc::new(DatabaseHandle::new(config, adapter))
}

#[test]
fn nested_transactions_share_one_begin_commit_pair() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let adapter = Arc::new(MockAdapter::new("mock"));
        let log = adapter.log();
        // Pool of one: a true nested BEGIN would deadlock here.
        let db = pooled_handle(adapter, 1);

        let inner_db = db.clone();
        db.transaction(move |outer_conn| {
            Box::pin(async move {
                outer_conn.execute("INSERT INTO t VALUES (1)").await?;
                let joined = inner_db
                    .transaction(move |inner_conn| {
                        Box::pin(async move {
                            inner_conn.execute("INSERT INTO t VALUES (2)").await?;
                            Ok(inner_conn)
                        })
                    })
                    .await?;
                // The nested call joined the outer transaction on the same
                // physical connection.
                assert!(joined.same_connection(&outer_conn));
                Ok(())
            })
        })
        .await?;

        assert_eq!(
            log.entries(),
            vec![
                "BEGIN",
                "INSERT INTO t VALUES (1)",
                "INSERT INTO t VALUES (2)",
                "COMMIT"
            ]
        );
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn body_failure_rolls_back_and_reraises_unchanged() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let adapter = Arc::new(MockAdapter::new("mock"));
        let log = adapter.log();
        let db = pooled_handle(adapter, 1);

        let err = db
            .transaction(|conn| {
                Box::pin(async move {
                    conn.execute("UPDATE t SET a = 1").await?;
                    Err::<(), _>(SqlConduitError::UnsupportedLiteral(
                        "no SQL representation".to_string(),
                    ))
                })
            })
            .await
            .unwrap_err();

        // Original failure kind survives the rollback.
        assert!(matches!(err, SqlConduitError::UnsupportedLiteral(_)));
        assert_eq!(log.count_of("BEGIN"), 1);
        assert_eq!(log.count_of("ROLLBACK"), 1);
        assert_eq!(log.count_of("COMMIT"), 0);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn commit_failure_rolls_back_and_surfaces_the_commit_error()
-> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let adapter = Arc::new(MockAdapter::new("mock").with_failing_sql(|sql| {
            (sql == "COMMIT")
                .then(|| SqlConduitError::TransactionFailure("commit refused".to_string()))
        }));
        let log = adapter.log();
        let db = pooled_handle(adapter, 1);

        let err = db
            .transaction(|conn| Box::pin(async move { conn.execute("INSERT INTO t").await }))
            .await
            .unwrap_err();

        match err {
            SqlConduitError::TransactionFailure(msg) => assert!(msg.contains("commit refused")),
            other => panic!("expected TransactionFailure, got {other:?}"),
        }
        assert_eq!(log.count_of("ROLLBACK"), 1);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn independent_callers_run_concurrent_top_level_transactions()
-> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let adapter = Arc::new(MockAdapter::new("mock"));
        let log = adapter.log();
        let db = pooled_handle(adapter, 2);

        let mut tasks = Vec::new();
        for i in 0..2 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                db.transaction(move |conn| {
                    Box::pin(async move {
                        conn.execute(&format!("INSERT INTO t VALUES ({i})")).await
                    })
                })
                .await
            }));
        }
        for task in tasks {
            task.await??;
        }

        // Each caller got its own BEGIN/COMMIT pair.
        assert_eq!(log.count_of("BEGIN"), 2);
        assert_eq!(log.count_of("COMMIT"), 2);
        assert_eq!(log.count_of("ROLLBACK"), 0);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn statements_through_the_handle_join_the_open_transaction()
-> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let adapter = Arc::new(MockAdapter::new("mock"));
        let log = adapter.log();
        // Pool of one: a second borrow inside the body would deadlock.
        let db = pooled_handle(adapter, 1);

        let inner_db = db.clone();
        db.transaction(move |_conn| {
            Box::pin(async move { inner_db.execute("DELETE FROM t").await })
        })
        .await?;

        assert_eq!(log.entries(), vec!["BEGIN", "DELETE FROM t", "COMMIT"]);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn single_threaded_handles_use_the_same_bracketing() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let adapter = Arc::new(MockAdapter::new("mock"));
        let log = adapter.log();
        let config = DbConfig {
            single_threaded: Some(true),
            ..DbConfig::default()
        };
        let db = Arc::new(DatabaseHandle::new(config, adapter));

        let inner_db = db.clone();
        db.transaction(move |_conn| {
            Box::pin(async move {
                inner_db
                    .transaction(|conn| {
                        Box::pin(async move { conn.execute("INSERT INTO t VALUES (9)").await })
                    })
                    .await
            })
        })
        .await?;

        assert_eq!(
            log.entries(),
            vec!["BEGIN", "INSERT INTO t VALUES (9)", "COMMIT"]
        );
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
