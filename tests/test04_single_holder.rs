use std::sync::Arc;

use sql_conduit::test_utils::MockAdapter;
use sql_conduit::{SingleConnectionHolder, SqlConduitError};
use tokio::runtime::Runtime;

#[test]
fn recursive_hold_observes_the_memoized_connection() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let adapter = Arc::new(MockAdapter::new("mock"));
        let holder = Arc::new(SingleConnectionHolder::new(adapter.clone()));

        let nested = holder.clone();
        holder
            .hold(move |outer_conn| {
                Box::pin(async move {
                    nested
                        .hold(move |inner_conn| {
                            Box::pin(async move {
                                assert!(inner_conn.same_connection(&outer_conn));
                                inner_conn.execute("SELECT 1").await
                            })
                        })
                        .await
                })
            })
            .await?;

        // One materialization for the outer and the nested call alike.
        assert_eq!(adapter.connect_count(), 1);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn connection_is_memoized_across_holds() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let adapter = Arc::new(MockAdapter::new("mock"));
        let holder = SingleConnectionHolder::new(adapter.clone());

        let first = holder.connection().await?;
        let second = holder.connection().await?;
        assert!(first.same_connection(&second));
        assert_eq!(adapter.connect_count(), 1);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn failed_materialization_is_retried_on_next_use() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let adapter = Arc::new(MockAdapter::new("mock"));
        let holder = SingleConnectionHolder::new(adapter.clone());

        adapter.set_fail_connect(true);
        let err = holder.connection().await.unwrap_err();
        assert!(err.is_connection_failure());

        adapter.set_fail_connect(false);
        holder.connection().await?;
        assert_eq!(adapter.connect_count(), 1);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn foreign_failures_are_downgraded_to_opaque_errors() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let holder = SingleConnectionHolder::new(Arc::new(MockAdapter::new("mock")));

        let err = holder
            .hold(|_conn| {
                Box::pin(async {
                    Err::<(), _>(std::io::Error::other("interrupt leaked from a helper"))
                })
            })
            .await
            .unwrap_err();

        match err {
            SqlConduitError::Other(msg) => assert!(msg.contains("interrupt leaked")),
            other => panic!("expected Other, got {other:?}"),
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn recognized_failures_pass_through_unchanged() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let holder = SingleConnectionHolder::new(Arc::new(MockAdapter::new("mock")));

        let err = holder
            .hold(|_conn| {
                Box::pin(async {
                    Err::<(), _>(SqlConduitError::UnsupportedLiteral("NaN".to_string()))
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SqlConduitError::UnsupportedLiteral(_)));
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
