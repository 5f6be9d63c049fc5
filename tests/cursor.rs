//! Cursor pagination against a scripted server.

mod common;

use std::time::Duration;

use common::{FakeServer, ServerConn, STEP};
use reql_client::{Connection, Cursor, Format, QueryOptions, ReqlError, ResponseType, Term};
use serde_json::{json, Value};

/// Run a query and answer its START with `reply`.
async fn open_cursor(conn: &Connection, sc: &mut ServerConn, reply: Value) -> (i64, Cursor) {
    open_cursor_with(conn, sc, QueryOptions::new(), reply).await
}

async fn open_cursor_with(
    conn: &Connection,
    sc: &mut ServerConn,
    options: QueryOptions,
    reply: Value,
) -> (i64, Cursor) {
    let run = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.run(Term::new(json!([15, ["posts"]])), options)
                .await
        })
    };
    let (token, query) = sc.read_query().await;
    assert_eq!(query[0], json!(1));
    sc.reply(token, reply).await;

    let cursor = run
        .await
        .unwrap()
        .unwrap()
        .into_cursor()
        .expect("a cursor");
    assert_eq!(cursor.token(), token);
    (token, cursor)
}

#[tokio::test]
async fn test_partial_then_sequence() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (token, mut cursor) = open_cursor(&conn, &mut sc, json!({"t": 3, "r": [1, 2]})).await;
    assert!(cursor.has_more());

    // The next batch is requested right away.
    let (continue_token, query) = sc.read_query().await;
    assert_eq!(continue_token, token);
    assert_eq!(query, json!([2]));

    let mut items = cursor.iterate().unwrap();
    assert_eq!(items.next().await.unwrap().unwrap(), json!(1));
    assert_eq!(items.next().await.unwrap().unwrap(), json!(2));

    let blocked = tokio::time::timeout(Duration::from_millis(100), items.next()).await;
    assert!(blocked.is_err(), "iteration must wait for the next batch");

    sc.reply(token, json!({"t": 2, "r": [3]})).await;
    assert_eq!(
        tokio::time::timeout(STEP, items.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap(),
        json!(3)
    );
    assert!(items.next().await.is_none());
    assert!(!cursor.has_more());
    assert!(sc.is_silent_for(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_continue_batches_decode_with_query_options() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let time = json!({"$reql_type$": "TIME", "epoch_time": 1.5, "timezone": "+00:00"});
    let options = QueryOptions::new().time_format(Format::Raw);
    let (token, mut cursor) =
        open_cursor_with(&conn, &mut sc, options, json!({"t": 3, "r": [time.clone()]})).await;

    assert_eq!(sc.read_query().await, (token, json!([2])));
    sc.reply(token, json!({"t": 2, "r": [time.clone()]})).await;

    let items = tokio::time::timeout(STEP, cursor.collect()).await.unwrap().unwrap();
    assert_eq!(items, vec![time.clone(), time]);
}

#[tokio::test]
async fn test_feed_batches_keep_fetching() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (token, mut cursor) = open_cursor(&conn, &mut sc, json!({"t": 5, "r": ["a"]})).await;

    let feeder = tokio::spawn(async move {
        for batch in [json!({"t": 5, "r": ["b"]}), json!({"t": 5, "r": ["c"]})] {
            let (t, query) = sc.read_query().await;
            assert_eq!((t, query), (token, json!([2])));
            sc.reply(token, batch).await;
        }
        let _ = sc.read_query().await;
        sc.reply(token, json!({"t": 2, "r": []})).await;
        sc
    });

    let items = tokio::time::timeout(STEP, cursor.collect()).await.unwrap().unwrap();
    assert_eq!(items, vec![json!("a"), json!("b"), json!("c")]);
    feeder.await.unwrap();
}

#[tokio::test]
async fn test_single_sequence_needs_no_fetch() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (_, mut cursor) = open_cursor(&conn, &mut sc, json!({"t": 2, "r": [1, 2]})).await;

    assert!(!cursor.has_more());
    assert_eq!(cursor.buffered(), 2);
    assert_eq!(cursor.collect().await.unwrap(), vec![json!(1), json!(2)]);
    assert!(!cursor.close().await.unwrap());
    assert!(sc.is_silent_for(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_iterate_twice_fails() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (_, mut cursor) = open_cursor(&conn, &mut sc, json!({"t": 2, "r": [1]})).await;

    let _ = cursor.iterate().unwrap();
    assert!(matches!(cursor.iterate(), Err(ReqlError::AlreadyIterated)));
}

#[tokio::test]
async fn test_close_stops_open_stream() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (token, mut cursor) = open_cursor(&conn, &mut sc, json!({"t": 3, "r": [1]})).await;

    let close = tokio::spawn(async move {
        let stopped = cursor.close().await;
        (cursor, stopped)
    });

    assert_eq!(sc.read_query().await, (token, json!([2])));
    assert_eq!(sc.read_query().await, (token, json!([3])));
    sc.reply(token, json!({"t": 3, "r": [2]})).await;
    sc.reply(token, json!({"t": 2, "r": []})).await;

    let (mut cursor, stopped) = tokio::time::timeout(STEP, close).await.unwrap().unwrap();
    assert!(stopped.unwrap());
    assert!(!cursor.has_more());
    assert!(!cursor.close().await.unwrap());
}

#[tokio::test]
async fn test_dropped_open_cursor_sends_stop() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (token, cursor) = open_cursor(&conn, &mut sc, json!({"t": 3, "r": [1]})).await;

    drop(cursor);
    assert_eq!(sc.read_query().await, (token, json!([2])));
    assert_eq!(sc.read_query().await, (token, json!([3])));
    sc.reply(token, json!({"t": 3, "r": [2]})).await;
    sc.reply(token, json!({"t": 2, "r": []})).await;

    let run = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.run(Term::datum(json!(5)), QueryOptions::new()).await })
    };
    let (next, _) = sc.read_query().await;
    assert_ne!(next, token);
    sc.reply(next, json!({"t": 1, "r": [5]})).await;
    let result = tokio::time::timeout(STEP, run).await.unwrap().unwrap();
    assert_eq!(result.unwrap().into_datum(), Some(json!(5)));
}

#[tokio::test]
async fn test_dropped_exhausted_cursor_stays_silent() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (_, cursor) = open_cursor(&conn, &mut sc, json!({"t": 2, "r": [1]})).await;

    drop(cursor);
    assert!(sc.is_silent_for(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_close_rejects_malformed_stop_ack() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (token, mut cursor) = open_cursor(&conn, &mut sc, json!({"t": 3, "r": [1]})).await;

    let close = tokio::spawn(async move { cursor.close().await });
    let _continue = sc.read_query().await;
    let _stop = sc.read_query().await;
    sc.reply(token, json!({"t": 3, "r": [2]})).await;
    sc.reply(token, json!({"t": 2, "r": [9]})).await;

    let result = tokio::time::timeout(STEP, close).await.unwrap().unwrap();
    assert!(matches!(result, Err(ReqlError::MalformedResponse(_))));
}

#[tokio::test]
async fn test_cursor_is_stale_after_reconnect() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (_, mut cursor) = open_cursor(&conn, &mut sc, json!({"t": 3, "r": [1]})).await;
    assert!(!cursor.is_stale());

    conn.reconnect(false).await.unwrap();
    let _fresh = server.accept().await;

    assert!(cursor.is_stale());
    assert!(matches!(cursor.iterate(), Err(ReqlError::StaleCursor)));
    assert!(!cursor.close().await.unwrap());
}

#[tokio::test]
async fn test_connection_lost_mid_iteration() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (_, mut cursor) = open_cursor(&conn, &mut sc, json!({"t": 3, "r": [1]})).await;
    let _continue = sc.read_query().await;

    let mut items = cursor.iterate().unwrap();
    assert_eq!(items.next().await.unwrap().unwrap(), json!(1));
    drop(sc);

    let next = tokio::time::timeout(STEP, items.next()).await.unwrap();
    assert!(matches!(next, Some(Err(ReqlError::ConnectionClosed(_)))));
    assert!(items.next().await.is_none());
}

#[tokio::test]
async fn test_error_batch_ends_iteration() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;
    let (token, mut cursor) = open_cursor(&conn, &mut sc, json!({"t": 3, "r": [1]})).await;
    let _continue = sc.read_query().await;
    sc.reply(token, json!({"t": 18, "r": ["Cannot perform get on a stream."]}))
        .await;

    let mut items = cursor.iterate().unwrap();
    assert_eq!(items.next().await.unwrap().unwrap(), json!(1));
    match items.next().await {
        Some(Err(ReqlError::Server { kind, .. })) => assert_eq!(kind, ResponseType::RuntimeError),
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(items.next().await.is_none());
}

#[tokio::test]
async fn test_run_with_closes_cursor_after_callback() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;

    let run = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.run_with(Term::new(json!([15, ["posts"]])), QueryOptions::new(), |result| {
                Box::pin(async move {
                    let cursor = result.cursor_mut().expect("a cursor");
                    let mut items = cursor.iterate()?;
                    items.next().await.transpose()
                })
            })
            .await
        })
    };

    let (token, _) = sc.read_query().await;
    sc.reply(token, json!({"t": 3, "r": [1, 2]})).await;
    assert_eq!(sc.read_query().await, (token, json!([2])));
    assert_eq!(sc.read_query().await, (token, json!([3])));
    sc.reply(token, json!({"t": 3, "r": [3]})).await;
    sc.reply(token, json!({"t": 2, "r": []})).await;

    let first = tokio::time::timeout(STEP, run).await.unwrap().unwrap().unwrap();
    assert_eq!(first, Some(json!(1)));
}

#[tokio::test]
async fn test_run_with_callback_error_still_closes() {
    let mut server = FakeServer::start().await;
    let (conn, mut sc) = server.connect().await;

    let run = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.run_with::<(), _>(
                Term::new(json!([15, ["posts"]])),
                QueryOptions::new(),
                |_result| {
                    Box::pin(async { Err(ReqlError::ProtocolArgument("callback gave up".into())) })
                },
            )
            .await
        })
    };

    let (token, _) = sc.read_query().await;
    sc.reply(token, json!({"t": 3, "r": [1]})).await;
    let _continue = sc.read_query().await;
    assert_eq!(sc.read_query().await, (token, json!([3])));
    sc.reply(token, json!({"t": 3, "r": [2]})).await;
    sc.reply(token, json!({"t": 2, "r": []})).await;

    let result = tokio::time::timeout(STEP, run).await.unwrap().unwrap();
    assert!(matches!(result, Err(ReqlError::ProtocolArgument(_))));
}
