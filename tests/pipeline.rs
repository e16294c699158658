mod support;

use support::{bulk, err, int, ok, scripted_server, stalling_server};

use futures::FutureExt;
use mini_redis_pipeline::{
    cancellation, usage_error, Claim, Client, Pipeline, QueueCommands, State, Transaction,
    UsageError,
};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(vec![]))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// 排队 `INCR <key>`，把回复记录为 `<key> <n>`。
fn queue_incr(pipeline: &mut Pipeline, client: &mut Client, key: &'static str, log: &Log) {
    let log = log.clone();
    pipeline
        .queue_long(
            client,
            move |c| c.write_command(["INCR", key]),
            move |n| log.lock().unwrap().push(format!("{} {}", key, n)),
        )
        .unwrap();
}

#[tokio::test]
async fn set_get_incr_in_one_flush() {
    let (addr, server) = scripted_server(vec![ok(), bulk("v"), int(11)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    assert_eq!(client.claimed(), Some(Claim::Pipeline));

    let l = log.clone();
    pipeline
        .queue_void(
            &mut client,
            |c| c.write_command(["SET", "k", "v"]),
            move || l.lock().unwrap().push("set".to_string()),
        )
        .unwrap();
    let l = log.clone();
    pipeline
        .queue_bytes(
            &mut client,
            |c| c.write_command(["GET", "k"]),
            move |v| l.lock().unwrap().push(format!("get {:?}", v)),
        )
        .unwrap();
    let (l1, l2) = (log.clone(), log.clone());
    pipeline
        .queue(&mut client, |c| c.write_command(["INCR", "counter"]))
        .unwrap()
        .on_long(move |n| l1.lock().unwrap().push(format!("incr {}", n)))
        .on_bool(move |b| l2.lock().unwrap().push(format!("incr ok {}", b)))
        .complete_long()
        .unwrap();

    // 排队时写入已被缓冲，尚未读取任何内容。
    assert_eq!(client.pending_writes(), 3);
    assert!(entries(&log).is_empty());

    pipeline.flush_async(&mut client).await.unwrap();

    assert_eq!(
        entries(&log),
        vec!["set", "get Some(b\"v\")", "incr 11", "incr ok false"]
    );
    assert_eq!(pipeline.state(), State::Closed);
    assert_eq!(client.claimed(), None);
    assert!(!client.is_poisoned());

    drop(client);
    assert_eq!(
        server.join().unwrap(),
        vec![
            vec!["SET", "k", "v"],
            vec!["GET", "k"],
            vec!["INCR", "counter"]
        ]
    );
}

#[tokio::test]
async fn replies_are_dispatched_in_queue_order() {
    let (addr, _server) = scripted_server(vec![int(1), int(2), int(3), int(4)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    for key in ["a", "b", "c", "d"] {
        queue_incr(&mut pipeline, &mut client, key, &log);
    }
    assert_eq!(pipeline.len(), 4);

    pipeline.flush_async(&mut client).await.unwrap();
    assert_eq!(entries(&log), vec!["a 1", "b 2", "c 3", "d 4"]);
}

#[tokio::test]
async fn one_reply_reaches_every_listener() {
    let (addr, _server) = scripted_server(vec![int(1)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
    pipeline
        .queue(&mut client, |c| c.write_command(["DEL", "k"]))
        .unwrap()
        .on_bool(move |b| l1.lock().unwrap().push(format!("bool {}", b)))
        .on_int(move |n| l2.lock().unwrap().push(format!("int {}", n)))
        .on_void(move || l3.lock().unwrap().push("void".to_string()))
        .complete_int()
        .unwrap();

    pipeline.flush_async(&mut client).await.unwrap();
    assert_eq!(entries(&log), vec!["bool true", "int 1", "void"]);
}

#[tokio::test]
async fn empty_bulk_reads_as_no_value() {
    let (addr, _server) = scripted_server(vec![bulk("")]);
    let mut client = Client::connect(addr).await.unwrap();
    let seen = Arc::new(Mutex::new(None));

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    let s = seen.clone();
    pipeline
        .queue_bytes(
            &mut client,
            |c| c.write_command(["GET", "empty"]),
            move |v| *s.lock().unwrap() = Some(v),
        )
        .unwrap();

    pipeline.flush_async(&mut client).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(None));
}

#[tokio::test]
async fn handled_error_reply_does_not_poison() {
    let (addr, _server) = scripted_server(vec![int(1), err("ERR wrong type"), int(3)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    queue_incr(&mut pipeline, &mut client, "a", &log);

    let (l1, l2) = (log.clone(), log.clone());
    pipeline
        .queue(&mut client, |c| c.write_command(["INCR", "b"]))
        .unwrap()
        .on_long(move |n| l1.lock().unwrap().push(format!("b {}", n)))
        .on_error(move |e| l2.lock().unwrap().push(format!("b failed: {}", e)))
        .complete_long()
        .unwrap();

    queue_incr(&mut pipeline, &mut client, "c", &log);

    pipeline.flush_async(&mut client).await.unwrap();
    assert_eq!(
        entries(&log),
        vec!["a 1", "b failed: ERR wrong type", "c 3"]
    );
    assert!(!client.is_poisoned());
    assert_eq!(pipeline.state(), State::Closed);
}

#[tokio::test]
async fn unhandled_error_poisons_and_abandons_the_rest() {
    let (addr, _server) = scripted_server(vec![int(1), err("ERR boom"), int(3)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    for key in ["a", "b", "c"] {
        queue_incr(&mut pipeline, &mut client, key, &log);
    }

    let e = pipeline.flush_async(&mut client).await.unwrap_err();
    assert_eq!(e.to_string(), "ERR boom");

    assert_eq!(entries(&log), vec!["a 1"]);
    assert_eq!(pipeline.state(), State::Poisoned);
    assert!(client.is_poisoned());
    assert_eq!(client.claimed(), None);

    // 连接永久失去同步。
    let e = Pipeline::open(&mut client).unwrap_err();
    assert_eq!(usage_error(&e), Some(UsageError::ConnectionPoisoned));
    let e = client.read_reply().await.unwrap_err();
    assert_eq!(usage_error(&e), Some(UsageError::ConnectionPoisoned));
}

#[tokio::test]
async fn panicking_listener_poisons_and_releases() {
    let (addr, _server) = scripted_server(vec![int(1), int(2)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    pipeline
        .queue_long(
            &mut client,
            |c| c.write_command(["INCR", "a"]),
            |_| panic!("listener failed"),
        )
        .unwrap();
    queue_incr(&mut pipeline, &mut client, "b", &log);

    let e = pipeline.flush_async(&mut client).await.unwrap_err();
    assert_eq!(e.to_string(), "listener panicked: listener failed");

    assert!(entries(&log).is_empty());
    assert_eq!(pipeline.state(), State::Poisoned);
    assert!(client.is_poisoned());
    assert_eq!(client.claimed(), None);
}

#[tokio::test]
async fn panicking_listener_with_error_callback_keeps_going() {
    let (addr, _server) = scripted_server(vec![int(1), int(2)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    let l = log.clone();
    pipeline
        .queue(&mut client, |c| c.write_command(["INCR", "a"]))
        .unwrap()
        .on_long(|_| panic!("listener failed"))
        .on_error(move |err| l.lock().unwrap().push(err.to_string()))
        .complete_long()
        .unwrap();
    queue_incr(&mut pipeline, &mut client, "b", &log);

    pipeline.flush_async(&mut client).await.unwrap();

    assert_eq!(
        entries(&log),
        vec!["listener panicked: listener failed", "b 2"]
    );
    assert!(!client.is_poisoned());
    assert_eq!(client.claimed(), None);
}

#[tokio::test]
async fn async_batch_of_integer_replies() {
    let (addr, server) = scripted_server(vec![int(1), int(0), int(1), int(1)]);
    let mut client = Client::connect(addr).await.unwrap();

    let mut batch = client.pipeline_command();

    // 没有写入，就没有读取。
    assert!(batch.read_all_as_ints().await.unwrap().is_empty());

    batch.write(["SADD", "s", "a"]).unwrap();
    batch.write(["SADD", "s", "a"]).unwrap();
    assert_eq!(batch.count(), 2);
    batch.flush().await.unwrap();
    assert_eq!(batch.read_all_as_ints().await.unwrap(), vec![1, 0]);
    assert_eq!(batch.count(), 0);

    batch.write(["SADD", "s", "b"]).unwrap();
    batch.write(["SADD", "s", "c"]).unwrap();
    batch.flush().await.unwrap();
    assert!(batch.read_all_as_ints_have_success().await.unwrap());

    assert!(!client.is_poisoned());
    drop(client);
    assert_eq!(server.join().unwrap().len(), 4);
}

#[tokio::test]
async fn async_batch_read_failure_poisons() {
    let (addr, _server) = scripted_server(vec![int(1), bulk("nope")]);
    let mut client = Client::connect(addr).await.unwrap();

    let mut batch = client.pipeline_command();
    batch.write(["SADD", "s", "a"]).unwrap();
    batch.write(["SADD", "s", "b"]).unwrap();
    batch.flush().await.unwrap();
    assert!(batch.read_all_as_ints().await.is_err());
    assert_eq!(batch.count(), 0);

    assert!(client.is_poisoned());
}

#[tokio::test]
async fn server_hanging_up_mid_flush_poisons() {
    let (addr, server) = scripted_server(vec![int(1)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    for key in ["a", "b", "c"] {
        queue_incr(&mut pipeline, &mut client, key, &log);
    }

    let e = pipeline.flush_async(&mut client).await.unwrap_err();
    let io = e.downcast_ref::<std::io::Error>().unwrap();
    assert_eq!(io.kind(), ErrorKind::ConnectionReset);

    assert_eq!(entries(&log), vec!["a 1"]);
    assert!(client.is_poisoned());

    // 服务器断开前已收到所有请求。
    assert_eq!(server.join().unwrap().len(), 3);
}

#[tokio::test]
async fn only_one_batch_per_client() {
    let (addr, _server) = scripted_server(vec![int(1)]);
    let mut client = Client::connect(addr).await.unwrap();

    let pipeline = Pipeline::open(&mut client).unwrap();

    let e = Pipeline::open(&mut client).unwrap_err();
    assert_eq!(
        usage_error(&e),
        Some(UsageError::AlreadyClaimed(Claim::Pipeline))
    );
    let e = Transaction::open(&mut client).unwrap_err();
    assert_eq!(
        usage_error(&e),
        Some(UsageError::AlreadyClaimed(Claim::Pipeline))
    );
    let e = client.get("k").await.unwrap_err();
    assert_eq!(
        usage_error(&e),
        Some(UsageError::AlreadyClaimed(Claim::Pipeline))
    );

    pipeline.dispose(&mut client);
    assert_eq!(client.claimed(), None);

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    let log = log();
    queue_incr(&mut pipeline, &mut client, "k", &log);
    pipeline.flush_async(&mut client).await.unwrap();
    assert_eq!(entries(&log), vec!["k 1"]);
}

#[tokio::test]
async fn open_command_blocks_the_queue() {
    let (addr, _server) = scripted_server(vec![int(1), int(2)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    let open = pipeline
        .queue(&mut client, |c| c.write_command(["INCR", "a"]))
        .unwrap();
    drop(open);

    assert!(pipeline.command_queue().has_open());
    let e = pipeline
        .queue_long(&mut client, |c| c.write_command(["INCR", "b"]), |_| {})
        .unwrap_err();
    assert_eq!(usage_error(&e), Some(UsageError::OperationStillOpen));

    let e = pipeline.flush_async(&mut client).await.unwrap_err();
    assert_eq!(usage_error(&e), Some(UsageError::OperationStillOpen));

    // 调用约定错误不影响客户端。
    assert!(!client.is_poisoned());
    assert_eq!(client.claimed(), Some(Claim::Pipeline));
    assert_eq!(client.pending_writes(), 1);

    pipeline.dispose(&mut client);
    assert_eq!(client.pending_writes(), 0);
    assert_eq!(client.claimed(), None);

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    queue_incr(&mut pipeline, &mut client, "b", &log);
    pipeline.flush_async(&mut client).await.unwrap();
    assert_eq!(entries(&log), vec!["b 1"]);
}

#[tokio::test]
async fn shorthand_completes_the_command() {
    let (addr, _server) = scripted_server(vec![]);
    let mut client = Client::connect(addr).await.unwrap();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    pipeline
        .queue_long(&mut client, |c| c.write_command(["INCR", "a"]), |_| {})
        .unwrap();

    // 简写已注册监听器并绑定了读取。
    assert!(!pipeline.command_queue().has_open());
    assert_eq!(pipeline.len(), 1);

    pipeline.dispose(&mut client);
}

#[tokio::test]
async fn flushed_pipeline_accepts_no_more_commands() {
    let (addr, _server) = scripted_server(vec![int(1)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    queue_incr(&mut pipeline, &mut client, "a", &log);
    pipeline.flush_async(&mut client).await.unwrap();

    let e = pipeline
        .queue_long(&mut client, |c| c.write_command(["INCR", "b"]), |_| {})
        .unwrap_err();
    assert!(matches!(usage_error(&e), Some(UsageError::InvalidState(_))));

    let e = pipeline.flush_async(&mut client).await.unwrap_err();
    assert!(matches!(usage_error(&e), Some(UsageError::InvalidState(_))));
    assert_eq!(client.pending_writes(), 0);
}

#[tokio::test]
async fn empty_pipeline_flushes_cleanly() {
    let (addr, server) = scripted_server(vec![]);
    let mut client = Client::connect(addr).await.unwrap();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    assert!(pipeline.is_empty());
    pipeline.flush_async(&mut client).await.unwrap();

    assert_eq!(pipeline.state(), State::Closed);
    assert_eq!(client.claimed(), None);

    drop(client);
    assert!(server.join().unwrap().is_empty());
}

#[tokio::test]
async fn replay_after_failure_on_fresh_connection() {
    let (addr, _server) = scripted_server(vec![int(1), err("ERR down")]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    for key in ["a", "b", "c"] {
        queue_incr(&mut pipeline, &mut client, key, &log);
    }
    assert!(pipeline.flush_async(&mut client).await.is_err());
    assert_eq!(entries(&log), vec!["a 1"]);

    // 中毒的客户端不能再使用，重放也不行。
    let e = pipeline.replay_async(&mut client).await.unwrap_err();
    assert_eq!(usage_error(&e), Some(UsageError::ConnectionPoisoned));

    let (addr, server) = scripted_server(vec![int(10), int(20), int(30)]);
    let mut fresh = Client::connect(addr).await.unwrap();

    pipeline.replay_async(&mut fresh).await.unwrap();

    assert_eq!(entries(&log), vec!["a 1", "a 10", "b 20", "c 30"]);
    assert_eq!(pipeline.state(), State::Closed);
    assert_eq!(fresh.claimed(), None);

    drop(fresh);
    assert_eq!(
        server.join().unwrap(),
        vec![vec!["INCR", "a"], vec!["INCR", "b"], vec!["INCR", "c"]]
    );
}

#[tokio::test]
async fn replay_requires_a_flushed_pipeline() {
    let (addr, _server) = scripted_server(vec![]);
    let mut client = Client::connect(addr).await.unwrap();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    let e = pipeline.replay_async(&mut client).await.unwrap_err();
    assert!(matches!(usage_error(&e), Some(UsageError::InvalidState(_))));

    pipeline.dispose(&mut client);
}

#[tokio::test]
async fn async_writes_queue_and_replay() {
    let (addr, _server) = scripted_server(vec![int(1), int(2)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    for key in ["x", "y"] {
        let l = log.clone();
        pipeline
            .queue_async(&mut client, move |c| {
                async move { c.write_command(["INCR", key]) }.boxed()
            })
            .unwrap()
            .on_long(move |n| l.lock().unwrap().push(format!("{} {}", key, n)))
            .complete_long()
            .unwrap();
    }
    pipeline.flush_async(&mut client).await.unwrap();

    let (addr, server) = scripted_server(vec![int(3), int(4)]);
    let mut fresh = Client::connect(addr).await.unwrap();
    pipeline.replay_async(&mut fresh).await.unwrap();

    assert_eq!(entries(&log), vec!["x 1", "y 2", "x 3", "y 4"]);

    drop(fresh);
    assert_eq!(
        server.join().unwrap(),
        vec![vec!["INCR", "x"], vec!["INCR", "y"]]
    );
}

#[tokio::test]
async fn suspending_write_is_rejected_at_queue_time() {
    let (addr, _server) = scripted_server(vec![int(1)]);
    let mut client = Client::connect(addr).await.unwrap();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    let e = pipeline
        .queue_async(&mut client, |c| {
            async move {
                tokio::task::yield_now().await;
                c.write_command(["INCR", "late"])
            }
            .boxed()
        })
        .unwrap_err();
    assert_eq!(usage_error(&e), Some(UsageError::WriteSuspended));

    // 没有排队也没有写入任何内容。
    assert!(pipeline.is_empty());
    assert!(!pipeline.command_queue().has_open());
    assert_eq!(client.pending_writes(), 0);

    let log = log();
    queue_incr(&mut pipeline, &mut client, "k", &log);
    pipeline.flush_async(&mut client).await.unwrap();
    assert_eq!(entries(&log), vec!["k 1"]);
}

#[tokio::test]
async fn failed_eager_write_escapes_from_queue() {
    let (addr, _server) = scripted_server(vec![]);
    let mut client = Client::connect(addr).await.unwrap();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    let no_args: [&str; 0] = [];
    let e = pipeline
        .queue_void(&mut client, move |c| c.write_command(no_args), || {})
        .unwrap_err();
    assert!(e.to_string().contains("empty command"));
    assert!(pipeline.is_empty());

    pipeline.dispose(&mut client);
}

#[tokio::test]
async fn cancelled_flush_poisons() {
    let (addr, _server) = stalling_server(vec![int(1)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    for key in ["a", "b"] {
        queue_incr(&mut pipeline, &mut client, key, &log);
    }

    let (canceller, mut cancel) = cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let e = pipeline
        .flush_async_cancellable(&mut client, &mut cancel)
        .await
        .unwrap_err();
    let io = e.downcast_ref::<std::io::Error>().unwrap();
    assert_eq!(io.kind(), ErrorKind::Interrupted);

    assert!(cancel.is_cancelled());
    assert_eq!(entries(&log), vec!["a 1"]);
    assert_eq!(pipeline.state(), State::Poisoned);
    assert!(client.is_poisoned());
    assert_eq!(client.claimed(), None);
}

#[tokio::test]
async fn dispose_discards_buffered_writes() {
    let (addr, server) = scripted_server(vec![int(7)]);
    let mut client = Client::connect(addr).await.unwrap();
    let log = log();

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    queue_incr(&mut pipeline, &mut client, "dropped", &log);
    assert_eq!(client.pending_writes(), 1);
    pipeline.dispose(&mut client);
    assert_eq!(client.pending_writes(), 0);

    let mut pipeline = Pipeline::open(&mut client).unwrap();
    queue_incr(&mut pipeline, &mut client, "kept", &log);
    pipeline.flush_async(&mut client).await.unwrap();

    // 刷新后再丢弃不会影响之后的占用者。
    let other = Pipeline::open(&mut client).unwrap();
    pipeline.dispose(&mut client);
    assert_eq!(client.claimed(), Some(Claim::Pipeline));
    other.dispose(&mut client);

    assert_eq!(entries(&log), vec!["kept 7"]);

    drop(client);
    assert_eq!(server.join().unwrap(), vec![vec!["INCR", "kept"]]);
}
