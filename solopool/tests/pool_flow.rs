//! End-to-end Stratum flows over real TCP connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, CompactTarget, Network};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

use solopool::config::StratumConfig;
use solopool::hashing::{U256, target_from_bits};
use solopool::jobs::{Job, JobStore};
use solopool::node::{BlockSink, Template};
use solopool::records::RecordWriter;
use solopool::server::Server;
use solopool::share::ShareValidator;
use solopool::stats::PoolCounters;
use solopool::stratum::{SessionContext, SessionRegistry};

/// Regtest P2PKH address for hash160 = 0x07 repeated 20 times.
const ADDR: &str = "mgA7SfyBBrVGVSpQ7oqGHPhxpp2gUZWtfc";

#[derive(Default)]
struct CountingSink {
    submissions: AtomicUsize,
}

#[async_trait]
impl BlockSink for CountingSink {
    async fn submit(&self, _header: [u8; 80], _coinbase: Vec<u8>, _template: Arc<Template>) {
        self.submissions.fetch_add(1, Ordering::SeqCst);
    }
}

fn regtest_template(network_target: U256) -> Template {
    Template {
        height: 840_000,
        prev_blockhash: BlockHash::from_byte_array([0xab; 32]),
        coinbase_value: 312_500_000,
        witness_commitment: None,
        coinbase_aux: Vec::new(),
        bits: CompactTarget::from_consensus(0x1d00ffff),
        network_target,
        min_time: 1_700_000_000,
        cur_time: 1_700_000_600,
        version: 0x2000_0000,
        transactions: Vec::new(),
    }
}

struct Harness {
    addr: SocketAddr,
    ctx: Arc<SessionContext>,
    sink: Arc<CountingSink>,
    shutdown: CancellationToken,
}

async fn start_pool(difficulty: f64, network_target: U256, max_connections: usize) -> Harness {
    let jobs = Arc::new(JobStore::new());
    jobs.insert(Arc::new(
        Job::build(1, &Arc::new(regtest_template(network_target)), true).unwrap(),
    ));

    let sink = Arc::new(CountingSink::default());
    let counters = Arc::new(PoolCounters::new());
    let validator = Arc::new(ShareValidator::new(
        jobs.clone(),
        sink.clone(),
        Arc::new(RecordWriter::disabled()),
        counters.clone(),
    ));

    let ctx = Arc::new(SessionContext {
        network: Network::Regtest,
        stratum: StratumConfig {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections,
            difficulty,
            accept_suggested_difficulty: true,
            version_rolling_mask: 0x1fff_e000,
        },
        registry: Arc::new(SessionRegistry::new()),
        validator,
        jobs,
        counters,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    tokio::spawn(Server::new(ctx.clone(), listener).run(shutdown.clone()));

    Harness {
        addr,
        ctx,
        sink,
        shutdown,
    }
}

struct Miner {
    writer: tokio::net::tcp::OwnedWriteHalf,
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl Miner {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            writer,
            lines: BufReader::new(read).lines(),
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("read timed out")
            .expect("read failed")
            .expect("connection closed");
        serde_json::from_str(&line).expect("server lines are JSON")
    }

    async fn expect_closed(&mut self) {
        let eof = timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("close timed out");
        assert!(matches!(eof, Ok(None) | Err(_)), "expected disconnect");
    }

    async fn handshake(&mut self) {
        self.send(r#"{"id":1,"method":"mining.subscribe","params":["test-miner"]}"#)
            .await;
        let subscribed = self.recv().await;
        assert_eq!(subscribed["result"][2], json!(4));

        self.send(&format!(
            r#"{{"id":2,"method":"mining.authorize","params":["{ADDR}","x"]}}"#
        ))
        .await;
        let authorized = self.recv().await;
        assert_eq!(authorized["result"], json!(true));

        // Difficulty is pinned strictly before the first notify.
        let difficulty = self.recv().await;
        assert_eq!(difficulty["method"], json!("mining.set_difficulty"));
        let notify = self.recv().await;
        assert_eq!(notify["method"], json!("mining.notify"));
    }
}

#[tokio::test]
async fn full_mining_flow_finds_a_block() {
    let pool = start_pool(1e-10, U256::MAX, 16).await;
    let mut miner = Miner::connect(pool.addr).await;
    miner.handshake().await;

    miner
        .send(&format!(
            r#"{{"id":4,"method":"mining.submit","params":["{ADDR}","1","00000000","6553f358","12345678"]}}"#
        ))
        .await;
    let response = miner.recv().await;
    assert_eq!(response["result"], json!(true));
    assert_eq!(pool.sink.submissions.load(Ordering::SeqCst), 1);
    assert_eq!(pool.ctx.counters.blocks(), 1);

    pool.shutdown.cancel();
}

#[tokio::test]
async fn share_below_network_target_is_just_a_share() {
    // Mainnet diff-1 network target: the deterministic test share passes
    // the (trivial) session target but not the network.
    let pool = start_pool(1e-10, target_from_bits(0x1d00ffff), 16).await;
    let mut miner = Miner::connect(pool.addr).await;
    miner.handshake().await;

    miner
        .send(&format!(
            r#"{{"id":4,"method":"mining.submit","params":["{ADDR}","1","00000000","6553f358","12345678"]}}"#
        ))
        .await;
    let response = miner.recv().await;
    assert_eq!(response["result"], json!(true));
    assert_eq!(pool.sink.submissions.load(Ordering::SeqCst), 0);

    pool.shutdown.cancel();
}

#[tokio::test]
async fn new_jobs_are_broadcast_to_authorized_miners() {
    let pool = start_pool(1000.0, U256::MAX, 16).await;
    let mut miner = Miner::connect(pool.addr).await;
    miner.handshake().await;

    let job = Arc::new(
        Job::build(2, &Arc::new(regtest_template(U256::MAX)), false).unwrap(),
    );
    pool.ctx.jobs.insert(job.clone());
    pool.ctx.registry.broadcast_job(&job);

    let notify = miner.recv().await;
    assert_eq!(notify["method"], json!("mining.notify"));
    assert_eq!(notify["params"][0], json!("2"));
    assert_eq!(notify["params"][8], json!(false));

    pool.shutdown.cancel();
}

#[tokio::test]
async fn oversize_line_closes_the_session() {
    let pool = start_pool(1000.0, U256::MAX, 16).await;
    let mut miner = Miner::connect(pool.addr).await;

    let huge = format!(
        r#"{{"id":1,"method":"mining.subscribe","params":["{}"]}}"#,
        "x".repeat(70 * 1024)
    );
    miner.send(&huge).await;
    miner.expect_closed().await;

    pool.shutdown.cancel();
}

#[tokio::test]
async fn connection_limit_refuses_excess_miners() {
    let pool = start_pool(1000.0, U256::MAX, 1).await;

    let mut first = Miner::connect(pool.addr).await;
    first
        .send(r#"{"id":1,"method":"mining.subscribe","params":[]}"#)
        .await;
    let subscribed = first.recv().await;
    assert!(subscribed["error"].is_null());

    let mut second = Miner::connect(pool.addr).await;
    second
        .send(r#"{"id":1,"method":"mining.subscribe","params":[]}"#)
        .await;
    second.expect_closed().await;

    pool.shutdown.cancel();
}

#[tokio::test]
async fn shutdown_sends_reconnect_then_disconnects() {
    let pool = start_pool(1000.0, U256::MAX, 16).await;
    let mut miner = Miner::connect(pool.addr).await;
    miner.handshake().await;

    pool.shutdown.cancel();

    let reconnect = miner.recv().await;
    assert_eq!(reconnect["method"], json!("client.reconnect"));
    miner.expect_closed().await;
}
