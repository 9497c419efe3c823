//! End-to-end scenarios over the real RPC stack: two (or three) in-process
//! nodes, each with its own store, syncing through the JSON-RPC server.
//!
//! Run with:
//!   cargo test -p wellspring-node --test scenarios

use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use wellspring_core::{Value, Visibility};
use wellspring_node::NodeContext;
use wellspring_pool::PoolRules;
use wellspring_rpc::RpcServer;

static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

struct TestNode {
    ctx: NodeContext,
    dir: PathBuf,
}

impl Drop for TestNode {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn open_node(label: &str, name: &str) -> TestNode {
    let dir = std::env::temp_dir().join(format!(
        "wellspring-scenario-{label}-{}-{}",
        std::process::id(),
        DIR_SEQ.fetch_add(1, Ordering::SeqCst)
    ));
    let ctx = NodeContext::open(&dir, name, false).expect("open node");
    TestNode { ctx, dir }
}

/// Find a free TCP port on loopback.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

async fn serve(node: &TestNode) -> (String, jsonrpsee::server::ServerHandle) {
    let addr: SocketAddr = format!("127.0.0.1:{}", free_port()).parse().unwrap();
    let handle = RpcServer::new(node.ctx.rpc_state()).start(addr).await.expect("start rpc");
    (format!("http://{addr}"), handle)
}

// ── S5: bloom sync ───────────────────────────────────────────────────────────

#[tokio::test]
async fn bloom_sync_converges_without_leaking_local_forever() {
    let alice = open_node("s5-alice", "Alice");
    let bob = open_node("s5-bob", "Bob");

    let mut alice_notes = Vec::new();
    let mut bob_notes = Vec::new();
    for i in 0..10 {
        alice_notes.push(
            alice
                .ctx
                .create_thought(
                    "basic",
                    Value::map([("text", Value::text(format!("alice note {i}")))]),
                    vec![alice.ctx.identity_cid().clone()],
                    None,
                    None,
                )
                .unwrap(),
        );
        bob_notes.push(
            bob.ctx
                .create_thought(
                    "basic",
                    Value::map([("text", Value::text(format!("bob note {i}")))]),
                    vec![bob.ctx.identity_cid().clone()],
                    None,
                    None,
                )
                .unwrap(),
        );
    }

    let (alice_url, _alice_handle) = serve(&alice).await;
    let summary = bob.ctx.sync_with(&alice_url).await.expect("sync round");

    // Bob pushed his 10 notes (his identity traveled in the hello card; his
    // secret thought stayed home). He pulled Alice's identity + 10 notes.
    assert_eq!(summary.pushed, 10);
    assert_eq!(summary.push_accepted, 10);
    assert!(summary.filter_stats.filtered_local_forever >= 1);
    assert_eq!(summary.pulled, 11);
    assert_eq!(summary.pull_accepted, 11);

    // Each side now holds all 20 notes and both identities.
    for note in alice_notes.iter().chain(&bob_notes) {
        assert!(alice.ctx.store.contains(note.cid()), "alice missing {}", note.cid());
        assert!(bob.ctx.store.contains(note.cid()), "bob missing {}", note.cid());
    }
    assert!(alice.ctx.store.contains(bob.ctx.identity_cid()));
    assert!(bob.ctx.store.contains(alice.ctx.identity_cid()));

    // No local_forever thought crossed the wire in either direction.
    assert!(!alice.ctx.store.contains(bob.ctx.bundle.secret.cid()));
    assert!(!bob.ctx.store.contains(alice.ctx.bundle.secret.cid()));

    // Provenance: bob records which peer delivered alice's thoughts.
    let via = bob.ctx.store.provenance_of(alice_notes[0].cid()).unwrap();
    assert_eq!(via.as_ref(), Some(alice.ctx.identity_cid()));

    // A second round finds nothing new — the shareable sets converged.
    let second = bob.ctx.sync_with(&alice_url).await.expect("second round");
    assert_eq!(second.pushed, 0);
    assert_eq!(second.pulled, 0);
}

// ── S3: hello-card handshake, shared pool, visibility ────────────────────────

#[tokio::test]
async fn pool_scoped_message_reaches_member_but_not_outsider() {
    let alice = open_node("s3-alice", "Alice");
    let bob = open_node("s3-bob", "Bob");
    let eve = open_node("s3-eve", "Eve");

    // Out-of-band: Bob verifies Alice's hello card before any contact.
    let card = wellspring_identity::HelloCard::decode(&alice.ctx.hello_card().unwrap()).unwrap();
    assert_eq!(&card.verify().unwrap(), alice.ctx.identity_cid());

    let pool = alice.ctx.create_pool("alice-bob-chat", PoolRules::default()).unwrap();
    let (alice_url, _handle) = serve(&alice).await;

    // Round 1: Bob learns Alice's identity and the pool thought.
    bob.ctx.sync_with(&alice_url).await.unwrap();
    assert!(bob.ctx.store.contains(pool.cid()));

    // Bob asks to join: member_of connection plus his half of the
    // bilateral attestation.
    let conn = bob
        .ctx
        .create_thought(
            "connection",
            Value::map([
                ("from", Value::text(bob.ctx.identity_cid().to_string())),
                ("to", Value::text(pool.cid().to_string())),
                ("relation", Value::text("member_of")),
            ]),
            vec![bob.ctx.identity_cid().clone(), pool.cid().clone()],
            None,
            None,
        )
        .unwrap();
    bob.ctx
        .create_thought(
            "attestation",
            Value::map([
                ("on", Value::text(conn.cid().to_string())),
                ("weight", Value::Float(1.0)),
            ]),
            vec![conn.cid().clone()],
            None,
            None,
        )
        .unwrap();

    // Round 2: Bob's membership request reaches Alice.
    bob.ctx.sync_with(&alice_url).await.unwrap();
    assert!(alice.ctx.store.contains(conn.cid()));

    // Alice (pool admin) completes the bilateral pair.
    alice
        .ctx
        .create_thought(
            "attestation",
            Value::map([
                ("on", Value::text(conn.cid().to_string())),
                ("weight", Value::Float(1.0)),
            ]),
            vec![conn.cid().clone(), bob.ctx.identity_cid().clone()],
            None,
            None,
        )
        .unwrap();

    // A pool-scoped message from Alice.
    let message = alice
        .ctx
        .create_thought(
            "message",
            Value::map([("text", Value::text("pool members only"))]),
            vec![pool.cid().clone()],
            Some(Visibility::Pool(pool.cid().clone())),
            None,
        )
        .unwrap();

    // Round 3: Bob receives it; Eve, syncing the same node, does not.
    bob.ctx.sync_with(&alice_url).await.unwrap();
    assert!(bob.ctx.store.contains(message.cid()));

    eve.ctx.sync_with(&alice_url).await.unwrap();
    assert!(!eve.ctx.store.contains(message.cid()));
    // Public material still reaches Eve.
    assert!(eve.ctx.store.contains(pool.cid()));
    assert!(eve.ctx.store.contains(alice.ctx.identity_cid()));
}

// ── Heartbeat / want-by-cid round trip ───────────────────────────────────────

#[tokio::test]
async fn explicit_want_resolves_missing_references() {
    let alice = open_node("want-alice", "Alice");
    let bob = open_node("want-bob", "Bob");

    let note = alice
        .ctx
        .create_thought(
            "basic",
            Value::map([("text", Value::text("fetch me by cid"))]),
            vec![alice.ctx.identity_cid().clone()],
            None,
            None,
        )
        .unwrap();

    let (alice_url, _handle) = serve(&alice).await;
    let mut client = wellspring_rpc::PeerClient::connect(&alice_url).unwrap();
    client
        .hello(
            &bob.ctx.identity_cid().to_string(),
            &bob.ctx.bundle.keypair,
            &["want"],
            Some(bob.ctx.hello_card().unwrap()),
            chrono::Utc::now().timestamp_millis(),
        )
        .await
        .unwrap();

    let fetched = client.want(vec![note.cid().to_string()]).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].cid(), note.cid());

    // Secrets cannot be fetched even by explicit CID.
    let secret_cid = alice.ctx.bundle.secret.cid().to_string();
    let refused = client.want(vec![secret_cid]).await.unwrap();
    assert!(refused.is_empty());

    let beat = client
        .heartbeat(bob.ctx.store.count(), chrono::Utc::now().timestamp_millis())
        .await
        .unwrap();
    assert!(beat.sync_needed);
}
