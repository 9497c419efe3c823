//! wellspring-node — the Wellspring full-node binary.
//!
//! Startup sequence (serve):
//!   1. Open (or initialize) the thought store and audit log
//!   2. Restore the node identity, or create one on first run
//!   3. Rebuild pool/trust/appetite registries from the thought set
//!   4. Start the JSON-RPC 2.0 server
//!   5. Run the background index and session-pruning tasks
//!
//! Pool defaults and embedder configuration live in aspect thoughts; the
//! CLI only seeds the first such thoughts.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use wellspring_core::{Value, Visibility};
use wellspring_node::NodeContext;
use wellspring_pool::PoolRules;
use wellspring_rpc::{PeerClient, QueryRequest, RpcServer};

#[derive(Parser, Debug)]
#[command(
    name = "wellspring-node",
    version,
    about = "Wellspring node — a content-addressed, signed knowledge graph with P2P replication"
)]
struct Args {
    /// Directory for the persistent store, index, and audit log.
    #[arg(long, default_value = "~/.wellspring/data")]
    data_dir: PathBuf,

    /// Display name used when creating this node's identity on first run.
    #[arg(long, default_value = "wellspring-node")]
    name: String,

    /// Disable the semantic index (store and sync only).
    #[arg(long)]
    no_index: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the node identity (if absent) and print its CID.
    Init,
    /// Run the node: JSON-RPC server plus background tasks.
    Serve {
        /// JSON-RPC listen address.
        #[arg(long, default_value = "127.0.0.1:9470")]
        rpc_addr: SocketAddr,
    },
    /// One bidirectional sync round with a peer node.
    Sync {
        /// Peer RPC URL, e.g. http://127.0.0.1:9470
        peer: String,
    },
    /// Query the semantic index (local, or a peer's with --peer).
    Query {
        text: String,
        #[arg(long)]
        pool: Option<String>,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        #[arg(long)]
        peer: Option<String>,
    },
    /// Print this node's hello card (base64, shareable out of band).
    HelloCard,
    /// Create a default pool and seed demonstration thoughts.
    Seed,
    /// Update a pool's waterline via a chained pool_config thought.
    Waterline {
        pool: String,
        value: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wellspring=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let data_dir = expand_tilde(&args.data_dir);
    let ctx = NodeContext::open(&data_dir, &args.name, !args.no_index)
        .context("opening node context")?;

    match args.command {
        Command::Init => {
            println!("{}", ctx.identity_cid());
        }

        Command::Serve { rpc_addr } => {
            let _rpc_handle = RpcServer::new(ctx.rpc_state())
                .start(rpc_addr)
                .await
                .context("starting RPC server")?;

            // Background indexing resumes from the stored position.
            let indexed = ctx.backfill_index().context("backfilling index")?;
            if indexed > 0 {
                info!(indexed, "index backfill complete");
            }

            let sessions = ctx.sessions.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tick.tick().await;
                    let now = chrono::Utc::now().timestamp_millis();
                    sessions.write().expect("session lock poisoned").prune(now);
                }
            });

            info!(identity = %ctx.identity_cid(), %rpc_addr, "node ready");
            tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
            info!("shutting down");
        }

        Command::Sync { peer } => {
            let summary = ctx.sync_with(&peer).await.context("sync round failed")?;
            println!(
                "pushed {} ({} accepted), pulled {} ({} accepted)",
                summary.pushed, summary.push_accepted, summary.pulled, summary.pull_accepted
            );
            let s = &summary.filter_stats;
            println!(
                "withheld: {} local_forever, {} pool, {} participants",
                s.filtered_local_forever, s.filtered_pool_access, s.filtered_participants
            );
        }

        Command::Query { text, pool, top_k, peer } => {
            let req = QueryRequest { query_text: text, pool_cid: pool, top_k };
            let results = match peer {
                Some(url) => {
                    let client = PeerClient::connect(&url)?;
                    client.query(req).await?.results
                }
                None => {
                    // Local query through the same RPC state, no socket.
                    let state = ctx.rpc_state();
                    let index = state
                        .index
                        .as_ref()
                        .context("semantic index disabled (--no-index)")?;
                    let mut opts = wellspring_index::QueryOptions::new(
                        req.top_k,
                        wellspring_core::constants::DEFAULT_WATERLINE,
                        chrono::Utc::now().timestamp_millis(),
                    );
                    if let Some(p) = &req.pool_cid {
                        opts.pool = Some(p.parse()?);
                    }
                    index
                        .query(&req.query_text, &opts)?
                        .into_iter()
                        .map(|h| wellspring_rpc::QueryResult {
                            cid: h.cid.to_string(),
                            similarity: h.similarity,
                            relevance: h.relevance,
                            snippet: h.snippet,
                        })
                        .collect()
                }
            };
            for (i, r) in results.iter().enumerate() {
                println!("{:2}. ({:.3}) {} {}", i + 1, r.relevance, r.cid, r.snippet);
            }
            if results.is_empty() {
                println!("no results above the waterline");
            }
        }

        Command::HelloCard => {
            println!("{}", ctx.hello_card()?);
        }

        Command::Seed => {
            let pool = ctx.create_pool("wellspring-default", PoolRules::default())?;
            println!("pool: {}", pool.cid());
            let seed_data = [
                ("Content-addressed thoughts connect through CIDs for provenance tracking.", "insight"),
                ("The because chain creates an audit trail of reasoning and context.", "insight"),
                ("Bloom filters let peers discover missing thoughts cheaply.", "finding"),
                ("Pool rules define waterline thresholds for relevance filtering.", "decision"),
                ("Attestations from trusted identities boost thought visibility.", "insight"),
                ("Each thought is signed with Ed25519 for authentication.", "finding"),
            ];
            for (text, kind) in seed_data {
                let t = ctx.create_thought(
                    kind,
                    Value::map([("text", Value::text(text))]),
                    vec![pool.cid().clone()],
                    Some(Visibility::Pool(pool.cid().clone())),
                    Some("seed/cli"),
                )?;
                println!("  [{kind}] {}", t.cid());
            }
        }

        Command::Waterline { pool, value } => {
            if !(0.0..=1.0).contains(&value) {
                warn!("waterline clamped to [0, 1]");
            }
            let config = ctx.set_waterline(&pool.parse()?, value)?;
            println!("pool_config: {}", config.cid());
        }
    }

    Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
