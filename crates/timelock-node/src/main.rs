mod config;
mod constants;
mod error;
mod peers;
mod routes;
mod state;

use anyhow::Context;
use clap::Parser;
use config::{load_cipher, Args, RecordsBackend};
use constants::{BLOB_DIR, SLED_DIR};
use parking_lot::RwLock;
use state::{AppState, Core, Miner};
use std::{net::SocketAddr, sync::Arc};
use timelock_core::chain::Ledger;
use timelock_core::clock::{Clock, SystemClock};
use timelock_core::contract::ContractEngine;
use timelock_core::message::MessageStore;
use timelock_core::reveal::RevealGate;
use timelock_storage::{
    DirBlobStore, JsonFileStore, JsonMessageStore, SledMessageStore, LEDGER_FILE, MESSAGES_FILE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Arc::new(JsonFileStore::new(args.data_dir.join(LEDGER_FILE)));
    let mut ledger =
        Ledger::open(store, args.difficulty, clock.clone()).context("opening ledger")?;
    for peer in &args.peers {
        ledger.register_node(peer.as_str())?;
    }

    let records: Arc<dyn MessageStore> = match args.records {
        RecordsBackend::Json => Arc::new(JsonMessageStore::new(args.data_dir.join(MESSAGES_FILE))),
        RecordsBackend::Sled => Arc::new(SledMessageStore::open(args.data_dir.join(SLED_DIR))?),
    };
    let cipher = load_cipher(args.encryption_key.as_deref(), &args.data_dir)?;
    let gate = RevealGate::new(
        records,
        Arc::new(cipher),
        Arc::new(DirBlobStore::new(args.data_dir.join(BLOB_DIR))),
        clock,
    );

    info!(
        blocks = ledger.chain().len(),
        difficulty = ledger.chain().difficulty(),
        records = ?args.records,
        "ledger ready"
    );

    let state = AppState {
        core: Arc::new(RwLock::new(Core {
            ledger,
            gate,
            contracts: ContractEngine::Local,
        })),
        miner: Arc::new(Miner::default()),
        http: peers::client()?,
    };
    let miner = state.miner.clone();
    let app = routes::router(state);

    let addr: SocketAddr = args.listen.parse()?;
    info!("timelock-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            miner.abort();
            info!("shutting down");
        })
        .await?;
    Ok(())
}
