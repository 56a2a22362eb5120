use crate::constants::PEER_TIMEOUT_SECS;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::time::Duration;
use timelock_core::consensus::{ChainSource, PeerChain};
use tokio::task::JoinSet;

pub fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(PEER_TIMEOUT_SECS))
        .build()
        .context("building http client")
}

/// Peer addresses may be stored bare (`host:port`).
pub fn base_url(peer: &str) -> String {
    let peer = peer.trim_end_matches('/');
    if peer.starts_with("http://") || peer.starts_with("https://") {
        peer.to_string()
    } else {
        format!("http://{peer}")
    }
}

pub async fn fetch_chain(client: &reqwest::Client, peer: &str) -> Result<PeerChain> {
    let url = format!("{}/chain", base_url(peer));
    let chain = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()?
        .json::<PeerChain>()
        .await
        .with_context(|| format!("decoding chain from {url}"))?;
    Ok(chain)
}

/// Peer chains fetched ahead of time, so reconciliation can run under the
/// ledger lock without network I/O.
#[derive(Default)]
pub struct Fetched {
    chains: HashMap<String, std::result::Result<PeerChain, String>>,
}

impl Fetched {
    pub async fn from_peers(client: &reqwest::Client, peers: Vec<String>) -> Self {
        let mut tasks = JoinSet::new();
        for peer in peers {
            let client = client.clone();
            tasks.spawn(async move {
                let result = fetch_chain(&client, &peer).await.map_err(|e| format!("{e:#}"));
                (peer, result)
            });
        }

        let mut chains = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((peer, result)) = joined {
                chains.insert(peer, result);
            }
        }
        Self { chains }
    }
}

impl ChainSource for Fetched {
    fn fetch_chain(&self, peer: &str) -> Result<PeerChain> {
        match self.chains.get(peer) {
            Some(Ok(chain)) => Ok(chain.clone()),
            Some(Err(e)) => Err(anyhow!("{e}")),
            None => Err(anyhow!("peer {peer} was not queried")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_addresses_get_a_scheme() {
        assert_eq!(base_url("10.0.0.2:8080"), "http://10.0.0.2:8080");
        assert_eq!(base_url("https://node.example/"), "https://node.example");
    }

    #[tokio::test]
    async fn unreachable_peers_become_errors() {
        let client = client().unwrap();
        let fetched = Fetched::from_peers(&client, vec!["127.0.0.1:1".into()]).await;
        assert!(fetched.fetch_chain("127.0.0.1:1").is_err());
        assert!(fetched.fetch_chain("10.9.9.9:80").is_err());
    }
}
