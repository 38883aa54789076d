use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::time::sleep,
    Build, Rocket,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::model::common::election::{CandidateId, ElectionId};
use crate::voting::token::VoterToken;

use super::{CommitOutcome, LedgerClient, LedgerError, LedgerReceipt};

/// The ledger gateway client. Wraps a single RPC per commit: bounded retries
/// with backoff apply only while the connection cannot be established at
/// all; once a request has gone out, no retry ever happens, and an
/// indeterminate outcome surfaces as [`CommitOutcome::Ambiguous`].
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
    retry_limit: u32,
}

impl HttpLedgerClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.ledger_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.ledger_url().trim_end_matches('/').to_string(),
            retry_limit: config.ledger_retry_limit(),
        })
    }

    fn vote_url(&self) -> String {
        format!("{}/gateway/vote", self.base_url)
    }

    fn lookup_url(&self, election_id: ElectionId, token: &VoterToken) -> String {
        format!("{}/gateway/vote/{}/{}", self.base_url, election_id, token)
    }
}

/// The gateway's vote submission body.
#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    #[serde(rename = "electionId")]
    election_id: ElectionId,
    #[serde(rename = "candidateId")]
    candidate_id: CandidateId,
    #[serde(rename = "voterHash")]
    voter_hash: &'a str,
}

/// The gateway's vote submission response. Contract reverts come back as an
/// error body, whatever the HTTP status.
#[derive(Debug, Deserialize)]
struct CommitResponse {
    success: Option<bool>,
    #[serde(rename = "txHash")]
    tx_hash: Option<String>,
    error: Option<String>,
}

/// The gateway's lookup response.
#[derive(Debug, Deserialize)]
struct LookupResponse {
    committed: bool,
    #[serde(rename = "txHash")]
    tx_hash: Option<String>,
}

/// Classify a response we actually received. From here on, nothing may
/// retry: the gateway has seen the request.
async fn classify_commit(response: reqwest::Response) -> CommitOutcome {
    let status = response.status();
    match response.json::<CommitResponse>().await {
        Ok(CommitResponse {
            success: Some(true),
            tx_hash: Some(hash),
            ..
        }) if status.is_success() => CommitOutcome::Success(LedgerReceipt::new(hash)),
        Ok(CommitResponse {
            error: Some(reason), ..
        }) => CommitOutcome::Rejected(reason),
        Ok(_) | Err(_) => {
            warn!("Unintelligible gateway response with status {status}; treating as ambiguous");
            CommitOutcome::Ambiguous
        }
    }
}

/// Exponential backoff with jitter, so a cluster of failed requests does
/// not reconnect in lockstep.
fn retry_backoff(attempt: u32) -> Duration {
    let base = 100u64 << attempt.min(4);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

#[rocket::async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn commit(
        &self,
        election_id: ElectionId,
        candidate_id: CandidateId,
        token: &VoterToken,
    ) -> CommitOutcome {
        let request = CommitRequest {
            election_id,
            candidate_id,
            voter_hash: token.as_str(),
        };

        let mut attempt = 0;
        loop {
            match self.client.post(self.vote_url()).json(&request).send().await {
                Ok(response) => return classify_commit(response).await,
                // The connection was never established, so the gateway
                // cannot have seen the request; retrying is safe.
                Err(err) if err.is_connect() && attempt < self.retry_limit => {
                    attempt += 1;
                    let backoff = retry_backoff(attempt);
                    debug!(
                        "Ledger gateway connection failed (attempt {attempt}): {err}; \
retrying in {backoff:?}"
                    );
                    sleep(backoff).await;
                }
                Err(err) => {
                    warn!("Ledger commit outcome indeterminate: {err}");
                    return CommitOutcome::Ambiguous;
                }
            }
        }
    }

    async fn lookup(
        &self,
        election_id: ElectionId,
        token: &VoterToken,
    ) -> Result<Option<LedgerReceipt>, LedgerError> {
        let response = self
            .client
            .get(self.lookup_url(election_id, token))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .json::<LookupResponse>()
            .await
            .map_err(|err| LedgerError::Malformed(err.to_string()))?;
        Ok(match body {
            LookupResponse {
                committed: true,
                tx_hash: Some(hash),
            } => Some(LedgerReceipt::new(hash)),
            _ => None,
        })
    }
}

/// A fairing that builds the ledger client from the application config and
/// places it into managed state as a capability. Depends on the config
/// being in managed state, so must be attached after the config fairing.
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ledger gateway",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.state::<Config>() {
            Some(config) => config,
            None => {
                error!("Config was not available when building the ledger client");
                return Err(rocket);
            }
        };
        let client = match HttpLedgerClient::new(config) {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to build the ledger client: {e}");
                return Err(rocket);
            }
        };
        info!("Ledger gateway client targeting {}", config.ledger_url());

        let ledger: Arc<dyn LedgerClient> = Arc::new(client);
        Ok(rocket.manage(ledger))
    }
}
