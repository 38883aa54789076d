//! A programmable in-process ledger for tests: every outcome the real
//! gateway can produce, plus artificial latency and commit counting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rocket::tokio::time::sleep;

use crate::model::common::election::{CandidateId, ElectionId};
use crate::voting::token::VoterToken;

use super::{CommitOutcome, LedgerClient, LedgerError, LedgerReceipt};

/// How the mock responds to commit calls.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Accept the vote and remember it for lookups.
    Commit,
    /// Refuse the vote with the given reason.
    Reject(String),
    /// Swallow the request without a determinable outcome. The vote is NOT
    /// recorded; pair with [`MockLedger::admit`] to simulate an ambiguous
    /// call that actually landed.
    Vanish,
}

pub struct MockLedger {
    behaviour: Mutex<MockBehaviour>,
    delay: Option<Duration>,
    commits: AtomicUsize,
    lookups_fail: AtomicBool,
    committed: Mutex<HashMap<(ElectionId, String), LedgerReceipt>>,
}

impl MockLedger {
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            delay: None,
            commits: AtomicUsize::new(0),
            lookups_fail: AtomicBool::new(false),
            committed: Mutex::new(HashMap::new()),
        }
    }

    /// A mock whose commit calls take `delay` to respond.
    pub fn slow(behaviour: MockBehaviour, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(behaviour)
        }
    }

    pub fn set_behaviour(&self, behaviour: MockBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    /// How many commit calls reached the ledger.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Pretend a past commit for this token landed on the ledger.
    pub fn admit(&self, election_id: ElectionId, token: &VoterToken, receipt: LedgerReceipt) {
        self.committed
            .lock()
            .unwrap()
            .insert((election_id, token.to_string()), receipt);
    }

    /// Make lookups fail until further notice.
    pub fn set_lookups_fail(&self, fail: bool) {
        self.lookups_fail.store(fail, Ordering::SeqCst);
    }
}

#[rocket::async_trait]
impl LedgerClient for MockLedger {
    async fn commit(
        &self,
        election_id: ElectionId,
        _candidate_id: CandidateId,
        token: &VoterToken,
    ) -> CommitOutcome {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        let call = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        let behaviour = self.behaviour.lock().unwrap().clone();
        match behaviour {
            MockBehaviour::Commit => {
                let receipt = LedgerReceipt::new(format!("0x{call:064x}"));
                self.admit(election_id, token, receipt.clone());
                CommitOutcome::Success(receipt)
            }
            MockBehaviour::Reject(reason) => CommitOutcome::Rejected(reason),
            MockBehaviour::Vanish => CommitOutcome::Ambiguous,
        }
    }

    async fn lookup(
        &self,
        election_id: ElectionId,
        token: &VoterToken,
    ) -> Result<Option<LedgerReceipt>, LedgerError> {
        if self.lookups_fail.load(Ordering::SeqCst) {
            return Err(LedgerError::Malformed("simulated gateway outage".to_string()));
        }
        Ok(self
            .committed
            .lock()
            .unwrap()
            .get(&(election_id, token.to_string()))
            .cloned())
    }
}
