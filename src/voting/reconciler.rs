//! Resolution of reservations whose ledger outcome was never observed.
//!
//! A sweep asks the ledger for the eventual truth about every held
//! reservation: a token the ledger knows finalizes, a token with no trace
//! past the grace period releases, anything else waits for the next sweep.
//! Sweeps reschedule themselves, so a reservation orphaned by a crash or a
//! cancelled request is always picked up eventually.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mongodb::Database;
use rocket::{
    fairing::{Fairing, Info, Kind},
    futures::future::{BoxFuture, FutureExt},
    tokio::sync::Mutex,
    Build, Rocket,
};
use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::ledger::LedgerClient;
use crate::model::{db::vote_status::DbVoteStatusStore, mongodb::Coll};
use crate::scheduled_task::ScheduledTask;
use crate::voting::{status::VoteStatusStore, token::TokenHasher};

/// What a single sweep did.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ReconcileSummary {
    /// Reservations inspected.
    pub examined: usize,
    /// Votes the ledger turned out to have counted.
    pub finalized: usize,
    /// Reservations released after the grace period with no ledger trace.
    pub released: usize,
    /// Reservations left for a later sweep.
    pub deferred: usize,
}

struct Inner<S> {
    store: S,
    ledger: Arc<dyn LedgerClient>,
    hasher: TokenHasher,
    interval: Duration,
    grace: Duration,
    sweep: Mutex<Option<ScheduledTask<()>>>,
}

/// The periodic reconciliation sweep over the vote status store.
pub struct VoteReconciler<S> {
    inner: Arc<Inner<S>>,
}

impl<S> VoteReconciler<S>
where
    S: VoteStatusStore + 'static,
{
    pub fn new(
        store: S,
        ledger: Arc<dyn LedgerClient>,
        hasher: TokenHasher,
        interval: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                ledger,
                hasher,
                interval,
                grace,
                sweep: Mutex::new(None),
            }),
        }
    }

    /// Schedule the first sweep, which runs immediately to settle anything
    /// left over from a previous process life.
    pub async fn start(&self) {
        let task = ScheduledTask::new(Self::sweeper(self.inner.clone()), Utc::now());
        *self.inner.sweep.lock().await = Some(task);
    }

    /// Run one sweep right now, on the caller's task, and report what it
    /// did. The scheduled sweeps carry on independently; every transition
    /// is conditional, so overlapping sweeps cannot double-settle.
    pub async fn run_now(&self) -> Result<ReconcileSummary> {
        Self::resolve_all(&self.inner).await
    }

    /// One sweep, then schedule the next. Since this is a recursive async
    /// function, we must use `BoxFuture` to avoid an infinitely-recursive
    /// state machine.
    fn sweeper(inner: Arc<Inner<S>>) -> BoxFuture<'static, ()> {
        async move {
            match Self::resolve_all(&inner).await {
                Ok(summary) if summary.examined > 0 => {
                    info!(
                        "Reconciliation sweep: {} examined, {} finalized, {} released, {} deferred",
                        summary.examined, summary.finalized, summary.released, summary.deferred
                    );
                }
                Ok(_) => debug!("Reconciliation sweep had nothing to do"),
                Err(e) => warn!("Reconciliation sweep failed, will retry: {e}"),
            }

            let next_run = Utc::now() + inner.interval;
            let task = ScheduledTask::new(Self::sweeper(inner.clone()), next_run);
            *inner.sweep.lock().await = Some(task);
        }
        .boxed()
    }

    async fn resolve_all(inner: &Inner<S>) -> Result<ReconcileSummary> {
        let cutoff = Utc::now() - inner.grace;
        let entries = inner.store.needs_reconciliation(cutoff).await?;
        let mut summary = ReconcileSummary {
            examined: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            // Derivation is deterministic, so even an entry that never
            // recorded its token can be matched against the ledger.
            let token = match entry.token {
                Some(ref token) => token.clone(),
                None => inner.hasher.derive(entry.voter_id, entry.election_id),
            };

            match inner.ledger.lookup(entry.election_id, &token).await {
                Ok(Some(receipt)) => {
                    // The commit landed after all.
                    if inner
                        .store
                        .finalize(entry.election_id, entry.voter_id, &receipt)
                        .await?
                    {
                        info!(
                            "Reconciled election {} vote as committed: {receipt}",
                            entry.election_id
                        );
                        summary.finalized += 1;
                    } else {
                        summary.deferred += 1;
                    }
                }
                Ok(None) if entry.since <= cutoff => {
                    // No trace within the grace period: the commit never
                    // happened. Give the voter their place back.
                    if inner
                        .store
                        .release(entry.election_id, entry.voter_id)
                        .await?
                    {
                        warn!(
                            "Released a reservation for election {} with no ledger trace",
                            entry.election_id
                        );
                        summary.released += 1;
                    } else {
                        summary.deferred += 1;
                    }
                }
                Ok(None) => {
                    // Still within grace; the commit may yet surface.
                    summary.deferred += 1;
                }
                Err(e) => {
                    warn!(
                        "Could not reconcile a vote for election {}: {e}",
                        entry.election_id
                    );
                    summary.deferred += 1;
                }
            }
        }

        Ok(summary)
    }
}

/// A fairing that builds the reconciler and schedules its first sweep
/// during ignition. Depends on the database, config, and ledger client
/// being in managed state, so must be attached after their fairings.
pub struct ReconcilerFairing;

#[rocket::async_trait]
impl Fairing for ReconcilerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote reconciler",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (config, db, ledger) = match (
            rocket.state::<Config>(),
            rocket.state::<Database>(),
            rocket.state::<Arc<dyn LedgerClient>>(),
        ) {
            (Some(config), Some(db), Some(ledger)) => (config, db, ledger),
            _ => {
                error!("Config, database, or ledger client missing when building the reconciler");
                return Err(rocket);
            }
        };

        let reconciler = VoteReconciler::new(
            DbVoteStatusStore::new(Coll::from_db(db)),
            ledger.clone(),
            TokenHasher::new(config),
            config.reconcile_interval(),
            config.reconcile_grace(),
        );
        reconciler.start().await;
        info!("Vote reconciler scheduled");

        Ok(rocket.manage(reconciler))
    }
}

#[cfg(test)]
mod tests {
    use crate::ledger::{
        mock::{MockBehaviour, MockLedger},
        LedgerReceipt,
    };
    use crate::model::db::vote_status::AnyVoteStatus;
    use crate::voting::status::memory::MemoryVoteStatusStore;
    use crate::Config;

    use super::*;

    const ELECTION: u32 = 1;
    const VOTER: u32 = 7;

    fn reconciler(
        store: MemoryVoteStatusStore,
        ledger: Arc<MockLedger>,
    ) -> VoteReconciler<MemoryVoteStatusStore> {
        VoteReconciler::new(
            store,
            ledger,
            TokenHasher::new(&Config::example()),
            Duration::seconds(60),
            Duration::seconds(300),
        )
    }

    /// Leave a pending reservation in the store, as an ambiguous commit
    /// would, and return its token.
    async fn pend(store: &MemoryVoteStatusStore) -> crate::voting::token::VoterToken {
        let token = TokenHasher::new(&Config::example()).derive(VOTER, ELECTION);
        store.reserve(ELECTION, VOTER).await.unwrap();
        store.mark_pending(ELECTION, VOTER, &token).await.unwrap();
        token
    }

    #[rocket::async_test]
    async fn commits_found_on_the_ledger_finalize() {
        let store = MemoryVoteStatusStore::new();
        let ledger = Arc::new(MockLedger::new(MockBehaviour::Vanish));
        let token = pend(&store).await;
        // The ambiguous commit actually landed.
        let receipt = LedgerReceipt::new("0xfeed".to_string());
        ledger.admit(ELECTION, &token, receipt.clone());

        let reconciler = reconciler(store, ledger);
        let summary = reconciler.run_now().await.unwrap();
        assert_eq!(summary.examined, 1);
        assert_eq!(summary.finalized, 1);

        match reconciler.inner.store.status(ELECTION, VOTER).await.unwrap() {
            Some(AnyVoteStatus::Committed(status)) => {
                assert_eq!(status.receipt, Some(receipt));
            }
            other => panic!("expected a committed status, got {other:?}"),
        }
    }

    #[rocket::async_test]
    async fn untraced_commits_release_after_the_grace_period() {
        let store = MemoryVoteStatusStore::new();
        let ledger = Arc::new(MockLedger::new(MockBehaviour::Vanish));
        pend(&store).await;
        store.backdate(ELECTION, VOTER, Utc::now() - Duration::seconds(600));

        let reconciler = reconciler(store, ledger);
        let summary = reconciler.run_now().await.unwrap();
        assert_eq!(summary.released, 1);

        // The voter gets their place back.
        assert!(matches!(
            reconciler.inner.store.status(ELECTION, VOTER).await.unwrap(),
            Some(AnyVoteStatus::Released(_))
        ));
    }

    #[rocket::async_test]
    async fn untraced_commits_within_grace_are_deferred() {
        let store = MemoryVoteStatusStore::new();
        let ledger = Arc::new(MockLedger::new(MockBehaviour::Vanish));
        pend(&store).await;

        let reconciler = reconciler(store, ledger);
        let summary = reconciler.run_now().await.unwrap();
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.released, 0);

        assert!(matches!(
            reconciler.inner.store.status(ELECTION, VOTER).await.unwrap(),
            Some(AnyVoteStatus::Pending(_))
        ));
    }

    #[rocket::async_test]
    async fn orphaned_reservations_are_adopted() {
        let store = MemoryVoteStatusStore::new();
        let ledger = Arc::new(MockLedger::new(MockBehaviour::Vanish));
        // A request died between reserving and recording an outcome, so no
        // token was stored.
        store.reserve(ELECTION, VOTER).await.unwrap();
        store.backdate(ELECTION, VOTER, Utc::now() - Duration::seconds(600));
        // Its commit did land; the re-derived token must match it.
        let token = TokenHasher::new(&Config::example()).derive(VOTER, ELECTION);
        let receipt = LedgerReceipt::new("0xfeed".to_string());
        ledger.admit(ELECTION, &token, receipt);

        let reconciler = reconciler(store, ledger);
        let summary = reconciler.run_now().await.unwrap();
        assert_eq!(summary.finalized, 1);
    }

    #[rocket::async_test]
    async fn lookup_failures_defer() {
        let store = MemoryVoteStatusStore::new();
        let ledger = Arc::new(MockLedger::new(MockBehaviour::Vanish));
        ledger.set_lookups_fail(true);
        pend(&store).await;
        store.backdate(ELECTION, VOTER, Utc::now() - Duration::seconds(600));

        let reconciler = reconciler(store, ledger.clone());
        let summary = reconciler.run_now().await.unwrap();
        assert_eq!(summary.deferred, 1);

        // Once the gateway recovers, the entry resolves.
        ledger.set_lookups_fail(false);
        let summary = reconciler.run_now().await.unwrap();
        assert_eq!(summary.released, 1);
    }
}
