// src/recon/orchestrator.rs
// Drives the reconciliation pipeline across all eligible accounts. One
// snapshot per account per run; a failing account is logged and skipped,
// never aborting the batch.

use crate::config::ReconConfig;
use crate::domain::models::UserExchange;
use crate::exchange::gateway::ExchangeGateway;
use crate::ledger::{OrderRepository, TradeRepository};
use crate::recon::snapshot::AccountSnapshot;
use crate::recon::unit::{Pass, ReconciliationUnit};
use std::sync::Arc;

/// Builds a gateway bound to one account's credentials and mode
pub trait GatewayFactory: Send + Sync {
    fn gateway_for(&self, account: &UserExchange, demo: bool) -> Option<Arc<dyn ExchangeGateway>>;
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Orchestrator {
    accounts: Vec<UserExchange>,
    factory: Arc<dyn GatewayFactory>,
    orders: Arc<dyn OrderRepository>,
    trades: Arc<dyn TradeRepository>,
    config: ReconConfig,
}

impl Orchestrator {
    pub fn new(
        accounts: Vec<UserExchange>,
        factory: Arc<dyn GatewayFactory>,
        orders: Arc<dyn OrderRepository>,
        trades: Arc<dyn TradeRepository>,
        config: ReconConfig,
    ) -> Self {
        Self {
            accounts,
            factory,
            orders,
            trades,
            config,
        }
    }

    fn eligible(&self, account: &UserExchange, pass: Pass, user: Option<i64>, demo: bool) -> bool {
        if let Some(user_id) = user {
            if account.user_id != user_id {
                return false;
            }
        }
        if !account.futures_access || !account.has_credentials(demo) {
            return false;
        }
        if demo && !account.is_demo_active {
            return false;
        }
        if pass == Pass::Enforce && !account.future_strict_mode {
            return false;
        }
        true
    }

    /// Run one pass (or the full pipeline) over all eligible accounts.
    pub async fn run(&self, pass: Pass, user: Option<i64>, demo: bool) -> RunSummary {
        let mut summary = RunSummary::default();

        if self.config.offline {
            log::info!("Offline mode: skipping all exchange reconciliation");
            return summary;
        }

        for account in &self.accounts {
            if !self.eligible(account, pass, user, demo) {
                summary.skipped += 1;
                continue;
            }

            let gateway = match self.factory.gateway_for(account, demo) {
                Some(gateway) => gateway,
                None => {
                    log::warn!(
                        "No gateway for user {} on {}; skipping",
                        account.user_id,
                        account.exchange
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            // One snapshot per account per run, shared by all passes
            let snapshot = match AccountSnapshot::fetch(gateway.as_ref()).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::error!(
                        "Snapshot fetch failed for user {} on {}: {}",
                        account.user_id,
                        account.exchange,
                        e
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            let unit = ReconciliationUnit::new(
                account,
                demo,
                gateway.as_ref(),
                self.orders.as_ref(),
                self.trades.as_ref(),
                &self.config,
            );

            match unit.run(pass, &snapshot).await {
                Ok(report) => {
                    summary.processed += 1;
                    log::debug!(
                        "Reconciled user {} on {}: {:?}",
                        account.user_id,
                        account.exchange,
                        report
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    log::error!(
                        "Reconciliation failed for user {} on {}: {}",
                        account.user_id,
                        account.exchange,
                        e
                    );
                }
            }
        }

        log::info!(
            "Run complete: {} processed, {} skipped, {} failed",
            summary.processed,
            summary.skipped,
            summary.failed
        );
        summary
    }
}
