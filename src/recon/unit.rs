// src/recon/unit.rs
use crate::config::ReconConfig;
use crate::domain::errors::ReconResult;
use crate::domain::models::UserExchange;
use crate::exchange::gateway::ExchangeGateway;
use crate::ledger::{AccountScope, OrderRepository, TradeRepository};
use crate::recon::enforce::{self, EnforceReport};
use crate::recon::lifecycle::{self, LifecycleReport};
use crate::recon::sltp::{self, SltpReport};
use crate::recon::snapshot::AccountSnapshot;

/// Which reconciliation passes a command run drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Lifecycle,
    Enforce,
    SlTp,
    /// Full pipeline: lifecycle, then enforcement, then SL/TP sync
    Full,
}

/// Per-(user, exchange-account) execution context. Holds everything the
/// passes need; the pipeline order is fixed because enforcement and SL/TP
/// sync depend on post-lifecycle ledger state.
pub struct ReconciliationUnit<'a> {
    pub account: &'a UserExchange,
    pub scope: AccountScope,
    pub gateway: &'a dyn ExchangeGateway,
    pub orders: &'a dyn OrderRepository,
    pub trades: &'a dyn TradeRepository,
    pub config: &'a ReconConfig,
}

/// What one unit run did
#[derive(Debug, Default)]
pub struct UnitReport {
    pub lifecycle: Option<LifecycleReport>,
    pub enforce: Option<EnforceReport>,
    pub sltp: Option<SltpReport>,
}

impl<'a> ReconciliationUnit<'a> {
    pub fn new(
        account: &'a UserExchange,
        demo: bool,
        gateway: &'a dyn ExchangeGateway,
        orders: &'a dyn OrderRepository,
        trades: &'a dyn TradeRepository,
        config: &'a ReconConfig,
    ) -> Self {
        let scope = AccountScope {
            user_id: account.user_id,
            exchange_id: account.id,
            is_demo: demo,
        };
        Self {
            account,
            scope,
            gateway,
            orders,
            trades,
            config,
        }
    }

    /// Run the selected passes against one snapshot.
    ///
    /// Enforcement only runs for strict-mode accounts, whichever pass was
    /// requested.
    pub async fn run(&self, pass: Pass, snapshot: &AccountSnapshot) -> ReconResult<UnitReport> {
        let mut report = UnitReport::default();

        if matches!(pass, Pass::Lifecycle | Pass::Full) {
            report.lifecycle = Some(lifecycle::run(self, snapshot).await?);
        }

        if matches!(pass, Pass::Enforce | Pass::Full) {
            if self.account.future_strict_mode {
                report.enforce = Some(enforce::run(self, snapshot).await?);
            } else {
                log::debug!(
                    "Skipping enforcement for user {} ({}): strict mode off",
                    self.account.user_id,
                    self.account.exchange
                );
            }
        }

        if matches!(pass, Pass::SlTp | Pass::Full) {
            report.sltp = Some(sltp::run(self, snapshot).await?);
        }

        Ok(report)
    }
}
