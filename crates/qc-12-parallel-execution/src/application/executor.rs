//! Group Execution
//!
//! Runs transactions against copy-on-write overlays: sequentially on the calling
//! task, or one tokio task per parallel group.

use crate::domain::entities::{ExecutionReturnSet, Transaction};
use crate::domain::state::BlockStateSet;
use crate::domain::value_objects::{ChainContext, Hash};
use crate::ports::outbound::{ExecutiveProvider, StateReader};
use crate::state::{StateOverlay, TransactionState};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Error attached to transactions of a group whose task panicked.
pub const TASK_PANICKED_ERROR: &str = "Execution task panicked";

/// What one group produced.
#[derive(Clone, Debug, Default)]
pub struct GroupOutcome {
    /// In group order; shorter than the group when cancelled
    pub return_sets: Vec<ExecutionReturnSet>,
    /// Changes of the group's mined transactions
    pub state_set: BlockStateSet,
    pub cancelled: bool,
}

/// Run one transaction with a freshly checked-out executive.
pub async fn execute_transaction(
    executives: &dyn ExecutiveProvider,
    chain_context: &ChainContext,
    transaction: &Transaction,
    state: &dyn StateReader,
) -> ExecutionReturnSet {
    let transaction_id = transaction.id();
    let mut executive = match executives.get_executive(chain_context, transaction.to).await {
        Ok(executive) => executive,
        Err(err) => return ExecutionReturnSet::failed(transaction_id, err.to_string()),
    };

    let mut view = TransactionState::new(state);
    let outcome = executive.execute(transaction, &mut view).await;
    executives.return_executive(transaction.to, executive).await;

    match outcome {
        Ok(return_value) => view.into_mined(transaction_id, return_value),
        Err(err) => {
            debug!(tx = ?transaction_id, error = %err, "[qc-12] Transaction failed");
            view.into_failed(transaction_id, err.to_string())
        }
    }
}

/// Run `transactions` in order over `overlay`, folding each result into it.
///
/// Stops before the next transaction once `cancel` fires; the flag is returned.
pub async fn execute_sequentially(
    executives: &dyn ExecutiveProvider,
    chain_context: &ChainContext,
    transactions: &[Transaction],
    overlay: &mut StateOverlay,
    cancel: &CancellationToken,
) -> (Vec<ExecutionReturnSet>, bool) {
    let mut return_sets = Vec::with_capacity(transactions.len());

    for transaction in transactions {
        if cancel.is_cancelled() {
            return (return_sets, true);
        }
        let return_set =
            execute_transaction(executives, chain_context, transaction, &*overlay).await;
        overlay.apply(&return_set);
        return_sets.push(return_set);
    }

    (return_sets, false)
}

/// Run one group on a private overlay over `base`.
pub async fn run_group(
    executives: Arc<dyn ExecutiveProvider>,
    chain_context: ChainContext,
    base: Arc<dyn StateReader>,
    transactions: Vec<Transaction>,
    cancel: CancellationToken,
) -> GroupOutcome {
    let mut overlay = StateOverlay::new(base);
    let (return_sets, cancelled) = execute_sequentially(
        executives.as_ref(),
        &chain_context,
        &transactions,
        &mut overlay,
        &cancel,
    )
    .await;

    GroupOutcome {
        return_sets,
        state_set: overlay.into_state_set(),
        cancelled,
    }
}

/// Run every group concurrently, one task each. Outcomes come back in group order.
///
/// A group whose task panics reports every transaction as failed with no state.
pub async fn run_groups(
    executives: Arc<dyn ExecutiveProvider>,
    chain_context: ChainContext,
    base: Arc<dyn StateReader>,
    groups: Vec<Vec<Transaction>>,
    cancel: CancellationToken,
) -> Vec<GroupOutcome> {
    let group_ids: Vec<Vec<Hash>> = groups
        .iter()
        .map(|group| group.iter().map(Transaction::id).collect())
        .collect();

    let mut tasks = JoinSet::new();
    for (index, transactions) in groups.into_iter().enumerate() {
        let outcome = run_group(
            executives.clone(),
            chain_context,
            base.clone(),
            transactions,
            cancel.clone(),
        );
        tasks.spawn(async move { (index, outcome.await) });
    }

    let mut outcomes: Vec<Option<GroupOutcome>> = vec![None; group_ids.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(err) => error!(error = %err, "[qc-12] Group task aborted"),
        }
    }

    outcomes
        .into_iter()
        .zip(group_ids)
        .map(|(outcome, ids)| {
            outcome.unwrap_or_else(|| GroupOutcome {
                return_sets: ids
                    .into_iter()
                    .map(|id| ExecutionReturnSet::failed(id, TASK_PANICKED_ERROR))
                    .collect(),
                ..Default::default()
            })
        })
        .collect()
}
