//! # Integration Test Flows
//!
//! Drives qc-12-parallel-execution block by block over an in-memory chain,
//! checking the guarantees a block producer relies on.
//!
//! ## Flows Tested:
//!
//! 1. **Sequential equivalence**: parallel blocks commit the same state as a
//!    node with parallelism disabled
//! 2. **Lying contracts**: caught at merge, re-executed, remarked for descendants
//! 3. **Forks and finality**: remarks stay on their branch until promoted
//! 4. **Opaque contracts**: a throwing resource entry point means sequential
//! 5. **Pool precompute**: footprints computed at admission are reused while
//!    they still hold on the branch being built
//! 6. **Cancellation**: a cancelled block returns an input-order prefix

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use primitive_types::{H160, H256};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    use qc_12_parallel_execution::domain::invariants::invariant_input_order;
    use qc_12_parallel_execution::test_utils::{
        InMemoryChain, MemoryState, ResourceMode, TestCall, TestExecutiveProvider,
    };
    use qc_12_parallel_execution::{
        BlockEventHandler, BlockExecutionResult, BlockHeader, BlockIndex, ChainContext,
        ExecutionPorts, ExecutionStatus, Hash, ParallelExecutionApi, ParallelExecutionConfig,
        ParallelExecutionService, StateError, StateKey, StateReader, Transaction,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const GENESIS: u64 = 1;
    const TOKEN_CODE: u64 = 0xc0de;

    fn hash(n: u64) -> Hash {
        H256::from_low_u64_be(n)
    }

    /// Contract that declares its footprint
    fn token() -> H160 {
        H160::from_low_u64_be(0xc0)
    }

    /// Contract whose resource entry point throws
    fn legacy() -> H160 {
        H160::from_low_u64_be(0xc1)
    }

    fn genesis() -> BlockHeader {
        BlockHeader::new(hash(GENESIS), Hash::zero(), 0)
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    struct Node {
        service: ParallelExecutionService,
        events: BlockEventHandler,
        chain: Arc<InMemoryChain>,
        state: MemoryState,
        executives: Arc<TestExecutiveProvider>,
    }

    fn node(config: ParallelExecutionConfig) -> Node {
        init_tracing();
        let chain = Arc::new(InMemoryChain::with_genesis(hash(GENESIS)));
        let executives = Arc::new(TestExecutiveProvider::new());
        executives.register(token(), hash(TOKEN_CODE), ResourceMode::Declares);
        executives.register(legacy(), hash(0x01d), ResourceMode::Throws);
        let state = MemoryState::default();

        let ports = ExecutionPorts {
            executives: executives.clone(),
            states: Arc::new(state.clone()),
            store: chain.clone(),
            links: chain.clone(),
        };
        let service = ParallelExecutionService::with_config(config, ports).unwrap();
        Node {
            events: service.event_handler(),
            service,
            chain,
            state,
            executives,
        }
    }

    impl Node {
        /// Execute a block on top of `parent`, then append it and commit its state.
        async fn produce(
            &self,
            block_hash: u64,
            parent: &BlockHeader,
            transactions: Vec<Transaction>,
        ) -> (BlockHeader, BlockExecutionResult) {
            let header = BlockHeader::new(hash(block_hash), parent.block_hash, parent.height + 1);
            self.chain.add_transactions(transactions.clone());

            let result = self
                .service
                .execute_block(
                    &header,
                    transactions.clone(),
                    Arc::new(self.state.clone()),
                    CancellationToken::new(),
                )
                .await
                .unwrap();

            let block = self.chain.add_block(header, transactions);
            self.chain.set_best(header.block_hash);
            self.state.commit(&result.state_set);
            self.events.on_block_accepted(&block);
            (header, result)
        }

        fn snapshot(&self) -> BTreeMap<StateKey, Vec<u8>> {
            self.state.snapshot()
        }
    }

    fn call(sender: u64, to: H160, call: TestCall) -> Transaction {
        Transaction::new(H160::from_low_u64_be(sender), to, "Transfer", call.encode())
    }

    fn write(sender: u64, key: &str, tag: u8) -> Transaction {
        call(sender, token(), TestCall::honest(&[], &[key], tag))
    }

    fn ids(transactions: &[Transaction]) -> Vec<Hash> {
        transactions.iter().map(Transaction::id).collect()
    }

    /// Honest transactions over a small, heavily contended key space.
    fn random_block(rng: &mut StdRng, block: u64, len: usize) -> Vec<Transaction> {
        const KEYS: [&str; 10] = ["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7", "k8", "k9"];

        (0..len)
            .map(|i| {
                let reads: Vec<&str> = (0..rng.gen_range(0..3))
                    .map(|_| KEYS[rng.gen_range(0..KEYS.len())])
                    .collect();
                let writes: Vec<&str> = (0..rng.gen_range(1..3))
                    .map(|_| KEYS[rng.gen_range(0..KEYS.len())])
                    .collect();
                let sender = block * 1_000 + i as u64;
                call(sender, token(), TestCall::honest(&reads, &writes, i as u8))
            })
            .collect()
    }

    // =============================================================================
    // SEQUENTIAL EQUIVALENCE
    // =============================================================================

    /// T1 and T3 write the same key, T2 is independent
    #[tokio::test]
    async fn test_t1_t2_t3_block_matches_sequential_node() {
        let parallel = node(ParallelExecutionConfig::default());
        let sequential = node(ParallelExecutionConfig::sequential());
        let txs = vec![write(1, "a", 1), write(2, "b", 2), write(3, "a", 3)];

        let (_, result) = parallel.produce(11, &genesis(), txs.clone()).await;
        sequential.produce(11, &genesis(), txs.clone()).await;

        assert_eq!(parallel.snapshot(), sequential.snapshot());
        assert_eq!(parallel.snapshot().get(&StateKey::from("a")), Some(&vec![1, 3]));
        assert!(invariant_input_order(&ids(&txs), &result.return_sets));
        assert_eq!(result.return_sets.len(), 3);
        assert!(result.conflicting_transactions.is_empty());
    }

    #[tokio::test]
    async fn test_random_blocks_match_sequential_node() {
        let configs = [
            ParallelExecutionConfig::default(),
            ParallelExecutionConfig {
                read_sharing: true,
                ..Default::default()
            },
            ParallelExecutionConfig {
                max_parallel_groups: Some(3),
                ..Default::default()
            },
        ];

        for config in configs {
            let mut rng = StdRng::seed_from_u64(12);
            let parallel = node(config.clone());
            let sequential = node(ParallelExecutionConfig::sequential());
            let mut parent = genesis();

            for block in 0..8u64 {
                let txs = random_block(&mut rng, block, 40);
                let (header, result) = parallel.produce(100 + block, &parent, txs.clone()).await;
                sequential.produce(100 + block, &parent, txs.clone()).await;

                assert_eq!(
                    parallel.snapshot(),
                    sequential.snapshot(),
                    "state diverged at block {block} with {config:?}"
                );
                assert!(invariant_input_order(&ids(&txs), &result.return_sets));
                assert!(result.return_sets.iter().all(|set| set.is_mined()));
                // Honest transactions are never blamed
                assert!(result.wrong_transactions.is_empty());
                parent = header;
            }
        }
    }

    // =============================================================================
    // LYING CONTRACTS
    // =============================================================================

    #[tokio::test]
    async fn test_random_liars_are_caught_and_state_stays_sequential() {
        let mut rng = StdRng::seed_from_u64(7);

        for trial in 0..16u64 {
            let parallel = node(ParallelExecutionConfig::default());
            let sequential = node(ParallelExecutionConfig::sequential());

            // Declares "own", also writes the honest transaction's key
            let honest = write(1, "shared", 1);
            let liar = call(2, token(), TestCall::lying(&["own"], &["shared", "own"], 2));
            let mut txs: Vec<Transaction> =
                (0..6).map(|i| write(10 + i, &format!("n{i}"), 3)).collect();
            txs.insert(rng.gen_range(0..=txs.len()), honest.clone());
            txs.insert(rng.gen_range(0..=txs.len()), liar.clone());

            let (_, result) = parallel.produce(11, &genesis(), txs.clone()).await;
            sequential.produce(11, &genesis(), txs.clone()).await;

            assert_eq!(result.wrong_transactions, vec![liar.id()], "trial {trial}");
            assert_eq!(result.conflicting_transactions.len(), 1, "trial {trial}");
            assert_eq!(parallel.snapshot(), sequential.snapshot(), "trial {trial}");
        }
    }

    #[tokio::test]
    async fn test_liar_remark_applies_to_descendants_only() {
        let node = node(ParallelExecutionConfig::default());
        let liar = call(2, token(), TestCall::lying(&["b"], &["a", "b"], 2));
        let (block_11, result) = node
            .produce(11, &genesis(), vec![write(1, "a", 1), liar.clone()])
            .await;
        assert_eq!(result.wrong_transactions, vec![liar.id()]);

        // Sibling of block 11
        let (block_21, _) = node.produce(21, &genesis(), vec![]).await;

        let on_branch = node
            .service
            .group_transactions(&ChainContext::new(block_11.block_hash, 1), vec![write(5, "x", 5)])
            .await;
        assert_eq!(on_branch.non_parallelizables.len(), 1);

        let on_sibling = node
            .service
            .group_transactions(&ChainContext::new(block_21.block_hash, 1), vec![write(6, "x", 6)])
            .await;
        assert_eq!(on_sibling.parallelizables.len(), 1);
        assert!(on_sibling.non_parallelizables.is_empty());
    }

    #[tokio::test]
    async fn test_remarked_code_runs_sequentially_in_next_block() {
        let node = node(ParallelExecutionConfig::default());
        let liar = call(2, token(), TestCall::lying(&["b"], &["a"], 2));
        let (block_11, _) = node
            .produce(11, &genesis(), vec![write(1, "a", 1), liar])
            .await;

        // Same lie again: it runs before the groups, so nothing conflicts
        let again = call(4, token(), TestCall::lying(&["b"], &["a"], 4));
        let (_, result) = node
            .produce(12, &block_11, vec![write(3, "a", 3), again])
            .await;

        assert!(result.conflicting_transactions.is_empty());
        assert!(result.return_sets.iter().all(|set| set.is_mined()));
        assert_eq!(node.snapshot().get(&StateKey::from("a")), Some(&vec![1, 2, 4, 3]));
    }

    #[tokio::test]
    async fn test_code_upgrade_lifts_remark() {
        let node = node(ParallelExecutionConfig::default());
        let liar = call(2, token(), TestCall::lying(&["b"], &["a"], 2));
        let (block_11, _) = node
            .produce(11, &genesis(), vec![write(1, "a", 1), liar])
            .await;
        let context = ChainContext::new(block_11.block_hash, 1);

        let before = node.service.get_resource_info(&context, &write(5, "x", 5)).await;
        assert!(before.is_nonparallel_contract_code);

        node.executives.upgrade(token(), hash(0xbeef));
        let after = node.service.get_resource_info(&context, &write(6, "x", 6)).await;
        assert!(!after.is_nonparallel_contract_code);
        assert_eq!(after.contract_hash, Some(hash(0xbeef)));
    }

    #[tokio::test]
    async fn test_conflicts_reported_without_reexecution() {
        let node = node(ParallelExecutionConfig {
            reexecute_conflicts: false,
            ..Default::default()
        });
        let liar = call(2, token(), TestCall::lying(&["b"], &["a", "b"], 2));

        let (_, result) = node
            .produce(11, &genesis(), vec![write(1, "a", 1), liar.clone()])
            .await;

        assert_eq!(result.conflicting_transactions, vec![liar.id()]);
        assert_eq!(result.return_sets[1].status, ExecutionStatus::Conflict);
        assert_eq!(node.snapshot().get(&StateKey::from("a")), Some(&vec![1]));
        assert_eq!(node.snapshot().get(&StateKey::from("b")), None);
    }

    // =============================================================================
    // FORKS AND FINALITY
    // =============================================================================

    #[tokio::test]
    async fn test_promotion_is_idempotent() {
        let node = node(ParallelExecutionConfig::default());
        let liar = call(2, token(), TestCall::lying(&["b"], &["a"], 2));
        let (block_11, _) = node
            .produce(11, &genesis(), vec![write(1, "a", 1), liar])
            .await;
        let (block_12, _) = node.produce(12, &block_11, vec![]).await;
        let (block_21, _) = node.produce(21, &genesis(), vec![]).await;
        let lib = BlockIndex::new(block_12.block_hash, block_12.height);

        let promoted = node.events.on_new_irreversible_block(lib).await.unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].contract_address, token());
        assert!(promoted[0].is_durable());

        let again = node.events.on_new_irreversible_block(lib).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(node.service.remarks().durable_len(), 1);
        assert_eq!(node.service.remarks().pending_len(), 0);

        // Durable remarks hold on every branch
        node.events
            .on_branches_pruned(&[BlockIndex::new(block_21.block_hash, 1)]);
        let info = node
            .service
            .get_resource_info(&ChainContext::new(block_21.block_hash, 1), &write(9, "x", 9))
            .await;
        assert!(info.is_nonparallel_contract_code);
    }

    #[tokio::test]
    async fn test_pruned_branch_forgets_its_remark() {
        let node = node(ParallelExecutionConfig::default());
        let liar = call(2, token(), TestCall::lying(&["b"], &["a"], 2));
        let (block_21, _) = node
            .produce(21, &genesis(), vec![write(1, "a", 1), liar])
            .await;
        assert_eq!(node.service.remarks().pending_len(), 1);

        node.events
            .on_branches_pruned(&[BlockIndex::new(block_21.block_hash, 1)]);

        assert_eq!(node.service.remarks().pending_len(), 0);
        let info = node
            .service
            .get_resource_info(&ChainContext::new(block_21.block_hash, 1), &write(9, "x", 9))
            .await;
        assert!(!info.is_nonparallel_contract_code);
    }

    // =============================================================================
    // OPAQUE CONTRACTS
    // =============================================================================

    #[tokio::test]
    async fn test_throwing_resource_entry_point_runs_sequentially() {
        let node = node(ParallelExecutionConfig::default());
        let mut txs: Vec<Transaction> = (1..=4u8)
            .map(|tag| call(tag as u64, legacy(), TestCall::honest(&[], &["a"], tag)))
            .collect();
        txs.push(write(10, "b", 10));
        txs.push(write(11, "c", 11));

        let grouped = node
            .service
            .group_transactions(&ChainContext::new(hash(GENESIS), 0), txs.clone())
            .await;
        assert_eq!(ids(&grouped.non_parallelizables), ids(&txs[..4]));
        assert_eq!(grouped.parallelizables.len(), 2);

        let (_, result) = node.produce(11, &genesis(), txs).await;
        assert!(result.return_sets.iter().all(|set| set.is_mined()));
        assert_eq!(node.snapshot().get(&StateKey::from("a")), Some(&vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn test_unknown_contract_fails_and_block_continues() {
        let node = node(ParallelExecutionConfig::default());
        let orphan = call(1, H160::from_low_u64_be(0xdead), TestCall::honest(&[], &["z"], 1));

        // Unresolvable footprints are never cached
        let context = ChainContext::new(hash(GENESIS), 0);
        node.service.get_resource_info(&context, &orphan).await;
        assert!(node.service.resource_cache().is_empty());

        let (_, result) = node
            .produce(11, &genesis(), vec![orphan, write(2, "a", 2)])
            .await;

        assert_eq!(result.return_sets[0].status, ExecutionStatus::Failed);
        assert!(result.return_sets[1].is_mined());
        assert_eq!(node.snapshot().get(&StateKey::from("z")), None);
    }

    // =============================================================================
    // POOL PRECOMPUTE
    // =============================================================================

    #[tokio::test]
    async fn test_pool_precompute_is_reused_by_block() {
        let node = node(ParallelExecutionConfig::default());
        let txs: Vec<Transaction> = (0..5u8)
            .map(|i| write(i as u64, &format!("k{i}"), i))
            .collect();
        node.chain.add_transactions(txs.clone());

        for tx in &txs {
            node.events.on_transaction_accepted(tx).await.unwrap();
        }
        assert_eq!(node.service.resource_cache().len(), 5);
        let introspections = node.executives.checkouts();
        assert_eq!(introspections, 5);

        // Same code, no remark: the cached entries still hold at block 11
        node.produce(11, &genesis(), txs).await;

        // Only the executions themselves checked out executives
        assert_eq!(node.executives.checkouts(), introspections + 5);
        assert_eq!(node.executives.outstanding(), 0);
        assert!(node.service.resource_cache().is_empty());
    }

    #[tokio::test]
    async fn test_pooled_liar_runs_sequentially_in_next_block() {
        let node = node(ParallelExecutionConfig::default());
        let pooled = write(5, "z", 5);
        node.events.on_transaction_accepted(&pooled).await.unwrap();
        assert_eq!(node.service.resource_cache().len(), 1);

        // The contract is caught lying after the footprint was cached
        let liar = call(2, token(), TestCall::lying(&["b"], &["a", "b"], 2));
        let (block_11, _) = node
            .produce(11, &genesis(), vec![write(1, "a", 1), liar])
            .await;

        let context = ChainContext::new(block_11.block_hash, 1);
        let grouped = node
            .service
            .group_transactions(&context, vec![pooled.clone(), write(6, "y", 6)])
            .await;
        assert_eq!(ids(&grouped.non_parallelizables), vec![pooled.id()]);

        let (_, result) = node
            .produce(12, &block_11, vec![pooled, write(6, "y", 6)])
            .await;
        assert!(result.conflicting_transactions.is_empty());
        assert!(result.return_sets.iter().all(|set| set.is_mined()));
    }

    #[tokio::test]
    async fn test_cached_pool_info_sees_remark_on_its_branch_only() {
        let node = node(ParallelExecutionConfig::default());
        let liar = call(2, token(), TestCall::lying(&["b"], &["a", "b"], 2));
        let (block_11, _) = node
            .produce(11, &genesis(), vec![write(1, "a", 1), liar])
            .await;
        let (block_21, _) = node.produce(21, &genesis(), vec![]).await;

        // Precomputed at the best chain, which is now the unremarked sibling
        let pooled = write(5, "z", 5);
        node.events.on_transaction_accepted(&pooled).await.unwrap();
        assert_eq!(node.service.resource_cache().len(), 1);

        let on_branch = node
            .service
            .group_transactions(&ChainContext::new(block_11.block_hash, 1), vec![pooled.clone()])
            .await;
        assert_eq!(ids(&on_branch.non_parallelizables), vec![pooled.id()]);

        let on_sibling = node
            .service
            .group_transactions(&ChainContext::new(block_21.block_hash, 1), vec![pooled.clone()])
            .await;
        assert!(on_sibling.non_parallelizables.is_empty());
        assert_eq!(on_sibling.parallelizables, vec![vec![pooled]]);
    }

    // =============================================================================
    // CANCELLATION
    // =============================================================================

    /// Base state that fires `cancel` on its N-th read.
    struct CancelAfterReads {
        inner: MemoryState,
        cancel: CancellationToken,
        remaining: AtomicUsize,
    }

    #[async_trait]
    impl StateReader for CancelAfterReads {
        async fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>, StateError> {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.cancel.cancel();
            }
            self.inner.get_state(key).await
        }
    }

    #[tokio::test]
    async fn test_cancelled_block_returns_input_order_prefix() {
        let node = node(ParallelExecutionConfig::default());
        // Sequential transactions on distinct keys: one base read each
        let mut txs: Vec<Transaction> = (0..5u8)
            .map(|i| {
                let key = format!("s{i}");
                call(i as u64, legacy(), TestCall::honest(&[], &[key.as_str()], i))
            })
            .collect();
        txs.push(write(20, "p", 20));
        node.chain.add_transactions(txs.clone());

        let cancel = CancellationToken::new();
        let base = Arc::new(CancelAfterReads {
            inner: node.state.clone(),
            cancel: cancel.clone(),
            remaining: AtomicUsize::new(2),
        });
        let header = BlockHeader::new(hash(11), hash(GENESIS), 1);

        let result = node
            .service
            .execute_block(&header, txs.clone(), base, cancel)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(
            result.return_sets.iter().map(|s| s.transaction_id).collect::<Vec<_>>(),
            ids(&txs[..2])
        );
        assert!(invariant_input_order(&ids(&txs), &result.return_sets));
        assert!(result.state_set.changes.get(&StateKey::from("p")).is_none());
    }
}
