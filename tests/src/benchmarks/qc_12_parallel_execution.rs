//! # QC-12 Parallel Execution Brutal Benchmarks
//!
//! Hot paths of one block:
//! - Union-find grouping: near-linear in declared keys
//! - Group balancing: O(n log k) for n groups into k bins
//! - Merge conflict detection: linear in touched keys
//! - Whole block execution against in-memory collaborators
//!
//! Brutal Conditions:
//! - 10,000 transaction blocks
//! - Hot keys shared by a large share of the block
//! - Lying contracts forcing merge rejection and re-execution

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use primitive_types::{H160, H256};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use qc_12_parallel_execution::algorithms::{
    balance_groups, find_conflicting_groups, group_by_keys,
};
use qc_12_parallel_execution::test_utils::{
    InMemoryChain, MemoryState, ResourceMode, TestCall, TestExecutiveProvider,
};
use qc_12_parallel_execution::{
    BlockHeader, ExecutionPorts, ExecutionReturnSet, ParallelExecutionApi,
    ParallelExecutionService, StateKey, Transaction, TransactionResourceInfo,
};

fn key(n: usize) -> StateKey {
    StateKey::new(format!("balance/{n}").into_bytes())
}

/// Footprints touching `key_space` keys; every tenth also touches a hot key.
fn random_infos(
    rng: &mut StdRng,
    count: usize,
    key_space: usize,
) -> Vec<TransactionResourceInfo> {
    (0..count)
        .map(|i| {
            let mut writes = vec![key(rng.gen_range(0..key_space))];
            if i % 10 == 0 {
                writes.push(key(key_space + rng.gen_range(0..4)));
            }
            let reads = vec![key(rng.gen_range(0..key_space))];
            TransactionResourceInfo::parallelizable(H256::from_low_u64_be(i as u64), reads, writes)
        })
        .collect()
}

pub fn brutal_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-12/brutal/grouping");
    group.measurement_time(Duration::from_secs(10));

    for count in [100, 1_000, 10_000] {
        let mut rng = StdRng::seed_from_u64(count as u64);
        let infos = random_infos(&mut rng, count, count * 4);
        let refs: Vec<&TransactionResourceInfo> = infos.iter().collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("group_by_keys", count), &refs, |b, refs| {
            b.iter(|| black_box(group_by_keys(refs, false)))
        });
        group.bench_with_input(
            BenchmarkId::new("group_by_keys_read_sharing", count),
            &refs,
            |b, refs| b.iter(|| black_box(group_by_keys(refs, true))),
        );
    }

    group.finish();
}

pub fn brutal_balancing(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-12/brutal/balancing");

    for count in [1_000, 10_000] {
        let groups: Vec<Vec<usize>> = (0..count).map(|i| vec![i]).collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("balance_into_16", count), &groups, |b, groups| {
            b.iter(|| black_box(balance_groups(groups.clone(), 16)))
        });
    }

    group.finish();
}

pub fn brutal_conflict_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-12/brutal/conflicts");

    // One group in eight wrote a key it never declared
    for groups in [16, 128] {
        let sets: Vec<Vec<ExecutionReturnSet>> = (0..groups)
            .map(|g| {
                (0..64)
                    .map(|t| {
                        let id = H256::from_low_u64_be((g * 64 + t) as u64);
                        let mut set = ExecutionReturnSet::mined(id);
                        let own = key(g * 64 + t);
                        set.state_accesses.insert(own.clone(), true);
                        set.state_changes.insert(own, vec![1]);
                        if g % 8 == 7 && t == 0 {
                            set.state_accesses.insert(key(0), true);
                            set.state_changes.insert(key(0), vec![2]);
                        }
                        set
                    })
                    .collect()
            })
            .collect();

        group.throughput(Throughput::Elements((groups * 64) as u64));
        group.bench_with_input(
            BenchmarkId::new("find_conflicting_groups", groups),
            &sets,
            |b, sets| b.iter(|| black_box(find_conflicting_groups(sets))),
        );
    }

    group.finish();
}

pub fn brutal_block_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-12/brutal/execute_block");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(_) => return,
    };
    let contract = H160::from_low_u64_be(0xc0);

    for (name, liars) in [("honest", false), ("with_liars", true)] {
        let mut rng = StdRng::seed_from_u64(42);
        let txs: Vec<Transaction> = (0..1_000u64)
            .map(|i| {
                let own = format!("balance/{}", rng.gen_range(0..4_000));
                let call = if liars && i % 50 == 0 {
                    TestCall::lying(&[own.as_str()], &[own.as_str(), "fees"], i as u8)
                } else {
                    TestCall::honest(&[], &[own.as_str()], i as u8)
                };
                Transaction::new(H160::from_low_u64_be(i), contract, "Transfer", call.encode())
            })
            .collect();

        group.throughput(Throughput::Elements(txs.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, txs.len()), &txs, |b, txs| {
            b.iter(|| {
                // Fresh service per block: remarks from liars must not leak between runs
                let chain = Arc::new(InMemoryChain::with_genesis(H256::from_low_u64_be(1)));
                chain.add_transactions(txs.clone());
                let executives = Arc::new(TestExecutiveProvider::new());
                executives.register(contract, H256::from_low_u64_be(7), ResourceMode::Declares);
                let state = MemoryState::default();
                let service = ParallelExecutionService::new(ExecutionPorts {
                    executives,
                    states: Arc::new(state.clone()),
                    store: chain.clone(),
                    links: chain,
                });
                let header =
                    BlockHeader::new(H256::from_low_u64_be(2), H256::from_low_u64_be(1), 1);

                let result = runtime.block_on(service.execute_block(
                    &header,
                    txs.clone(),
                    Arc::new(state),
                    CancellationToken::new(),
                ));
                black_box(result.map(|r| r.return_sets.len()))
            })
        });
    }

    group.finish();
}

pub fn register_benchmarks(c: &mut Criterion) {
    brutal_grouping(c);
    brutal_balancing(c);
    brutal_conflict_detection(c);
    brutal_block_execution(c);
}
