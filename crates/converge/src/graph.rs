//! The operation graph: per-host operation lists and one global order
//!
//! Every host contributes a chain: each of its operations depends on the one
//! it declared just before. The union of the chains is sorted topologically,
//! with ties broken by first declaration, giving one order that every host
//! can follow even when hosts skip different operations.

use crate::conditional::Predicate;
use crate::error::{Error, Result};
use crate::operation::{GlobalArgs, OpHash, Operation, OperationBody, OperationHandle, OperationMeta};
use crate::types::OperationOutcome;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;

/// One host's copy of an operation node.
#[derive(Clone)]
pub struct HostOperation {
    pub hash: OpHash,
    pub body: OperationBody,
    pub global_args: GlobalArgs,
    pub conditions: Vec<Predicate>,
}

impl fmt::Debug for HostOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostOperation")
            .field("hash", &self.hash)
            .field("body", &self.body)
            .field("conditions", &self.conditions.len())
            .finish_non_exhaustive()
    }
}

/// Per-operation result counts for tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub name: String,
    pub hosts: usize,
    pub changed: usize,
    pub errored: usize,
    pub no_change: usize,
    /// Hosts whose `when` predicates did not hold
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct OperationGraph {
    metas: HashMap<OpHash, Arc<OperationMeta>>,
    sequence: HashMap<OpHash, usize>,
    host_ops: BTreeMap<String, Vec<OpHash>>,
    nodes: HashMap<(String, OpHash), HostOperation>,
    occurrences: HashMap<(String, String), usize>,
}

impl OperationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `operation` to `host`'s chain.
    ///
    /// Declarations with the same identity and arguments share one
    /// [`OperationMeta`] across hosts. Repeating one on the same host makes a
    /// new node.
    pub fn add(
        &mut self,
        host: &str,
        operation: Operation,
        global_args: GlobalArgs,
        conditions: Vec<Predicate>,
    ) -> OperationHandle {
        let (identity, name, args, body) = operation.into_parts();

        let occurrence_key = (host.to_string(), format!("{identity}\0{args}"));
        let occurrence = self.occurrences.entry(occurrence_key).or_insert(0);
        let hash = OpHash::compute(&identity, &args, *occurrence);
        *occurrence += 1;

        let next_sequence = self.sequence.len();
        self.sequence.entry(hash.clone()).or_insert(next_sequence);
        let meta = self
            .metas
            .entry(hash.clone())
            .or_insert_with(|| Arc::new(OperationMeta::new(hash.clone(), &identity, args)));
        meta.add_declaration(host, name.as_deref().unwrap_or(&identity));
        let meta = Arc::clone(meta);

        self.host_ops
            .entry(host.to_string())
            .or_default()
            .push(hash.clone());
        self.nodes.insert(
            (host.to_string(), hash.clone()),
            HostOperation {
                hash,
                body,
                global_args,
                conditions,
            },
        );

        OperationHandle::new(meta, host)
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn meta(&self, hash: &OpHash) -> Option<&Arc<OperationMeta>> {
        self.metas.get(hash)
    }

    pub fn host_operation(&self, host: &str, hash: &OpHash) -> Option<&HostOperation> {
        self.nodes.get(&(host.to_string(), hash.clone()))
    }

    /// Operations of one host in declaration order.
    pub fn host_ops(&self, host: &str) -> &[OpHash] {
        self.host_ops.get(host).map_or(&[], Vec::as_slice)
    }

    /// The global execution order.
    pub fn op_order(&self) -> Result<Vec<OpHash>> {
        let mut successors: HashMap<&OpHash, BTreeSet<&OpHash>> = HashMap::new();
        let mut in_degree: HashMap<&OpHash, usize> =
            self.metas.keys().map(|hash| (hash, 0)).collect();

        for chain in self.host_ops.values() {
            for pair in chain.windows(2) {
                if successors.entry(&pair[0]).or_default().insert(&pair[1]) {
                    *in_degree.entry(&pair[1]).or_default() += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<(usize, &OpHash)>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(hash, _)| Reverse((self.sequence[*hash], *hash)))
            .collect();

        let mut order = Vec::with_capacity(self.metas.len());
        while let Some(Reverse((_, hash))) = ready.pop() {
            order.push(hash.clone());
            for next in successors.get(hash).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.sequence[*next], *next)));
                    }
                }
            }
        }

        if order.len() < self.metas.len() {
            let ordered: BTreeSet<&OpHash> = order.iter().collect();
            let mut stuck: Vec<(usize, String)> = self
                .metas
                .iter()
                .filter(|(hash, _)| !ordered.contains(hash))
                .map(|(hash, meta)| (self.sequence[hash], meta.display_name()))
                .collect();
            stuck.sort();
            let names: Vec<String> = stuck.into_iter().map(|(_, name)| name).collect();
            return Err(Error::OperationOrder {
                message: format!(
                    "hosts declare these operations in conflicting orders: {}",
                    names.join(", ")
                ),
            });
        }

        Ok(order)
    }

    /// Result counts per operation, in execution order.
    pub fn summary_rows(&self) -> Result<Vec<SummaryRow>> {
        Ok(self
            .op_order()?
            .iter()
            .map(|hash| {
                let meta = &self.metas[hash];
                let mut row = SummaryRow {
                    name: meta.display_name(),
                    hosts: meta.hosts().len(),
                    changed: 0,
                    errored: 0,
                    no_change: 0,
                    skipped: 0,
                };
                for outcome in meta.outcomes().values() {
                    match outcome {
                        OperationOutcome::Errored { .. } => row.errored += 1,
                        OperationOutcome::Changed => row.changed += 1,
                        OperationOutcome::NoChange => row.no_change += 1,
                        OperationOutcome::NotRun => row.skipped += 1,
                    }
                }
                row
            })
            .collect())
    }
}
