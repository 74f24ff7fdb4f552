//! Watches `where` clauses passed to the resolver and creates a secondary
//! index once a (table, field) pair crosses an access threshold, so a
//! predicate that keeps getting reused stops paying for a full scan.
//!
//! State lives in one struct owned by whatever resolves queries, rather
//! than a process-wide global — each resolver instance gets its own access
//! history, which keeps tests isolated from one another.

#[cfg(test)]
mod tests;

use ahash::RandomState;
use catalog::IndexKind;
use common::{DbResult, StoreConfig};
use filterengine::{FieldOp, WhereNode};
use hashbrown::HashMap;
use table::Table;
use tracing::info;

type Counters = HashMap<(String, String), u32, RandomState>;

/// Per-instance access counters driving dynamic index creation.
pub struct IndexAdvisor {
    counters: Counters,
    threshold: u32,
}

impl IndexAdvisor {
    pub fn new(threshold: u32) -> Self {
        Self {
            counters: Counters::default(),
            threshold,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.optimizer_threshold)
    }

    /// Record every indexable predicate in `node` against `table_name`,
    /// creating an index on `table` for any field that just crossed the
    /// threshold. A field that already carries an index is never counted.
    pub fn observe(&mut self, table_name: &str, table: &mut Table, node: &WhereNode) -> DbResult<()> {
        if self.threshold == 0 {
            return Ok(());
        }
        let mut fields = Vec::new();
        collect_indexable_fields(node, &mut fields);

        for field in fields {
            if table.metadata().has_index(&field) {
                continue;
            }
            let key = (table_name.to_string(), field.clone());
            let count = self.counters.entry(key.clone()).or_insert(0);
            *count += 1;
            let reached = *count >= self.threshold;
            if reached {
                self.counters.remove(&key);
                table.create_index(&field, IndexKind::BTree)?;
                info!(table = table_name, field, "dynamic index created");
            }
        }
        Ok(())
    }
}

/// Walk a `where` tree collecting fields under an operator that an index
/// could actually serve: `equals`/`in`/`lt`/`lte`/`gt`/`gte`. `AND`/`OR`/`NOT`
/// are traversed transparently — a field under `NOT` still counts.
fn collect_indexable_fields(node: &WhereNode, out: &mut Vec<String>) {
    match node {
        WhereNode::And(children) | WhereNode::Or(children) => {
            for child in children {
                collect_indexable_fields(child, out);
            }
        }
        WhereNode::Not(child) => collect_indexable_fields(child, out),
        WhereNode::Field { field, op } => {
            if matches!(
                op,
                FieldOp::Equals(_)
                    | FieldOp::In(_)
                    | FieldOp::Lt(_)
                    | FieldOp::Lte(_)
                    | FieldOp::Gt(_)
                    | FieldOp::Gte(_)
            ) {
                out.push(field.clone());
            }
        }
    }
}
