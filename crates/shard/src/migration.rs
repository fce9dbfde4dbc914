//! Hot-shard split executor
//!
//! Runs on the source shard's leader. For each table: make sure the target
//! has the schema, copy every row whose key hash falls in the moved half,
//! delete those rows locally through the normal replication path, then record
//! both new ranges. Copy must succeed before anything is deleted; there is no
//! commit spanning both shards, so a crash between the copy and the range
//! update leaves rows on both sides.

use std::sync::Arc;

use tracing::{error, info};
use ts_core::protocol::{
    MigrationReport, SqlBatchRequest, SqlRequest, TableMigration, TableMigrationFailure,
    TransferSpec,
};
use ts_core::{hash_key, ClusterError, ShardId, StatusCode};

use crate::membership::ShardMembership;
use crate::peer::PeerClient;
use crate::replication::{Replicator, WriteKind};
use crate::sql::{insert_statement, quote_ident, SqlEngine};

/// Keys per replicated DELETE statement
pub const DELETE_CHUNK: usize = 500;

pub struct Migrator {
    engine: Arc<dyn SqlEngine>,
    membership: Arc<ShardMembership>,
    replicator: Arc<Replicator>,
    peers: Arc<dyn PeerClient>,
}

impl Migrator {
    pub fn new(
        engine: Arc<dyn SqlEngine>,
        membership: Arc<ShardMembership>,
        replicator: Arc<Replicator>,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        Self {
            engine,
            membership,
            replicator,
            peers,
        }
    }

    /// Move the `new*` half of each listed table to `target_addr`.
    ///
    /// A failing table is reported and skipped; rows already copied for it are
    /// not rolled back.
    pub async fn hot_send(
        &self,
        target_addr: &str,
        target_shard: ShardId,
        specs: &[TransferSpec],
    ) -> Result<MigrationReport, ClusterError> {
        let source_shard = self.membership.shard().ok_or(ClusterError::NotMember)?;
        if !self.membership.is_leader() {
            return Err(ClusterError::Execution(
                "hot send must run on the shard leader".to_string(),
            ));
        }
        info!(
            "Sending {} table halves from shard {} to shard {} at {}",
            specs.len(),
            source_shard,
            target_shard,
            target_addr
        );

        let mut report = MigrationReport::default();
        for spec in specs {
            match self
                .transfer_table(target_addr, source_shard, target_shard, spec)
                .await
            {
                Ok(rows_moved) => report.moved.push(TableMigration {
                    table_name: spec.table_name.clone(),
                    rows_moved,
                }),
                Err(e) => {
                    error!("Migration of {} to shard {} failed: {}", spec.table_name, target_shard, e);
                    report.failed.push(TableMigrationFailure {
                        table_name: spec.table_name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn transfer_table(
        &self,
        target_addr: &str,
        source_shard: ShardId,
        target_shard: ShardId,
        spec: &TransferSpec,
    ) -> Result<usize, ClusterError> {
        let table = spec.table_name.as_str();
        let moved = spec.moved();
        let dump = self
            .engine
            .dump_table(table)?
            .ok_or_else(|| ClusterError::TableNotFound(table.to_string()))?;
        let pk = self
            .engine
            .primary_key(table)?
            .ok_or_else(|| ClusterError::MissingKey(table.to_string()))?;
        let pk_index = dump
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(&pk))
            .ok_or_else(|| ClusterError::MissingKey(table.to_string()))?;

        // schema first; the target registers the moved half as its range
        let create = SqlRequest::new(dump.create_sql.clone(), table).with_range(moved);
        match self.peers.write(target_addr, WriteKind::Create, &create).await {
            Ok(_) => info!("Created {} on shard {}", table, target_shard),
            Err(e) if e.status() == Some(StatusCode::TableExists) => {
                info!("Shard {} already has {}", target_shard, table)
            }
            Err(e) => return Err(e.into_cluster_error(target_addr)),
        }

        let space = self.membership.hash_space();
        let rows: Vec<_> = dump
            .rows
            .iter()
            .filter(|row| moved.contains(hash_key(&row[pk_index].to_string(), space)))
            .collect();

        if !rows.is_empty() {
            let batch = SqlBatchRequest {
                sql_list: rows
                    .iter()
                    .map(|row| insert_statement(table, &dump.columns, row))
                    .collect(),
                table_name: table.to_string(),
                checksum: None,
            };
            self.peers
                .write_batch(target_addr, &batch)
                .await
                .map_err(|e| e.into_cluster_error(target_addr))?;

            let keys: Vec<String> = rows.iter().map(|row| row[pk_index].to_sql_literal()).collect();
            for chunk in keys.chunks(DELETE_CHUNK) {
                let delete = format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    quote_ident(table),
                    quote_ident(&pk),
                    chunk.join(", ")
                );
                self.replicator
                    .apply(WriteKind::Update, &SqlRequest::new(delete, table))
                    .await?;
            }
        } else {
            info!("No rows of {} hash into {}", table, moved);
        }

        self.membership
            .set_table_range(source_shard, table, spec.kept())
            .await?;
        self.membership
            .set_table_range(target_shard, table, moved)
            .await?;
        info!(
            "Moved {} rows of {}: shard {} keeps {}, shard {} owns {}",
            rows.len(),
            table,
            source_shard,
            spec.kept(),
            target_shard,
            moved
        );
        Ok(rows.len())
    }
}
