//! 积分重算
//!
//! 管理员在调整步骤积分或组织倍率后触发，按当前 base_points × 当前倍率
//! 重新计算组织内所有步骤完成的账本条目。按 id 游标分批处理，
//! 每批在独立事务中提交，中断后可从上次的游标继续。

use std::collections::HashMap;

use tracing::{info, instrument, warn};
use unlock_shared::config::ProgressionConfig;
use unlock_shared::observability::metrics;

use crate::error::Result;
use crate::models::{LedgerEntry, LedgerUpdate, OrgSettings, Step};
use crate::repository::Stores;
use crate::service::dto::{BatchOutcome, RecalculationReport};
use crate::service::ledger::ProgressionLedger;
use crate::service::snapshot::SnapshotBuilder;

/// 报告中保留的错误样例数量
const MAX_SAMPLE_ERRORS: usize = 10;

const MULTIPLIER_EPSILON: f64 = 1e-9;

pub struct RecalculationService {
    stores: Stores,
    snapshots: SnapshotBuilder,
    batch_size: i64,
}

impl RecalculationService {
    pub fn new(stores: Stores, config: &ProgressionConfig) -> Self {
        Self {
            snapshots: SnapshotBuilder::new(stores.clone(), config.clone()),
            stores,
            batch_size: config.recalculation_batch_size.max(1),
        }
    }

    /// 重算整个组织
    #[instrument(skip(self))]
    pub async fn recalculate_points(&self, org_id: &str) -> Result<RecalculationReport> {
        let mut report = RecalculationReport {
            org_id: org_id.to_string(),
            ..Default::default()
        };
        let mut cursor = 0;

        loop {
            let batch = self.recalculate_batch(org_id, cursor).await?;
            report.batches += 1;
            report.scanned += batch.scanned;
            report.updated += batch.updated;
            report.unchanged += batch.unchanged;
            report.failed += batch.failed;
            let room = MAX_SAMPLE_ERRORS.saturating_sub(report.sample_errors.len());
            report.sample_errors.extend(batch.errors.into_iter().take(room));

            match batch.next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }

        report.message = format!(
            "积分重算完成: 扫描 {} 条, 更新 {} 条, 失败 {} 条",
            report.scanned, report.updated, report.failed
        );
        info!(
            org_id = %org_id,
            batches = report.batches,
            scanned = report.scanned,
            updated = report.updated,
            failed = report.failed,
            "积分重算完成"
        );

        Ok(report)
    }

    /// 处理游标之后的一批条目
    ///
    /// 单条失败（步骤已删除等）只记录错误，不中断本批。
    #[instrument(skip(self))]
    pub async fn recalculate_batch(&self, org_id: &str, cursor: i64) -> Result<BatchOutcome> {
        let entries = self
            .stores
            .ledger
            .list_step_entries_after(org_id, cursor, self.batch_size)
            .await?;
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let (steps, settings) = futures::try_join!(
            self.stores.catalog.list_org_steps(org_id),
            self.snapshots.org_settings(org_id),
        )?;
        let steps: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut outcome = BatchOutcome {
            scanned: entries.len() as u64,
            ..Default::default()
        };
        let mut updates = Vec::new();

        for entry in &entries {
            match Self::recompute(entry, &steps, &settings) {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => outcome.unchanged += 1,
                Err(reason) => {
                    warn!(entry_id = entry.id, reason = %reason, "账本条目重算失败");
                    outcome.failed += 1;
                    outcome.errors.push(reason);
                }
            }
        }

        if !updates.is_empty() {
            outcome.updated = self.stores.ledger.apply_recalculation(&updates).await?;
        }

        metrics::record_recalculation_rows("updated", outcome.updated);
        metrics::record_recalculation_rows("unchanged", outcome.unchanged);
        metrics::record_recalculation_rows("failed", outcome.failed);

        if entries.len() as i64 == self.batch_size {
            outcome.next_cursor = entries.last().map(|e| e.id);
        }

        Ok(outcome)
    }

    /// 返回 None 表示数值未变化
    fn recompute(
        entry: &LedgerEntry,
        steps: &HashMap<&str, &Step>,
        settings: &OrgSettings,
    ) -> std::result::Result<Option<LedgerUpdate>, String> {
        let step = steps.get(entry.source_ref.as_str()).ok_or_else(|| {
            format!("条目 {}: 步骤 {} 不存在", entry.id, entry.source_ref)
        })?;

        let award = ProgressionLedger::step_award(step, settings);
        let unchanged = entry.base_points == award.base_points
            && (entry.multiplier - award.multiplier).abs() < MULTIPLIER_EPSILON
            && entry.points == award.points;

        Ok((!unchanged).then_some(LedgerUpdate {
            id: entry.id,
            base_points: award.base_points,
            multiplier: award.multiplier,
            points: award.points,
        }))
    }
}
