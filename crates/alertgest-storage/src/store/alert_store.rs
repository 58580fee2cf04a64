use alertgest_common::{AlertRecord, NewAlert, WindowStatus};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};

use crate::entities::alert::{self, Column as AlertCol, Entity as AlertEntity};
use crate::entities::capture_window::{Column as WinCol, Entity as WinEntity};
use crate::error::{Result, StorageError};
use crate::store::{model_to_alert, new_id, Store};

impl Store {
    /// Persists a batch of alerts atomically.
    ///
    /// With a window id, the window must still be `active`: its
    /// `alert_count` grows by the batch size in the same transaction, and
    /// the whole batch is rolled back with [`StorageError::InvalidState`]
    /// if the window has moved on.
    pub async fn insert_alerts(
        &self,
        alerts: &[NewAlert],
        window_id: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<AlertRecord>> {
        let received = received_at.fixed_offset();
        let txn = self.db().begin().await?;

        if let Some(id) = window_id {
            // 先累加 alert_count，窗口已不是 active 时整批回滚
            let res = WinEntity::update_many()
                .col_expr(
                    WinCol::AlertCount,
                    Expr::col(WinCol::AlertCount).add(alerts.len() as i64),
                )
                .col_expr(WinCol::UpdatedAt, Expr::value(received))
                .filter(WinCol::Id.eq(id))
                .filter(WinCol::Status.eq(WindowStatus::Active.as_str()))
                .exec(&txn)
                .await?;
            if res.rows_affected == 0 {
                txn.rollback().await?;
                let status = self
                    .get_window(id)
                    .await?
                    .map(|w| w.status.to_string())
                    .unwrap_or_else(|| "missing".to_string());
                return Err(StorageError::InvalidState {
                    entity: "capture_window",
                    id: id.to_string(),
                    status,
                    expected: WindowStatus::Active.as_str(),
                });
            }
        }

        // 逐条插入告警
        let mut stored = Vec::with_capacity(alerts.len());
        for a in alerts {
            let am = alert::ActiveModel {
                id: Set(new_id()),
                fingerprint: Set(a.fingerprint.clone()),
                alertname: Set(a.alertname.clone()),
                status: Set(a.status.as_str().to_string()),
                severity: Set(a.severity.clone()),
                namespace: Set(a.namespace.clone()),
                labels: Set(serde_json::to_string(&a.labels)?),
                annotations: Set(serde_json::to_string(&a.annotations)?),
                starts_at: Set(a.starts_at.fixed_offset()),
                ends_at: Set(a.ends_at.map(|ts| ts.fixed_offset())),
                received_at: Set(received),
                capture_window_id: Set(window_id.map(str::to_string)),
            };
            stored.push(model_to_alert(am.insert(&txn).await?)?);
        }

        txn.commit().await?;
        Ok(stored)
    }

    /// 按到达顺序返回窗口关联的全部告警。
    pub async fn alerts_for_window(&self, window_id: &str) -> Result<Vec<AlertRecord>> {
        AlertEntity::find()
            .filter(AlertCol::CaptureWindowId.eq(window_id))
            .order_by(AlertCol::ReceivedAt, Order::Asc)
            .order_by(AlertCol::Id, Order::Asc)
            .all(self.db())
            .await?
            .into_iter()
            .map(model_to_alert)
            .collect()
    }

    pub async fn list_alerts_for_window(
        &self,
        window_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRecord>> {
        AlertEntity::find()
            .filter(AlertCol::CaptureWindowId.eq(window_id))
            .order_by(AlertCol::ReceivedAt, Order::Asc)
            .order_by(AlertCol::Id, Order::Asc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?
            .into_iter()
            .map(model_to_alert)
            .collect()
    }

    pub async fn count_alerts_for_window(&self, window_id: &str) -> Result<u64> {
        Ok(AlertEntity::find()
            .filter(AlertCol::CaptureWindowId.eq(window_id))
            .count(self.db())
            .await?)
    }

    /// 未落入任何捕获窗口的告警数。
    pub async fn count_unassociated_alerts(&self) -> Result<u64> {
        Ok(AlertEntity::find()
            .filter(AlertCol::CaptureWindowId.is_null())
            .count(self.db())
            .await?)
    }

    /// Deletes alerts received before `cutoff` that are either unassociated
    /// or belong to a window in a terminal state. Returns the number removed.
    pub async fn cleanup_alerts(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        // 只清理未关联窗口或终态窗口下的告警
        let terminal: Vec<&'static str> = WindowStatus::ALL
            .into_iter()
            .filter(WindowStatus::is_terminal)
            .map(|s| s.as_str())
            .collect();
        let finished_windows = Query::select()
            .column(WinCol::Id)
            .from(WinEntity)
            .and_where(WinCol::Status.is_in(terminal))
            .to_owned();

        let res = AlertEntity::delete_many()
            .filter(AlertCol::ReceivedAt.lt(cutoff.fixed_offset()))
            .filter(
                Condition::any()
                    .add(AlertCol::CaptureWindowId.is_null())
                    .add(AlertCol::CaptureWindowId.in_subquery(finished_windows)),
            )
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
