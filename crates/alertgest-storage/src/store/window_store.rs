use alertgest_common::{CaptureWindowRow, WindowStatus};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait, UpdateMany,
};

use crate::entities::alert::{Column as AlertCol, Entity as AlertEntity};
use crate::entities::capture_window::{self, Column as WinCol, Entity as WinEntity};
use crate::entities::digest::{Column as DigCol, Entity as DigEntity};
use crate::error::{Result, StorageError};
use crate::store::{model_to_window, new_id, now_fixed, Store};

/// Result of recording one failed generation or delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// Attempts recorded so far, including this one.
    pub attempts: i32,
    /// Whether this attempt exhausted the cap and moved the window to `failed`.
    pub window_failed: bool,
}

/// Moves window `id` to `next` only if its stored status is a legal
/// predecessor of `next`. `update` may carry extra column assignments.
pub(crate) async fn cas_transition<C: ConnectionTrait>(
    conn: &C,
    id: &str,
    next: WindowStatus,
    now: DateTimeWithTimeZone,
    update: UpdateMany<WinEntity>,
) -> Result<bool> {
    let from: Vec<&'static str> = WindowStatus::predecessors(next)
        .iter()
        .map(WindowStatus::as_str)
        .collect();
    // 状态条件写进 WHERE，并发修改时只有一方生效
    let res = update
        .col_expr(WinCol::Status, Expr::value(next.as_str()))
        .col_expr(WinCol::UpdatedAt, Expr::value(now))
        .filter(WinCol::Id.eq(id))
        .filter(WinCol::Status.is_in(from))
        .exec(conn)
        .await?;
    Ok(res.rows_affected == 1)
}

/// Increments an attempt counter on a window that must currently be in
/// `expected`; fails the window once the counter reaches `max_attempts`.
/// With `None` the attempt is counted but the window never fails here.
pub(crate) async fn record_attempt<C: ConnectionTrait>(
    conn: &C,
    id: &str,
    counter: WinCol,
    expected: WindowStatus,
    max_attempts: Option<i32>,
    now: DateTimeWithTimeZone,
) -> Result<AttemptOutcome> {
    let res = WinEntity::update_many()
        .col_expr(counter, Expr::col(counter).add(1))
        .col_expr(WinCol::UpdatedAt, Expr::value(now))
        .filter(WinCol::Id.eq(id))
        .filter(WinCol::Status.eq(expected.as_str()))
        .exec(conn)
        .await?;

    // 读回计数；未更新时用当前状态构造错误
    let window = WinEntity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| StorageError::NotFound {
            entity: "capture_window",
            id: id.to_string(),
        })?;
    if res.rows_affected == 0 {
        return Err(StorageError::InvalidState {
            entity: "capture_window",
            id: id.to_string(),
            status: window.status,
            expected: expected.as_str(),
        });
    }

    let attempts = match counter {
        WinCol::GenerationAttempts => window.generation_attempts,
        _ => window.delivery_attempts,
    };
    let window_failed = max_attempts.is_some_and(|max| attempts >= max)
        && cas_transition(conn, id, WindowStatus::Failed, now, WinEntity::update_many()).await?;
    Ok(AttemptOutcome {
        attempts,
        window_failed,
    })
}

impl Store {
    pub async fn get_window(&self, id: &str) -> Result<Option<CaptureWindowRow>> {
        WinEntity::find_by_id(id)
            .one(self.db())
            .await?
            .map(model_to_window)
            .transpose()
    }

    pub async fn require_window(&self, id: &str) -> Result<CaptureWindowRow> {
        self.get_window(id).await?.ok_or_else(|| StorageError::NotFound {
            entity: "capture_window",
            id: id.to_string(),
        })
    }

    /// 半开区间 `[start, end)` 包含 `ts` 的已存窗口。
    pub async fn find_window_containing(
        &self,
        ts: DateTime<Utc>,
    ) -> Result<Option<CaptureWindowRow>> {
        let ts = ts.fixed_offset();
        WinEntity::find()
            .filter(WinCol::WindowStart.lte(ts))
            .filter(WinCol::WindowEnd.gt(ts))
            .order_by(WinCol::WindowStart, Order::Desc)
            .one(self.db())
            .await?
            .map(model_to_window)
            .transpose()
    }

    /// 与 `[start, end)` 有交集的已存窗口。
    pub async fn find_windows_overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CaptureWindowRow>> {
        WinEntity::find()
            .filter(WinCol::WindowStart.lt(end.fixed_offset()))
            .filter(WinCol::WindowEnd.gt(start.fixed_offset()))
            .order_by(WinCol::WindowStart, Order::Asc)
            .all(self.db())
            .await?
            .into_iter()
            .map(model_to_window)
            .collect()
    }

    /// Inserts a new `active` window. A concurrent insert for the same
    /// `window_start` surfaces as [`StorageError::Conflict`].
    pub async fn insert_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CaptureWindowRow> {
        let now = now_fixed();
        let am = capture_window::ActiveModel {
            id: Set(new_id()),
            window_start: Set(start.fixed_offset()),
            window_end: Set(end.fixed_offset()),
            status: Set(WindowStatus::Active.as_str().to_string()),
            alert_count: Set(0),
            generation_attempts: Set(0),
            delivery_attempts: Set(0),
            digest_generated_at: Set(None),
            digest_sent_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        // window_start 唯一索引冲突转换为 Conflict，由调用方重新查找
        match am.insert(self.db()).await {
            Ok(m) => model_to_window(m),
            Err(err) => Err(match StorageError::from(err) {
                StorageError::Conflict { detail, .. } => StorageError::Conflict {
                    entity: "capture_window",
                    detail,
                },
                other => other,
            }),
        }
    }

    pub async fn list_windows(
        &self,
        status: Option<WindowStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CaptureWindowRow>> {
        let mut q = WinEntity::find();
        if let Some(s) = status {
            q = q.filter(WinCol::Status.eq(s.as_str()));
        }
        q.order_by(WinCol::WindowStart, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?
            .into_iter()
            .map(model_to_window)
            .collect()
    }

    pub async fn count_windows(&self, status: Option<WindowStatus>) -> Result<u64> {
        let mut q = WinEntity::find();
        if let Some(s) = status {
            q = q.filter(WinCol::Status.eq(s.as_str()));
        }
        Ok(q.count(self.db()).await?)
    }

    /// 当前处于 `status` 的全部窗口，最早的在前。
    pub async fn windows_with_status(&self, status: WindowStatus) -> Result<Vec<CaptureWindowRow>> {
        WinEntity::find()
            .filter(WinCol::Status.eq(status.as_str()))
            .order_by(WinCol::WindowStart, Order::Asc)
            .all(self.db())
            .await?
            .into_iter()
            .map(model_to_window)
            .collect()
    }

    /// Moves every `active` window with `window_end <= now` to `closed` and
    /// returns the ones this call moved. Windows closed concurrently by
    /// another caller are not returned.
    pub async fn close_windows_due(&self, now: DateTime<Utc>) -> Result<Vec<CaptureWindowRow>> {
        let due = WinEntity::find()
            .filter(WinCol::Status.eq(WindowStatus::Active.as_str()))
            .filter(WinCol::WindowEnd.lte(now.fixed_offset()))
            .order_by(WinCol::WindowStart, Order::Asc)
            .all(self.db())
            .await?;

        let mut closed = Vec::with_capacity(due.len());
        for m in due {
            let moved = cas_transition(
                self.db(),
                &m.id,
                WindowStatus::Closed,
                now_fixed(),
                WinEntity::update_many(),
            )
            .await?;
            // 已被其他调用方关闭的窗口不重复返回
            if moved {
                closed.push(self.require_window(&m.id).await?);
            }
        }
        Ok(closed)
    }

    /// Compare-and-set status change. Returns `false` when the stored status
    /// is not a legal predecessor of `next` (or the window is gone).
    pub async fn transition_window(&self, id: &str, next: WindowStatus) -> Result<bool> {
        cas_transition(self.db(), id, next, now_fixed(), WinEntity::update_many()).await
    }

    /// Deletes a window with its digests. Its alerts are kept and lose their
    /// association.
    pub async fn delete_window(&self, id: &str) -> Result<bool> {
        let txn = self.db().begin().await?;
        // 先删摘要，再解除告警关联，最后删除窗口
        DigEntity::delete_many()
            .filter(DigCol::CaptureWindowId.eq(id))
            .exec(&txn)
            .await?;
        AlertEntity::update_many()
            .col_expr(AlertCol::CaptureWindowId, Expr::value(Option::<String>::None))
            .filter(AlertCol::CaptureWindowId.eq(id))
            .exec(&txn)
            .await?;
        let res = WinEntity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(res.rows_affected > 0)
    }
}
