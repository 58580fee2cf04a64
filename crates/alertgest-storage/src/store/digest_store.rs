use alertgest_common::{DeliveryStatus, DigestRow, NewDigest, WindowStatus};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};

use crate::entities::capture_window::{Column as WinCol, Entity as WinEntity};
use crate::entities::digest::{self, Column as DigCol, Entity as DigEntity};
use crate::error::{Result, StorageError};
use crate::store::window_store::{cas_transition, record_attempt, AttemptOutcome};
use crate::store::{model_to_digest, new_id, now_fixed, Store};

/// Operator verdict on a digest whose delivery outcome is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The message did reach the channel.
    Sent { message_id: Option<String> },
    /// The message never arrived; the digest becomes eligible for retry.
    NotSent,
}

async fn insert_digest<C: ConnectionTrait>(
    conn: &C,
    window_id: &str,
    d: &NewDigest,
    status: DeliveryStatus,
    now: DateTimeWithTimeZone,
) -> Result<DigestRow> {
    let am = digest::ActiveModel {
        id: Set(new_id()),
        capture_window_id: Set(window_id.to_string()),
        generated_at: Set(now),
        llm_model: Set(d.llm_model.clone()),
        prompt_tokens: Set(d.prompt_tokens),
        completion_tokens: Set(d.completion_tokens),
        raw_prompt: Set(d.raw_prompt.clone()),
        raw_response: Set(d.raw_response.clone()),
        formatted_output: Set(d.formatted_output.clone()),
        teams_message_id: Set(None),
        delivery_status: Set(status.as_str().to_string()),
        error_message: Set(d.error_message.clone()),
        updated_at: Set(now),
    };
    model_to_digest(am.insert(conn).await?)
}

/// Sets a digest's delivery status, but only if it is currently `from`.
async fn cas_delivery<C: ConnectionTrait>(
    conn: &C,
    digest_id: &str,
    from: DeliveryStatus,
    to: DeliveryStatus,
    message_id: Option<String>,
    error: Option<String>,
    now: DateTimeWithTimeZone,
) -> Result<()> {
    let mut update = DigEntity::update_many()
        .col_expr(DigCol::DeliveryStatus, Expr::value(to.as_str()))
        .col_expr(DigCol::ErrorMessage, Expr::value(error))
        .col_expr(DigCol::UpdatedAt, Expr::value(now));
    // 没有消息 id 时保留原值
    if message_id.is_some() {
        update = update.col_expr(DigCol::TeamsMessageId, Expr::value(message_id));
    }
    let res = update
        .filter(DigCol::Id.eq(digest_id))
        .filter(DigCol::DeliveryStatus.eq(from.as_str()))
        .exec(conn)
        .await?;
    if res.rows_affected == 1 {
        return Ok(());
    }
    // 状态不符：读取当前状态用于错误信息
    let current = DigEntity::find_by_id(digest_id)
        .one(conn)
        .await?
        .ok_or_else(|| StorageError::NotFound {
            entity: "digest",
            id: digest_id.to_string(),
        })?;
    Err(StorageError::InvalidState {
        entity: "digest",
        id: digest_id.to_string(),
        status: current.delivery_status,
        expected: from.as_str(),
    })
}

async fn mark_window_delivered<C: ConnectionTrait>(
    conn: &C,
    window_id: &str,
    now: DateTimeWithTimeZone,
) -> Result<bool> {
    cas_transition(
        conn,
        window_id,
        WindowStatus::Delivered,
        now,
        WinEntity::update_many().col_expr(WinCol::DigestSentAt, Expr::value(now)),
    )
    .await
}

impl Store {
    /// Stores a successful generation: inserts a `pending` digest and moves
    /// the window `closed → digested` in one transaction. Returns `None`
    /// (and writes nothing) if the window was no longer `closed`.
    pub async fn complete_generation(
        &self,
        window_id: &str,
        digest: &NewDigest,
    ) -> Result<Option<DigestRow>> {
        let now = now_fixed();
        let txn = self.db().begin().await?;
        let moved = cas_transition(
            &txn,
            window_id,
            WindowStatus::Digested,
            now,
            WinEntity::update_many().col_expr(WinCol::DigestGeneratedAt, Expr::value(now)),
        )
        .await?;
        if !moved {
            txn.rollback().await?;
            return Ok(None);
        }
        // 窗口状态已切换，插入待投递摘要
        let row = insert_digest(&txn, window_id, digest, DeliveryStatus::Pending, now).await?;
        txn.commit().await?;
        Ok(Some(row))
    }

    /// Stores a failed generation attempt: the digest row keeps whatever was
    /// produced (prompt, partial response, error) with no formatted output,
    /// and the window's attempt counter grows. Reaching `max_attempts` fails
    /// the window.
    pub async fn record_generation_failure(
        &self,
        window_id: &str,
        digest: &NewDigest,
        max_attempts: i32,
    ) -> Result<(DigestRow, AttemptOutcome)> {
        let now = now_fixed();
        let txn = self.db().begin().await?;
        let outcome = record_attempt(
            &txn,
            window_id,
            WinCol::GenerationAttempts,
            WindowStatus::Closed,
            Some(max_attempts),
            now,
        )
        .await?;
        // 失败的生成不保留格式化输出，避免被当作可投递摘要
        let failed = NewDigest {
            formatted_output: None,
            ..digest.clone()
        };
        let row = insert_digest(&txn, window_id, &failed, DeliveryStatus::Failed, now).await?;
        txn.commit().await?;
        Ok((row, outcome))
    }

    pub async fn get_digest(&self, id: &str) -> Result<Option<DigestRow>> {
        DigEntity::find_by_id(id)
            .one(self.db())
            .await?
            .map(model_to_digest)
            .transpose()
    }

    pub async fn require_digest(&self, id: &str) -> Result<DigestRow> {
        self.get_digest(id).await?.ok_or_else(|| StorageError::NotFound {
            entity: "digest",
            id: id.to_string(),
        })
    }

    /// 窗口的全部摘要记录，按生成时间升序。
    pub async fn list_digests_for_window(&self, window_id: &str) -> Result<Vec<DigestRow>> {
        DigEntity::find()
            .filter(DigCol::CaptureWindowId.eq(window_id))
            .order_by(DigCol::GeneratedAt, Order::Asc)
            .all(self.db())
            .await?
            .into_iter()
            .map(model_to_digest)
            .collect()
    }

    /// 窗口最新一条带格式化输出、可投递的摘要。
    pub async fn deliverable_digest(&self, window_id: &str) -> Result<Option<DigestRow>> {
        DigEntity::find()
            .filter(DigCol::CaptureWindowId.eq(window_id))
            .filter(DigCol::FormattedOutput.is_not_null())
            .order_by(DigCol::GeneratedAt, Order::Desc)
            .one(self.db())
            .await?
            .map(model_to_digest)
            .transpose()
    }

    /// 将 `failed` 摘要重新置为 `pending`，等待下一次投递。
    pub async fn requeue_digest(&self, digest_id: &str) -> Result<()> {
        cas_delivery(
            self.db(),
            digest_id,
            DeliveryStatus::Failed,
            DeliveryStatus::Pending,
            None,
            None,
            now_fixed(),
        )
        .await
    }

    /// Records a confirmed send. The digest must be `pending`. Returns whether
    /// the window moved `digested → delivered`.
    pub async fn record_delivery_success(
        &self,
        digest_id: &str,
        window_id: &str,
        message_id: Option<String>,
    ) -> Result<bool> {
        let now = now_fixed();
        let txn = self.db().begin().await?;
        cas_delivery(
            &txn,
            digest_id,
            DeliveryStatus::Pending,
            DeliveryStatus::Sent,
            message_id,
            None,
            now,
        )
        .await?;
        let delivered = mark_window_delivered(&txn, window_id, now).await?;
        txn.commit().await?;
        Ok(delivered)
    }

    /// Records a definite delivery failure and counts the attempt.
    pub async fn record_delivery_failure(
        &self,
        digest_id: &str,
        window_id: &str,
        error: &str,
        max_attempts: i32,
    ) -> Result<AttemptOutcome> {
        self.record_unsuccessful_delivery(
            digest_id,
            window_id,
            DeliveryStatus::Failed,
            error,
            Some(max_attempts),
        )
        .await
    }

    /// Records an attempt whose outcome is unknown. It counts as an attempt
    /// but never fails the window: the digest waits for
    /// [`Store::reconcile_digest`], and the cap is applied only after an
    /// operator says it was not sent.
    pub async fn record_delivery_unknown(
        &self,
        digest_id: &str,
        window_id: &str,
        error: &str,
    ) -> Result<AttemptOutcome> {
        self.record_unsuccessful_delivery(
            digest_id,
            window_id,
            DeliveryStatus::Unknown,
            error,
            None,
        )
        .await
    }

    async fn record_unsuccessful_delivery(
        &self,
        digest_id: &str,
        window_id: &str,
        status: DeliveryStatus,
        error: &str,
        max_attempts: Option<i32>,
    ) -> Result<AttemptOutcome> {
        let now = now_fixed();
        let txn = self.db().begin().await?;
        cas_delivery(
            &txn,
            digest_id,
            DeliveryStatus::Pending,
            status,
            None,
            Some(error.to_string()),
            now,
        )
        .await?;
        let outcome = record_attempt(
            &txn,
            window_id,
            WinCol::DeliveryAttempts,
            WindowStatus::Digested,
            max_attempts,
            now,
        )
        .await?;
        txn.commit().await?;
        Ok(outcome)
    }

    /// 投递结果未知、等待人工核对的摘要，最早的在前。
    pub async fn list_unreconciled(&self, limit: usize, offset: usize) -> Result<Vec<DigestRow>> {
        DigEntity::find()
            .filter(DigCol::DeliveryStatus.eq(DeliveryStatus::Unknown.as_str()))
            .order_by(DigCol::UpdatedAt, Order::Asc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?
            .into_iter()
            .map(model_to_digest)
            .collect()
    }

    pub async fn count_unreconciled(&self) -> Result<u64> {
        Ok(DigEntity::find()
            .filter(DigCol::DeliveryStatus.eq(DeliveryStatus::Unknown.as_str()))
            .count(self.db())
            .await?)
    }

    /// Resolves an `unknown` digest. `Sent` also completes the window when it
    /// is still `digested`; `NotSent` makes the digest retryable.
    pub async fn reconcile_digest(
        &self,
        digest_id: &str,
        verdict: Reconciliation,
    ) -> Result<DigestRow> {
        let now = now_fixed();
        let txn = self.db().begin().await?;
        // 查找摘要所属窗口
        let window_id = DigEntity::find_by_id(digest_id)
            .one(&txn)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "digest",
                id: digest_id.to_string(),
            })?
            .capture_window_id;

        match verdict {
            Reconciliation::Sent { message_id } => {
                cas_delivery(
                    &txn,
                    digest_id,
                    DeliveryStatus::Unknown,
                    DeliveryStatus::Sent,
                    message_id,
                    None,
                    now,
                )
                .await?;
                // 窗口必须仍处于 digested，否则整体回滚，不留下半生效的核对结果
                if !mark_window_delivered(&txn, &window_id, now).await? {
                    let status = WinEntity::find_by_id(window_id.as_str())
                        .one(&txn)
                        .await?
                        .map(|w| w.status)
                        .unwrap_or_else(|| "missing".to_string());
                    txn.rollback().await?;
                    return Err(StorageError::InvalidState {
                        entity: "capture_window",
                        id: window_id,
                        status,
                        expected: WindowStatus::Digested.as_str(),
                    });
                }
            }
            Reconciliation::NotSent => {
                // 标记为 failed，下一轮调度会重新入队
                cas_delivery(
                    &txn,
                    digest_id,
                    DeliveryStatus::Unknown,
                    DeliveryStatus::Failed,
                    None,
                    Some("reconciled by operator: not sent".to_string()),
                    now,
                )
                .await?;
            }
        }
        txn.commit().await?;
        self.require_digest(digest_id).await
    }
}
