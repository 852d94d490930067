//! PostgreSQL billing store

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tasklane_shared::{MemberRole, SubscriptionStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{BillingStore, OrganizationBilling, SubscriptionActivation};
use crate::error::{BillingError, BillingResult};
use crate::ledger::{FailureReason, LedgerEntry, PaymentRecord, PaymentStatus};

/// Columns selected for every ledger read
const PAYMENT_COLUMNS: &str = r#"
    id, org_id, user_id, amount_minor_units, currency,
    external_payment_id, external_order_id, status, plan_id,
    failure_reason, metadata, created_at, updated_at
"#;

/// Row type for ledger reads
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    org_id: Uuid,
    user_id: Uuid,
    amount_minor_units: i64,
    currency: String,
    external_payment_id: Option<String>,
    external_order_id: Option<String>,
    status: String,
    plan_id: String,
    failure_reason: Option<String>,
    metadata: Value,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = BillingError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let failure_reason = row
            .failure_reason
            .as_deref()
            .map(str::parse::<FailureReason>)
            .transpose()?;

        Ok(PaymentRecord {
            id: row.id,
            org_id: row.org_id,
            user_id: row.user_id,
            amount_minor_units: row.amount_minor_units,
            currency: row.currency,
            external_payment_id: row.external_payment_id,
            external_order_id: row.external_order_id,
            status: row.status.parse::<PaymentStatus>()?,
            plan_id: row.plan_id,
            failure_reason,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for the organization billing view
#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    current_plan_id: String,
    subscription_status: String,
    billing_customer_ref: Option<String>,
    subscription_ref: Option<String>,
    trial_ends_at: Option<OffsetDateTime>,
}

impl TryFrom<OrganizationRow> for OrganizationBilling {
    type Error = BillingError;

    fn try_from(row: OrganizationRow) -> Result<Self, Self::Error> {
        let subscription_status = row
            .subscription_status
            .parse::<SubscriptionStatus>()
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        Ok(OrganizationBilling {
            id: row.id,
            current_plan_id: row.current_plan_id,
            subscription_status,
            billing_customer_ref: row.billing_customer_ref,
            subscription_ref: row.subscription_ref,
            trial_ends_at: row.trial_ends_at,
        })
    }
}

/// Billing store backed by the shared PostgreSQL pool
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn get_member_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> BillingResult<Option<MemberRole>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM organization_members WHERE org_id = $1 AND user_id = $2",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match role {
            Some(role) => match role.parse::<MemberRole>() {
                Ok(role) => Ok(Some(role)),
                Err(e) => {
                    // An unknown role grants nothing
                    tracing::warn!(org_id = %org_id, user_id = %user_id, error = %e, "Unrecognized membership role");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<OrganizationBilling>> {
        let row: Option<OrganizationRow> = sqlx::query_as(
            r#"
            SELECT id, current_plan_id, subscription_status,
                   billing_customer_ref, subscription_ref, trial_ends_at
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrganizationBilling::try_from).transpose()
    }

    async fn activate_subscription(
        &self,
        org_id: Uuid,
        activation: &SubscriptionActivation,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE organizations SET
                current_plan_id = $2,
                subscription_status = 'active',
                billing_customer_ref = $3,
                subscription_ref = $4,
                trial_ends_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .bind(&activation.plan_id)
        .bind(&activation.billing_customer_ref)
        .bind(&activation.subscription_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!(
                "Organization {} not found",
                org_id
            )));
        }
        Ok(())
    }

    async fn cancel_subscription(&self, org_id: Uuid) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE organizations SET
                current_plan_id = 'free',
                subscription_status = 'cancelled',
                subscription_ref = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!(
                "Organization {} not found",
                org_id
            )));
        }
        Ok(())
    }

    async fn find_payment(
        &self,
        org_id: Uuid,
        external_payment_id: &str,
    ) -> BillingResult<Option<PaymentRecord>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE org_id = $1 AND external_payment_id = $2",
            PAYMENT_COLUMNS
        ))
        .bind(org_id)
        .bind(external_payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn get_payment(
        &self,
        org_id: Uuid,
        record_id: Uuid,
    ) -> BillingResult<Option<PaymentRecord>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE org_id = $1 AND id = $2",
            PAYMENT_COLUMNS
        ))
        .bind(org_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn upsert_payment(&self, entry: &LedgerEntry) -> BillingResult<PaymentRecord> {
        let external_payment_id = entry.external_payment_id.as_deref().ok_or_else(|| {
            BillingError::Internal("upsert_payment requires an external payment id".to_string())
        })?;

        // Single statement: the unique index on (org_id, external_payment_id)
        // arbitrates concurrent writers. A success row is left untouched unless
        // the incoming write is itself a success, and a processing row only
        // moves to processing or success.
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO payments (
                org_id, user_id, amount_minor_units, currency,
                external_payment_id, external_order_id, status, plan_id,
                failure_reason, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (org_id, external_payment_id) DO UPDATE SET
                status = EXCLUDED.status,
                failure_reason = EXCLUDED.failure_reason,
                amount_minor_units = EXCLUDED.amount_minor_units,
                currency = EXCLUDED.currency,
                plan_id = EXCLUDED.plan_id,
                external_order_id = COALESCE(EXCLUDED.external_order_id, payments.external_order_id),
                metadata = payments.metadata || EXCLUDED.metadata,
                updated_at = NOW()
            WHERE EXCLUDED.status = 'success'
               OR payments.status NOT IN ('success', 'processing')
               OR (payments.status = 'processing' AND EXCLUDED.status = 'processing')
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(entry.org_id)
        .bind(entry.user_id)
        .bind(entry.amount_minor_units)
        .bind(&entry.currency)
        .bind(external_payment_id)
        .bind(&entry.external_order_id)
        .bind(entry.status.as_str())
        .bind(&entry.plan_id)
        .bind(entry.failure_reason.map(|r| r.as_str()))
        .bind(&entry.metadata)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => PaymentRecord::try_from(row),
            None => {
                // The conflict guard kept an existing success or processing row
                tracing::info!(
                    org_id = %entry.org_id,
                    external_payment_id = %external_payment_id,
                    attempted_status = %entry.status,
                    "Ledger row is settled or awaiting reconciliation, keeping it"
                );
                self.find_payment(entry.org_id, external_payment_id)
                    .await?
                    .ok_or_else(|| {
                        BillingError::Internal(format!(
                            "Ledger row for {} vanished during upsert",
                            external_payment_id
                        ))
                    })
            }
        }
    }

    async fn claim_payment(&self, entry: &LedgerEntry) -> BillingResult<Option<PaymentRecord>> {
        let external_payment_id = entry.external_payment_id.as_deref().ok_or_else(|| {
            BillingError::Internal("claim_payment requires an external payment id".to_string())
        })?;

        // The conflict arm locks the existing row and re-checks the WHERE clause
        // against its latest version, so only one caller gets a row back.
        // A failed org write is claimable again; an in-flight claim is not.
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO payments (
                org_id, user_id, amount_minor_units, currency,
                external_payment_id, external_order_id, status, plan_id,
                failure_reason, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'processing', $7, NULL, $8)
            ON CONFLICT (org_id, external_payment_id) DO UPDATE SET
                status = 'processing',
                failure_reason = NULL,
                amount_minor_units = EXCLUDED.amount_minor_units,
                currency = EXCLUDED.currency,
                plan_id = EXCLUDED.plan_id,
                external_order_id = COALESCE(EXCLUDED.external_order_id, payments.external_order_id),
                metadata = payments.metadata || EXCLUDED.metadata,
                updated_at = NOW()
            WHERE payments.status IN ('failed', 'pending')
               OR (payments.status = 'processing' AND payments.failure_reason = 'org_write_failed')
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(entry.org_id)
        .bind(entry.user_id)
        .bind(entry.amount_minor_units)
        .bind(&entry.currency)
        .bind(external_payment_id)
        .bind(&entry.external_order_id)
        .bind(&entry.plan_id)
        .bind(&entry.metadata)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn append_payment(&self, entry: &LedgerEntry) -> BillingResult<PaymentRecord> {
        let row: PaymentRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO payments (
                org_id, user_id, amount_minor_units, currency,
                external_payment_id, external_order_id, status, plan_id,
                failure_reason, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(entry.org_id)
        .bind(entry.user_id)
        .bind(entry.amount_minor_units)
        .bind(&entry.currency)
        .bind(&entry.external_payment_id)
        .bind(&entry.external_order_id)
        .bind(entry.status.as_str())
        .bind(&entry.plan_id)
        .bind(entry.failure_reason.map(|r| r.as_str()))
        .bind(&entry.metadata)
        .fetch_one(&self.pool)
        .await?;

        PaymentRecord::try_from(row)
    }

    async fn list_payments(&self, org_id: Uuid) -> BillingResult<Vec<PaymentRecord>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE org_id = $1 ORDER BY created_at DESC, id DESC",
            PAYMENT_COLUMNS
        ))
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PaymentRecord::try_from).collect()
    }
}
