//! Membership checks for billing operations

use tasklane_shared::MemberRole;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::BillingStore;

/// Billing mutations are reserved to organization owners
pub(crate) async fn require_owner(
    store: &dyn BillingStore,
    org_id: Uuid,
    user_id: Uuid,
    action: &str,
) -> BillingResult<()> {
    match store.get_member_role(org_id, user_id).await? {
        Some(role) if role.can_manage_billing() => Ok(()),
        Some(role) => {
            tracing::warn!(
                org_id = %org_id,
                user_id = %user_id,
                role = %role,
                action = %action,
                "Billing action rejected: owner role required"
            );
            Err(BillingError::Unauthorized(format!(
                "Only organization owners can {}",
                action
            )))
        }
        None => {
            tracing::warn!(org_id = %org_id, user_id = %user_id, action = %action, "Billing action rejected: not a member");
            Err(BillingError::Unauthorized(
                "Not a member of this organization".to_string(),
            ))
        }
    }
}

/// Any role may read billing state
pub(crate) async fn require_member(
    store: &dyn BillingStore,
    org_id: Uuid,
    user_id: Uuid,
) -> BillingResult<MemberRole> {
    store
        .get_member_role(org_id, user_id)
        .await?
        .ok_or_else(|| BillingError::Unauthorized("Not a member of this organization".to_string()))
}
