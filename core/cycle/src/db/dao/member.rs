use diesel::prelude::*;

use tanda_persistence::{do_with_transaction, readonly_transaction, AsDao, ConnType, PoolType};

use crate::db::model::{Member, MemberStatus};
use crate::db::schema::group_member::dsl;
use crate::db::DbResult;

pub struct MemberDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for MemberDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> MemberDao<'c> {
    pub async fn get(&self, member_id: &str) -> DbResult<Option<Member>> {
        let member_id = member_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::group_member
                .filter(dsl::id.eq(&member_id))
                .first::<Member>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn list(&self, group_id: &str) -> DbResult<Vec<Member>> {
        let group_id = group_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::group_member
                .filter(dsl::group_id.eq(&group_id))
                .order_by(dsl::payout_order.asc())
                .load::<Member>(conn)?)
        })
        .await
    }

    /// Membership CRUD is owned by an external service; inserts exist for
    /// fixtures and operator tooling.
    pub async fn create(&self, member: Member) -> DbResult<()> {
        do_with_transaction(self.pool, move |conn| {
            diesel::insert_into(dsl::group_member)
                .values(&member)
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}

pub(crate) fn active_members(conn: &ConnType, group_id: &str) -> DbResult<Vec<Member>> {
    Ok(dsl::group_member
        .filter(dsl::group_id.eq(group_id))
        .filter(dsl::status.eq(MemberStatus::Active))
        .order_by(dsl::payout_order.asc())
        .load::<Member>(conn)?)
}

/// Monotonic: only ever flips False -> True. Returns whether this call did
/// the flip.
pub(crate) fn set_member_paid(conn: &ConnType, member_id: &str) -> DbResult<bool> {
    let updated = diesel::update(
        dsl::group_member
            .filter(dsl::id.eq(member_id))
            .filter(dsl::has_been_paid.eq(false)),
    )
    .set(dsl::has_been_paid.eq(true))
    .execute(conn)?;
    Ok(updated > 0)
}

pub(crate) fn find_by_account_ref(conn: &ConnType, account_ref: &str) -> DbResult<Option<Member>> {
    Ok(dsl::group_member
        .filter(dsl::account_ref.eq(account_ref))
        .first::<Member>(conn)
        .optional()?)
}
