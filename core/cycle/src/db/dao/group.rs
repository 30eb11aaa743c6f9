use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use tanda_persistence::{
    do_with_transaction, readonly_transaction, AsDao, BigDecimalField, ConnType, PoolType,
};

use crate::db::dao::payment::group_amount_totals;
use crate::db::model::{
    check_group_transition, Group, GroupId, GroupStatus, InvalidGroupTransition, PauseReason,
};
use crate::db::schema::rosca_group::dsl;
use crate::db::{DbError, DbResult};

#[derive(thiserror::Error, Debug)]
pub enum GroupDaoError {
    #[error("Group [{0}] not found.")]
    NotFound(GroupId),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidGroupTransition),
    #[error("Failed to update group. Error: {0}")]
    DbError(DbError),
}

impl<ErrorType: Into<DbError>> From<ErrorType> for GroupDaoError {
    fn from(err: ErrorType) -> Self {
        GroupDaoError::DbError(err.into())
    }
}

pub struct GroupDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for GroupDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> GroupDao<'c> {
    pub async fn get(&self, group_id: &str) -> DbResult<Option<Group>> {
        let group_id = group_id.to_string();
        readonly_transaction(self.pool, move |conn| get_group(conn, &group_id)).await
    }

    pub async fn list(&self) -> DbResult<Vec<Group>> {
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::rosca_group
                .order_by(dsl::created_ts.asc())
                .load::<Group>(conn)?)
        })
        .await
    }

    /// Group CRUD itself is owned by an external service; this insert exists
    /// for fixtures and operator tooling.
    pub async fn create(&self, group: Group) -> DbResult<()> {
        do_with_transaction(self.pool, move |conn| {
            diesel::insert_into(dsl::rosca_group)
                .values(&group)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn pause(
        &self,
        group_id: &str,
        reason: PauseReason,
    ) -> Result<Group, GroupDaoError> {
        let group_id = group_id.to_string();
        do_with_transaction(self.pool, move |conn| {
            let mut group =
                get_group(conn, &group_id)?.ok_or(GroupDaoError::NotFound(group_id))?;
            pause_group(conn, &mut group, reason)?;
            Ok(group)
        })
        .await
    }

    pub async fn resume(&self, group_id: &str) -> Result<Group, GroupDaoError> {
        let group_id = group_id.to_string();
        do_with_transaction(self.pool, move |conn| {
            let mut group =
                get_group(conn, &group_id)?.ok_or(GroupDaoError::NotFound(group_id))?;
            resume_group(conn, &mut group)?;
            Ok(group)
        })
        .await
    }
}

pub(crate) fn get_group(conn: &ConnType, group_id: &str) -> DbResult<Option<Group>> {
    Ok(dsl::rosca_group
        .filter(dsl::id.eq(group_id))
        .first::<Group>(conn)
        .optional()?)
}

pub(crate) fn update_group_status(
    conn: &ConnType,
    group: &mut Group,
    to: GroupStatus,
    reason: Option<PauseReason>,
) -> Result<(), GroupDaoError> {
    check_group_transition(group.status, to)?;

    diesel::update(dsl::rosca_group.find(&group.id))
        .set((
            dsl::status.eq(to),
            dsl::pause_reason.eq(reason),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .map_err(|e| GroupDaoError::DbError(e.into()))?;

    group.status = to;
    group.pause_reason = reason;
    Ok(())
}

/// Idempotent: pausing an already paused group for the same reason is a
/// no-op; a different reason overwrites it without a state transition.
pub(crate) fn pause_group(
    conn: &ConnType,
    group: &mut Group,
    reason: PauseReason,
) -> Result<bool, GroupDaoError> {
    if group.status == GroupStatus::Paused {
        if group.pause_reason != Some(reason) {
            diesel::update(dsl::rosca_group.find(&group.id))
                .set((
                    dsl::pause_reason.eq(Some(reason)),
                    dsl::updated_ts.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)
                .map_err(|e| GroupDaoError::DbError(e.into()))?;
            group.pause_reason = Some(reason);
        }
        return Ok(false);
    }
    update_group_status(conn, group, GroupStatus::Paused, Some(reason))?;
    Ok(true)
}

pub(crate) fn resume_group(conn: &ConnType, group: &mut Group) -> Result<(), GroupDaoError> {
    check_group_transition(group.status, GroupStatus::Active)?;

    diesel::update(dsl::rosca_group.find(&group.id))
        .set((
            dsl::status.eq(GroupStatus::Active),
            dsl::pause_reason.eq(None::<PauseReason>),
            dsl::cycle_started.eq(true),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .map_err(|e| GroupDaoError::DbError(e.into()))?;

    group.status = GroupStatus::Active;
    group.pause_reason = None;
    group.cycle_started = true;
    Ok(())
}

pub(crate) fn mark_cycle_started(conn: &ConnType, group: &mut Group) -> DbResult<()> {
    diesel::update(dsl::rosca_group.find(&group.id))
        .set((
            dsl::cycle_started.eq(true),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    group.cycle_started = true;
    Ok(())
}

pub(crate) fn set_frequency(
    conn: &ConnType,
    group: &mut Group,
    frequency: crate::db::model::CycleFrequency,
) -> DbResult<()> {
    if group.cycle_frequency == frequency {
        return Ok(());
    }
    diesel::update(dsl::rosca_group.find(&group.id))
        .set((
            dsl::cycle_frequency.eq(frequency),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    group.cycle_frequency = frequency;
    Ok(())
}

pub(crate) fn set_schedule(
    conn: &ConnType,
    group_id: &str,
    next_cycle_date: Option<NaiveDateTime>,
    future_cycles: &str,
) -> DbResult<()> {
    diesel::update(dsl::rosca_group.find(group_id))
        .set((
            dsl::next_cycle_date.eq(next_cycle_date),
            dsl::future_cycles.eq(future_cycles),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Re-derives the cached totals from the payment table. Runs inside every
/// transaction that mutates payments, so the cache can lag only by a failed
/// transaction, which changes nothing anyway.
pub(crate) fn recompute_aggregates(conn: &ConnType, group_id: &str) -> DbResult<()> {
    let totals = group_amount_totals(conn, group_id)?;
    diesel::update(dsl::rosca_group.find(group_id))
        .set((
            dsl::total_debited.eq(BigDecimalField::from(totals.debited)),
            dsl::total_pending.eq(BigDecimalField::from(totals.pending)),
            dsl::total_success.eq(BigDecimalField::from(totals.success)),
            dsl::updated_ts.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}
