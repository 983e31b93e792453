use entity::cases;
use platform_authz::{Principal, RowRestriction};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr,
    DeleteMany, EntityTrait, IntoActiveModel, PrimaryKeyTrait, QueryFilter, Select,
    sea_query::Expr,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScopeError {
    /// Also returned for records that exist in another organization.
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] DbErr),
}

/// An entity owned by an organization.
pub trait TenantScoped: EntityTrait {
    fn org_column() -> Self::Column;

    /// Column naming the staff member a record is assigned to.
    fn assignee_column() -> Option<Self::Column> {
        None
    }

    /// Column naming the client user who owns the record.
    fn client_column() -> Option<Self::Column> {
        None
    }
}

impl TenantScoped for cases::Entity {
    fn org_column() -> cases::Column {
        cases::Column::OrgId
    }

    fn assignee_column() -> Option<cases::Column> {
        Some(cases::Column::AssignedUserId)
    }

    fn client_column() -> Option<cases::Column> {
        Some(cases::Column::ClientUserId)
    }
}

/// Row filter derived from one principal. Every read and write of a
/// [`TenantScoped`] entity on behalf of a principal goes through here.
#[derive(Debug, Clone, Copy)]
pub struct TenantScope {
    principal: Principal,
}

impl TenantScope {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// The org filter plus any role restriction. A restricted role on an
    /// entity without the matching column sees nothing.
    pub fn condition<E: TenantScoped>(&self) -> Condition {
        let cond = Condition::all().add(E::org_column().eq(self.principal.org_id));
        let user_id = self.principal.user_id;
        match self.principal.role.row_restriction() {
            None => cond,
            Some(RowRestriction::Assigned) => match E::assignee_column() {
                Some(column) => cond.add(column.eq(user_id)),
                None => cond.add(Expr::val(1).eq(0)),
            },
            Some(RowRestriction::Owned) => match E::client_column() {
                Some(column) => cond.add(column.eq(user_id)),
                None => cond.add(Expr::val(1).eq(0)),
            },
        }
    }

    pub fn select<E: TenantScoped>(&self) -> Select<E> {
        E::find().filter(self.condition::<E>())
    }

    pub fn delete<E: TenantScoped>(&self) -> DeleteMany<E> {
        E::delete_many().filter(self.condition::<E>())
    }

    /// Out-of-scope records are indistinguishable from missing ones.
    pub async fn find_by_id<E, C, K>(&self, db: &C, id: K) -> Result<E::Model, ScopeError>
    where
        E: TenantScoped,
        C: ConnectionTrait,
        K: Into<<E::PrimaryKey as PrimaryKeyTrait>::ValueType>,
    {
        E::find_by_id(id)
            .filter(self.condition::<E>())
            .one(db)
            .await?
            .ok_or(ScopeError::NotFound)
    }

    /// Inserts with `org_id` forced to the principal's organization. A staff
    /// member's unassigned record is assigned to them so it stays visible.
    pub async fn insert<A, C>(&self, db: &C, mut model: A) -> Result<<A::Entity as EntityTrait>::Model, ScopeError>
    where
        A: ActiveModelTrait + ActiveModelBehavior + Send,
        A::Entity: TenantScoped,
        <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
        C: ConnectionTrait,
    {
        model.set(
            <A::Entity as TenantScoped>::org_column(),
            self.principal.org_id.into(),
        );
        if self.principal.role.row_restriction() == Some(RowRestriction::Assigned) {
            if let Some(column) = <A::Entity as TenantScoped>::assignee_column() {
                if model.is_not_set(column) {
                    model.set(column, Some(self.principal.user_id).into());
                }
            }
        }
        Ok(model.insert(db).await?)
    }
}
