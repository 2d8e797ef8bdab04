use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "pine_scripts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// TradingView publication id, e.g. `PUB;0c59036e...`
    #[sea_orm(unique)]
    pub pine_id: String,

    pub name: String,

    pub description: String,

    pub is_active: bool,

    pub agent_visible: bool,

    pub created_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::access_grants::Entity")]
    AccessGrants,
}

impl Related<super::access_grants::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccessGrants.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
