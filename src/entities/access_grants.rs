use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "access_grants")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub user_id: i32,

    pub script_id: i32,

    pub tradingview_username: String,

    /// RFC3339; `None` for lifetime grants
    pub expiration: Option<String>,

    pub granted_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Users,
    #[sea_orm(
        belongs_to = "super::pine_scripts::Entity",
        from = "Column::ScriptId",
        to = "super::pine_scripts::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    PineScripts,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::pine_scripts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PineScripts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
