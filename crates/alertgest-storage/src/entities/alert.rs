use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub fingerprint: String,
    pub alertname: String,
    pub status: String,
    pub severity: Option<String>,
    pub namespace: Option<String>,
    /// JSON object, string → string.
    #[sea_orm(column_type = "Text")]
    pub labels: String,
    #[sea_orm(column_type = "Text")]
    pub annotations: String,
    pub starts_at: DateTimeWithTimeZone,
    pub ends_at: Option<DateTimeWithTimeZone>,
    pub received_at: DateTimeWithTimeZone,
    pub capture_window_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::capture_window::Entity",
        from = "Column::CaptureWindowId",
        to = "super::capture_window::Column::Id",
        on_delete = "SetNull"
    )]
    CaptureWindow,
}

impl Related<super::capture_window::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CaptureWindow.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
