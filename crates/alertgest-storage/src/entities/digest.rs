use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "digests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub capture_window_id: String,
    pub generated_at: DateTimeWithTimeZone,
    pub llm_model: Option<String>,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub raw_prompt: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub raw_response: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub formatted_output: Option<String>,
    pub teams_message_id: Option<String>,
    pub delivery_status: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::capture_window::Entity",
        from = "Column::CaptureWindowId",
        to = "super::capture_window::Column::Id",
        on_delete = "Cascade"
    )]
    CaptureWindow,
}

impl Related<super::capture_window::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CaptureWindow.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
