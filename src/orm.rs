#[allow(warnings, clippy::all)]
pub(crate) mod short_url {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "urls")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub short_code: String,
        #[sea_orm(column_type = "Text")]
        pub original_url: String,
        /// Hex blake3 digest of `original_url`; carries the uniqueness constraint.
        #[sea_orm(unique)]
        pub original_url_hash: String,
        pub clicks: i64,
        pub created_at: TimeDateTimeWithTimeZone,
        pub last_accessed: Option<TimeDateTimeWithTimeZone>,
    }

    impl ActiveModelBehavior for ActiveModel {}
}
