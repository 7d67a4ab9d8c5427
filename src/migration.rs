use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20260101_000001_create_urls::Migration)]
    }
}

mod m20260101_000001_create_urls {
    use sea_orm_migration::prelude::*;

    const CREATED_AT_INDEX: &str = "idx_urls_created_at";

    #[derive(DeriveMigrationName)]
    pub struct Migration;

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Urls::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Urls::ShortCode)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Urls::OriginalUrl).text().not_null())
                        // NOTE: one row per original URL is enforced on its digest; btree
                        // index rows cannot hold arbitrarily long URLs
                        .col(
                            ColumnDef::new(Urls::OriginalUrlHash)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Urls::Clicks)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Urls::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Urls::LastAccessed)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(CREATED_AT_INDEX)
                        .table(Urls::Table)
                        .col(Urls::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager.drop_index(drop_created_at_index()).await?;
            manager
                .drop_table(Table::drop().table(Urls::Table).to_owned())
                .await
        }
    }

    // NOTE: MySQL cannot drop an index without naming its table
    pub(super) fn drop_created_at_index() -> IndexDropStatement {
        Index::drop()
            .name(CREATED_AT_INDEX)
            .table(Urls::Table)
            .to_owned()
    }

    #[derive(DeriveIden)]
    enum Urls {
        Table,
        ShortCode,
        OriginalUrl,
        OriginalUrlHash,
        Clicks,
        CreatedAt,
        LastAccessed,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use sea_orm::{ConnectOptions, ConnectionTrait, Database, Statement};

    use super::*;

    #[test]
    fn test_drop_created_at_index_names_table() {
        assert_eq!(
            m20260101_000001_create_urls::drop_created_at_index().to_string(MysqlQueryBuilder),
            "DROP INDEX `idx_urls_created_at` ON `urls`"
        );
    }

    #[tokio::test]
    async fn test_down_then_up_again() {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1);
        let db = Database::connect(options).await.unwrap();

        Migrator::up(&db, None).await.unwrap();
        Migrator::down(&db, None).await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let indexes = db
            .query_all_raw(Statement::from_string(
                db.get_database_backend(),
                "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'urls'",
            ))
            .await
            .unwrap();
        assert!(
            indexes
                .iter()
                .any(|row| row.try_get::<String>("", "name").unwrap() == "idx_urls_created_at")
        );
    }
}
