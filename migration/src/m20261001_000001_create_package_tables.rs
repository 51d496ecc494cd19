use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table("users")
                    .if_not_exists()
                    .col(pk_uuid("user_id"))
                    .col(string_uniq("handle"))
                    .col(string_null("display_name"))
                    .col(timestamp_null("deleted_at"))
                    .col(timestamp("created_at"))
                    .col(timestamp("updated_at"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table("packages")
                    .if_not_exists()
                    .col(pk_auto("id"))
                    .col(string_len("kind", 16))
                    .col(string("slug"))
                    .col(string("display_name"))
                    .col(uuid("owner_user_id"))
                    .col(integer_null("latest_version_id"))
                    .col(text_null("summary"))
                    .col(timestamp_null("deleted_at"))
                    .col(timestamp("created_at"))
                    .col(timestamp("updated_at"))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-packages-owner_user_id")
                            .from("packages", "owner_user_id")
                            .to("users", "user_id"),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-packages-kind-slug")
                    .table("packages")
                    .col("kind")
                    .col("slug")
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table("package_versions")
                    .if_not_exists()
                    .col(pk_auto("id"))
                    .col(integer("package_id"))
                    .col(string("version"))
                    .col(text("changelog"))
                    .col(json("tags"))
                    .col(json("files"))
                    .col(string("fingerprint"))
                    .col(json_null("source"))
                    .col(uuid("created_by"))
                    .col(timestamp("created_at"))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-package_versions-package_id")
                            .from("package_versions", "package_id")
                            .to("packages", "id"),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-package_versions-package-version")
                    .table("package_versions")
                    .col("package_id")
                    .col("version")
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table("backup_sync_state")
                    .if_not_exists()
                    .col(string("key").primary_key())
                    .col(string_null("cursor"))
                    .col(string_len("status", 16))
                    .col(text_null("last_error"))
                    .col(timestamp("updated_at"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table("rate_limits")
                    .if_not_exists()
                    .col(string("key").primary_key())
                    .col(big_integer("window_start"))
                    .col(integer("count"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [
            "rate_limits",
            "backup_sync_state",
            "package_versions",
            "packages",
            "users",
        ] {
            manager
                .drop_table(Table::drop().table(table).to_owned())
                .await?;
        }
        Ok(())
    }
}
