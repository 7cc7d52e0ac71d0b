use anyhow::Result;
use sea_orm::{ConnectOptions, Database, DbBackend};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_catalog_tables::Migration),
            Box::new(m20240301_000002_create_stock_tables::Migration),
            Box::new(m20240301_000003_create_document_sequences_table::Migration),
            Box::new(m20240301_000004_create_quotation_tables::Migration),
            Box::new(m20240301_000005_create_consignment_tables::Migration),
            Box::new(m20240301_000006_create_sales_tables::Migration),
        ]
    }
}

/// Declared precision of money columns. SQLite refuses more than 16 digits.
fn money_precision(manager: &SchemaManager) -> u32 {
    match manager.get_database_backend() {
        DbBackend::Sqlite => 16,
        _ => 19,
    }
}

// Migration implementations

mod m20240301_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Customers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Customers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Customers::Name).string().not_null())
                        .col(ColumnDef::new(Customers::TaxId).string().null())
                        .col(ColumnDef::new(Customers::TaxCondition).string().not_null())
                        .col(ColumnDef::new(Customers::PriceListId).uuid().null())
                        .col(
                            ColumnDef::new(Customers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Sku).string().not_null().unique_key())
                        .col(
                            ColumnDef::new(Products::BasePrice)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::CostPrice)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::TaxRate)
                                .decimal_len(7, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PriceListEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PriceListEntries::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PriceListEntries::PriceListId).uuid().not_null())
                        .col(ColumnDef::new(PriceListEntries::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(PriceListEntries::Price)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_price_list_entries_list_product")
                        .table(PriceListEntries::Table)
                        .col(PriceListEntries::PriceListId)
                        .col(PriceListEntries::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PriceListEntries::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Customers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Customers {
        Table,
        Id,
        Name,
        TaxId,
        TaxCondition,
        PriceListId,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Sku,
        BasePrice,
        CostPrice,
        TaxRate,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum PriceListEntries {
        Table,
        Id,
        PriceListId,
        ProductId,
        Price,
    }
}

mod m20240301_000002_create_stock_tables {

    use super::m20240301_000001_create_catalog_tables::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_stock_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLots::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(StockLots::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(StockLots::ProductId).uuid().not_null())
                        .col(ColumnDef::new(StockLots::LotNumber).string().not_null())
                        .col(
                            ColumnDef::new(StockLots::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(StockLots::ExpirationDate).date().null())
                        .col(
                            ColumnDef::new(StockLots::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockLots::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_lots_product")
                                .from(StockLots::Table, StockLots::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_lots_product_expiration")
                        .table(StockLots::Table)
                        .col(StockLots::ProductId)
                        .col(StockLots::ExpirationDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::ProductId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::LotId).uuid().null())
                        .col(ColumnDef::new(StockMovements::Quantity).integer().not_null())
                        .col(ColumnDef::new(StockMovements::Reason).string().not_null())
                        .col(ColumnDef::new(StockMovements::ReferenceId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_reference")
                        .table(StockMovements::Table)
                        .col(StockMovements::ReferenceId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockLots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockLots {
        Table,
        Id,
        ProductId,
        LotNumber,
        Quantity,
        ExpirationDate,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum StockMovements {
        Table,
        Id,
        ProductId,
        LotId,
        Quantity,
        Reason,
        ReferenceId,
        CreatedAt,
    }
}

mod m20240301_000003_create_document_sequences_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_document_sequences_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // The primary key on `key` is the conflict target of the upsert-increment.
            manager
                .create_table(
                    Table::create()
                        .table(DocumentSequences::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DocumentSequences::Key)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DocumentSequences::LastNumber)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DocumentSequences::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DocumentSequences::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum DocumentSequences {
        Table,
        Key,
        LastNumber,
        UpdatedAt,
    }
}

mod m20240301_000004_create_quotation_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_quotation_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Quotations::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Quotations::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Quotations::Code).string().not_null().unique_key())
                        .col(ColumnDef::new(Quotations::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Quotations::Status).string().not_null())
                        .col(
                            ColumnDef::new(Quotations::ValidUntil)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Quotations::Subtotal)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Quotations::TaxAmount)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Quotations::Total)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Quotations::Notes).text().null())
                        .col(ColumnDef::new(Quotations::TermsAndConditions).text().null())
                        .col(ColumnDef::new(Quotations::ConvertedToSaleId).uuid().null())
                        .col(
                            ColumnDef::new(Quotations::ConvertedToConsignmentId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Quotations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Quotations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Serves the expiry sweep
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_quotations_status_valid_until")
                        .table(Quotations::Table)
                        .col(Quotations::Status)
                        .col(Quotations::ValidUntil)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(QuotationItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(QuotationItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(QuotationItems::QuotationId).uuid().not_null())
                        .col(ColumnDef::new(QuotationItems::Position).integer().not_null())
                        .col(ColumnDef::new(QuotationItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(QuotationItems::ProductName).string().not_null())
                        .col(ColumnDef::new(QuotationItems::ProductSku).string().not_null())
                        .col(ColumnDef::new(QuotationItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(QuotationItems::UnitPrice)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(QuotationItems::DiscountPercent)
                                .decimal_len(7, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(QuotationItems::TaxRate)
                                .decimal_len(7, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(QuotationItems::LineTotal)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(QuotationItems::TaxAmount)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_quotation_items_quotation")
                                .from(QuotationItems::Table, QuotationItems::QuotationId)
                                .to(Quotations::Table, Quotations::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_quotation_items_quotation_id")
                        .table(QuotationItems::Table)
                        .col(QuotationItems::QuotationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(QuotationItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Quotations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Quotations {
        Table,
        Id,
        Code,
        CustomerId,
        Status,
        ValidUntil,
        Subtotal,
        TaxAmount,
        Total,
        Notes,
        TermsAndConditions,
        ConvertedToSaleId,
        ConvertedToConsignmentId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum QuotationItems {
        Table,
        Id,
        QuotationId,
        Position,
        ProductId,
        ProductName,
        ProductSku,
        Quantity,
        UnitPrice,
        DiscountPercent,
        TaxRate,
        LineTotal,
        TaxAmount,
    }
}

mod m20240301_000005_create_consignment_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_consignment_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Consignments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Consignments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Consignments::Code).string().not_null().unique_key())
                        .col(ColumnDef::new(Consignments::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Consignments::QuotationId).uuid().null())
                        .col(ColumnDef::new(Consignments::Status).string().not_null())
                        .col(
                            ColumnDef::new(Consignments::TotalValue)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Consignments::ReturnedValue)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Consignments::InvoicedValue)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Consignments::Notes).text().null())
                        .col(
                            ColumnDef::new(Consignments::DeliveredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Consignments::ClosedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Consignments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ConsignmentItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ConsignmentItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentItems::ConsignmentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ConsignmentItems::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(ConsignmentItems::ProductName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentItems::ProductSku)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentItems::UnitPrice)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentItems::QuantityDelivered)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentItems::QuantityReturned)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ConsignmentItems::QuantityInvoiced)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_consignment_items_consignment")
                                .from(ConsignmentItems::Table, ConsignmentItems::ConsignmentId)
                                .to(Consignments::Table, Consignments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_consignment_items_consignment_id")
                        .table(ConsignmentItems::Table)
                        .col(ConsignmentItems::ConsignmentId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ConsignmentReturns::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ConsignmentReturns::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturns::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturns::ConsignmentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturns::TotalValue)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturns::Condition)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ConsignmentReturns::Reason).text().null())
                        .col(ColumnDef::new(ConsignmentReturns::ReceivedBy).string().null())
                        .col(
                            ColumnDef::new(ConsignmentReturns::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_consignment_returns_consignment")
                                .from(ConsignmentReturns::Table, ConsignmentReturns::ConsignmentId)
                                .to(Consignments::Table, Consignments::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ConsignmentReturnItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ConsignmentReturnItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturnItems::ReturnId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturnItems::ConsignmentItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturnItems::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturnItems::ProductName)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturnItems::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturnItems::UnitPrice)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsignmentReturnItems::Condition)
                                .string()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_consignment_return_items_return")
                                .from(ConsignmentReturnItems::Table, ConsignmentReturnItems::ReturnId)
                                .to(ConsignmentReturns::Table, ConsignmentReturns::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ConsignmentReturnItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ConsignmentReturns::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ConsignmentItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Consignments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Consignments {
        Table,
        Id,
        Code,
        CustomerId,
        QuotationId,
        Status,
        TotalValue,
        ReturnedValue,
        InvoicedValue,
        Notes,
        DeliveredAt,
        ClosedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum ConsignmentItems {
        Table,
        Id,
        ConsignmentId,
        ProductId,
        ProductName,
        ProductSku,
        UnitPrice,
        QuantityDelivered,
        QuantityReturned,
        QuantityInvoiced,
    }

    #[derive(DeriveIden)]
    enum ConsignmentReturns {
        Table,
        Id,
        Code,
        ConsignmentId,
        TotalValue,
        Condition,
        Reason,
        ReceivedBy,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum ConsignmentReturnItems {
        Table,
        Id,
        ReturnId,
        ConsignmentItemId,
        ProductId,
        ProductName,
        Quantity,
        UnitPrice,
        Condition,
    }
}

mod m20240301_000006_create_sales_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_sales_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Sales::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Sales::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Sales::Code).string().not_null().unique_key())
                        .col(ColumnDef::new(Sales::Channel).string().not_null())
                        .col(ColumnDef::new(Sales::Status).string().not_null())
                        .col(ColumnDef::new(Sales::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Sales::Subtotal).decimal_len(super::money_precision(manager), 4).not_null())
                        .col(ColumnDef::new(Sales::TaxAmount).decimal_len(super::money_precision(manager), 4).not_null())
                        .col(
                            ColumnDef::new(Sales::TotalAmount)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Sales::QuotationId).uuid().null())
                        .col(ColumnDef::new(Sales::ConsignmentId).uuid().null())
                        .col(
                            ColumnDef::new(Sales::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Sales::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SaleItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(SaleItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(SaleItems::SaleId).uuid().not_null())
                        .col(ColumnDef::new(SaleItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(SaleItems::ProductName).string().not_null())
                        .col(ColumnDef::new(SaleItems::ProductSku).string().not_null())
                        .col(ColumnDef::new(SaleItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(SaleItems::UnitPrice)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SaleItems::DiscountPercent)
                                .decimal_len(7, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SaleItems::TaxRate)
                                .decimal_len(7, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(SaleItems::LineTotal)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SaleItems::TaxAmount)
                                .decimal_len(super::money_precision(manager), 4)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_items_sale")
                                .from(SaleItems::Table, SaleItems::SaleId)
                                .to(Sales::Table, Sales::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Invoices::SaleId).uuid().not_null().unique_key())
                        .col(ColumnDef::new(Invoices::InvoiceType).string().not_null())
                        .col(ColumnDef::new(Invoices::Status).string().not_null())
                        .col(ColumnDef::new(Invoices::PointOfSale).integer().not_null())
                        .col(ColumnDef::new(Invoices::Number).big_integer().not_null())
                        .col(ColumnDef::new(Invoices::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Invoices::CustomerName).string().not_null())
                        .col(ColumnDef::new(Invoices::CustomerTaxId).string().null())
                        .col(
                            ColumnDef::new(Invoices::CustomerTaxCondition)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Invoices::Subtotal).decimal_len(super::money_precision(manager), 4).not_null())
                        .col(ColumnDef::new(Invoices::TaxAmount).decimal_len(super::money_precision(manager), 4).not_null())
                        .col(ColumnDef::new(Invoices::Total).decimal_len(super::money_precision(manager), 4).not_null())
                        .col(ColumnDef::new(Invoices::Cae).string().not_null())
                        .col(ColumnDef::new(Invoices::CaeExpiration).date().not_null())
                        .col(
                            ColumnDef::new(Invoices::IssuedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoices_sale")
                                .from(Invoices::Table, Invoices::SaleId)
                                .to(Sales::Table, Sales::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // Fiscal numbering: one number per (point of sale, invoice type)
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoices_pos_type_number")
                        .table(Invoices::Table)
                        .col(Invoices::PointOfSale)
                        .col(Invoices::InvoiceType)
                        .col(Invoices::Number)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::SaleId).uuid().not_null())
                        .col(ColumnDef::new(Payments::Amount).decimal_len(super::money_precision(manager), 4).not_null())
                        .col(ColumnDef::new(Payments::Method).string().not_null())
                        .col(ColumnDef::new(Payments::Reference).string().null())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_sale")
                                .from(Payments::Table, Payments::SaleId)
                                .to(Sales::Table, Sales::Id),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SaleItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Sales::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Sales {
        Table,
        Id,
        Code,
        Channel,
        Status,
        CustomerId,
        Subtotal,
        TaxAmount,
        TotalAmount,
        QuotationId,
        ConsignmentId,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum SaleItems {
        Table,
        Id,
        SaleId,
        ProductId,
        ProductName,
        ProductSku,
        Quantity,
        UnitPrice,
        DiscountPercent,
        TaxRate,
        LineTotal,
        TaxAmount,
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
        SaleId,
        InvoiceType,
        Status,
        PointOfSale,
        Number,
        CustomerId,
        CustomerName,
        CustomerTaxId,
        CustomerTaxCondition,
        Subtotal,
        TaxAmount,
        Total,
        Cae,
        CaeExpiration,
        IssuedAt,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        SaleId,
        Amount,
        Method,
        Reference,
        CreatedAt,
    }
}

// Database migration CLI runner
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(4)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::product;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
    use uuid::Uuid;

    #[tokio::test]
    async fn schema_applies_on_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("schema.db").display());
        run_migration(&url).await.unwrap();

        let db = Database::connect(url.as_str()).await.unwrap();
        assert_eq!(db.get_database_backend(), DbBackend::Sqlite);
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set("Aceite 5L".into()),
            sku: Set("ACE-5L".into()),
            base_price: Set(dec!(1250.5)),
            cost_price: Set(dec!(900)),
            tax_rate: Set(dec!(21)),
            created_at: Set(Utc::now()),
        }
        .insert(&db)
        .await
        .unwrap();

        let stored = product::Entity::find_by_id(id).one(&db).await.unwrap().unwrap();
        assert_eq!(stored.base_price, dec!(1250.5));
        assert_eq!(stored.tax_rate, dec!(21));
    }
}
