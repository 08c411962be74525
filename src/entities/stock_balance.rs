use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-(product, warehouse, period) aggregate stock counters.
///
/// `available_qty` is free to allocate; `booked_qty` is promised to approved
/// but unfulfilled requisitions. Allocation only ever decrements availability
/// and increments bookings; fulfilment (out of scope here) releases bookings.
/// Uniqueness over (product_id, warehouse_id, period) is enforced by index.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_balances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    /// First day of the calendar month the counters belong to.
    pub period: NaiveDate,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub available_qty: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub booked_qty: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub ending_qty: Decimal,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::warehouse::Entity",
        from = "Column::WarehouseId",
        to = "super::warehouse::Column::Id"
    )]
    Warehouse,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::warehouse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Warehouse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
