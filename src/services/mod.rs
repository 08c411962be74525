pub mod allocation;
pub mod batch_costing;
pub mod request_status;
pub mod sequences;
pub mod stock_ledger;
pub mod transfer_orders;
