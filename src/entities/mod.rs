pub mod document_counter;
pub mod line_allocation;
pub mod product;
pub mod purchase_request;
pub mod purchase_request_line;
pub mod stock_balance;
pub mod stock_batch;
pub mod transfer_order;
pub mod transfer_order_item;
pub mod warehouse;
