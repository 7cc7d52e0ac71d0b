pub mod consignment;
pub mod consignment_item;
pub mod consignment_return;
pub mod consignment_return_item;
pub mod customer;
pub mod document_sequence;
pub mod invoice;
pub mod payment;
pub mod price_list_entry;
pub mod product;
pub mod quotation;
pub mod quotation_item;
pub mod sale;
pub mod sale_item;
pub mod stock_lot;
pub mod stock_movement;
