pub mod audit;
pub mod catalog;
pub mod consignments;
pub mod fiscal;
pub mod invoicing;
pub mod pricing;
pub mod quotations;
pub mod sequences;
pub mod stock_ledger;
