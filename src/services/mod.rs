pub mod catalog;
pub mod checkout;
pub mod notifications;
pub mod settlement;
