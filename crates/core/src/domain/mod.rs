pub mod billing;
pub mod cart;
pub mod catalog;
pub mod discount;
pub mod order;
pub mod organizer;
pub mod registration;
pub mod ticket;
pub mod waitlist;
