//! Car Price Bot: guided car-attribute collection, price prediction and a
//! single-vote rating ledger.

pub mod bot;
pub mod channels;
pub mod collection;
pub mod config;
pub mod error;
pub mod predictor;
pub mod rating;
pub mod store;
