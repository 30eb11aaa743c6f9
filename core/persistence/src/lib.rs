#[macro_use]
extern crate diesel;

pub mod executor;
pub mod types;

pub use executor::{
    do_with_transaction, readonly_transaction, AsDao, ConnType, DbExecutor, Error, PoolType,
};
pub use types::BigDecimalField;
