pub mod dao;
pub mod model;
pub(crate) mod schema;

pub mod migrations {
    #![allow(dead_code, unused_imports)]

    embed_migrations!();

    pub use self::embedded_migrations::run_with_output;
}

pub use tanda_persistence::Error as DbError;

pub type DbResult<T> = Result<T, DbError>;
