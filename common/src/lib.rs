#[macro_use]
mod macros;

agg_mod![billing, db, error, import, link, memory, models, repository, utils];

pub use error::StoreError;
pub use repository::{Change, Repository, Store};
