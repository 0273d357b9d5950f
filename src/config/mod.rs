pub mod paths;
pub mod persistence;
pub mod schema;

pub use paths::*;
pub use persistence::*;
pub use schema::*;

fn default_hold_table_size() -> usize {
    64
}

fn default_atime() -> bool {
    true
}
