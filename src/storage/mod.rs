mod schema;
mod tuple;

pub use schema::{Field, Schema, Type};
pub use tuple::{Cell, RecordId, Tuple};
