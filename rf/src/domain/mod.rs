//! Domain types: facts, task declarations and sheet data

mod facts;
mod sheet;
mod task;

pub use facts::{Fact, FactMapping, FactValue, KeyKind, KeySchema, PlaceholderMapping, SchemaViolation};
pub use sheet::{SheetTable, Workbook};
pub use task::{ParagraphTask, SheetTask, TaskConfig};
