pub use crate::error::Error;

pub use anstream::println;
pub use color_eyre::eyre::{eyre, Context, Result};

/// Summary table with the padding used by every command
pub fn new_table() -> prettytable::Table {
    let mut table = prettytable::Table::new();

    let format = prettytable::format::FormatBuilder::new()
        .padding(1, 1)
        .build();

    table.set_format(format);

    table
}
