mod table;

pub use table::{Token, TokenTable, tokens_equal};
