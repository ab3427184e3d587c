pub mod outcome;

pub use outcome::{classify, is_notable};
