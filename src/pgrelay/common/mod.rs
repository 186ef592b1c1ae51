mod errors;

pub use self::errors::{Error, ErrorKind, Result, TooLongField};
