//! Wire formats: the JSON message body on the way in, CSV balances on the way out.

pub mod csv;
pub mod json;
