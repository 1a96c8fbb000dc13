//! Row types handed to persistence. Kept free of engine types so storage
//! consumers do not pull in the vision stack.

pub mod report;
