pub mod extract;
pub mod missed;
pub mod pipeline;
pub mod source;
