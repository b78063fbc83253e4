pub mod genome;
pub mod reference_tables;
pub mod variants;
