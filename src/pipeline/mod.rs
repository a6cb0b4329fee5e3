pub mod vocabulary;
pub mod extraction;
pub mod structuring;
pub mod assembler;
pub mod processor;
