pub mod analysis;
pub mod anchor;
pub mod gemini;
pub mod grammar;
pub mod highlight;
pub mod hints;
pub mod openai;
pub mod page;
pub mod prompt;
pub mod scoring;
pub mod segment;
pub mod session;
pub mod stores;
pub mod tokenizer;
