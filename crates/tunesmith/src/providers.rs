pub mod base;
pub mod configs;
pub mod openai;
pub mod wire;

#[cfg(test)]
pub mod mock;
