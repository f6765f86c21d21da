pub mod config;
pub mod net;
pub mod tools;

#[cfg(test)]
pub mod testing;
