pub mod file_service;
pub mod key_codec;
pub mod local_store;
pub mod object_store;

#[cfg(test)]
pub mod testing;
