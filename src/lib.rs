pub mod audio;
pub mod config;
pub mod error;
pub mod live;
pub mod net;
pub mod playback;
pub mod session;
pub mod transcript;

#[cfg(test)]
pub(crate) mod testing;
