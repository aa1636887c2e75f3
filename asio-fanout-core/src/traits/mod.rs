pub mod audio_backend;
pub mod host_callbacks;
