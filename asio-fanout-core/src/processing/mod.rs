pub mod resampler;
pub mod ring_buffer;
pub mod sample_format;
pub mod wave_load;
