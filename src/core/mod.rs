pub mod audio;
pub mod chroma;
pub mod encoder;
pub mod frame;
pub mod geometry;
pub mod pointer;
pub mod recorder;
pub mod render;
pub mod source;
pub mod surface;
